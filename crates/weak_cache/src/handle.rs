// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Weak handles to primary keys and cached values.
//!
//! Both handle types hash by the identity of the object they were created for, and keep that hash
//! after the object is gone, so a dead handle can still be located and removed from a map. Two
//! handles are equal when they refer to the same live object. A handle whose object has been
//! reclaimed is equal only to itself (and its clones), never to another handle.

use std::fmt::{self, Debug};
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Weak};

use crate::tracked::{Tracked, TrackedInner};

/// Returns the address of the object behind `ptr`, which serves as its identity.
pub(crate) fn identity_of<T: ?Sized>(ptr: *const T) -> usize {
    ptr.cast::<()>().addr()
}

struct WeakRef<T: ?Sized> {
    referent: Weak<T>,
    hash: usize,
}

impl<T: ?Sized> WeakRef<T> {
    fn is_live(&self) -> bool {
        self.referent.strong_count() > 0
    }
}

/// Returns `true` for clones of one handle, or for two handles to the same live object.
fn same_live_referent<T: ?Sized>(this: &Arc<WeakRef<T>>, other: &Arc<WeakRef<T>>) -> bool {
    Arc::ptr_eq(this, other) || (this.hash == other.hash && Weak::ptr_eq(&this.referent, &other.referent) && this.is_live())
}

/// A weak handle to a primary key.
///
/// The cache stores one registered handle per live primary key. Lookups build a throwaway handle
/// for the caller's key and rely on equality with the stored one.
pub(crate) struct KeyHandle<K> {
    inner: Arc<WeakRef<TrackedInner<K>>>,
}

impl<K> KeyHandle<K> {
    pub(crate) fn new(key: &Tracked<K>) -> Self {
        let referent = key.downgrade();
        let hash = identity_of(referent.as_ptr());
        Self {
            inner: Arc::new(WeakRef { referent, hash }),
        }
    }

    pub(crate) fn is_live(&self) -> bool {
        self.inner.is_live()
    }
}

impl<K> Clone for KeyHandle<K> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K> PartialEq for KeyHandle<K> {
    fn eq(&self, other: &Self) -> bool {
        same_live_referent(&self.inner, &other.inner)
    }
}

impl<K> Eq for KeyHandle<K> {}

impl<K> Hash for KeyHandle<K> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_usize(self.inner.hash);
    }
}

impl<K> Debug for KeyHandle<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyHandle")
            .field("identity", &format_args!("{:#x}", self.inner.hash))
            .field("live", &self.is_live())
            .finish()
    }
}

/// A weak handle to a cached value.
pub(crate) struct ValueHandle<V> {
    inner: Arc<WeakRef<V>>,
}

impl<V> ValueHandle<V> {
    pub(crate) fn new(value: &Arc<V>) -> Self {
        Self {
            inner: Arc::new(WeakRef {
                referent: Arc::downgrade(value),
                hash: identity_of(Arc::as_ptr(value)),
            }),
        }
    }

    pub(crate) fn upgrade(&self) -> Option<Arc<V>> {
        self.inner.referent.upgrade()
    }

    pub(crate) fn is_live(&self) -> bool {
        self.inner.is_live()
    }

    /// Returns `true` if `other` is this very handle or one of its clones.
    pub(crate) fn is_same_handle(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl<V> Clone for ValueHandle<V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<V> PartialEq for ValueHandle<V> {
    fn eq(&self, other: &Self) -> bool {
        same_live_referent(&self.inner, &other.inner)
    }
}

impl<V> Eq for ValueHandle<V> {}

impl<V> Hash for ValueHandle<V> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_usize(self.inner.hash);
    }
}

impl<V> Debug for ValueHandle<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ValueHandle")
            .field("identity", &format_args!("{:#x}", self.inner.hash))
            .field("live", &self.is_live())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::hash::DefaultHasher;

    use super::*;

    fn hash_of(value: &impl Hash) -> u64 {
        let mut hasher = DefaultHasher::new();
        value.hash(&mut hasher);
        hasher.finish()
    }

    #[test]
    fn key_handles_to_same_live_key_are_equal() {
        let key = Tracked::new("loader");
        let first = KeyHandle::new(&key);
        let second = KeyHandle::new(&key.clone());

        assert_eq!(first, second);
        assert_eq!(hash_of(&first), hash_of(&second));
        assert_ne!(first, KeyHandle::new(&Tracked::new("loader")));
    }

    #[test]
    fn dead_key_handle_equals_only_itself() {
        let key = Tracked::new(1_u8);
        let first = KeyHandle::new(&key);
        let second = KeyHandle::new(&key);
        let hash_before = hash_of(&first);

        drop(key);

        assert!(!first.is_live());
        assert_ne!(first, second);
        assert_eq!(first, first.clone());
        assert_eq!(hash_of(&first), hash_before);
    }

    #[test]
    fn value_handle_tracks_value_lifetime() {
        let value = Arc::new("computed".to_string());
        let handle = ValueHandle::new(&value);
        let other = ValueHandle::new(&value);

        assert_eq!(handle, other);
        assert!(!handle.is_same_handle(&other));
        assert!(handle.is_same_handle(&handle.clone()));
        assert!(Arc::ptr_eq(&handle.upgrade().expect("value is alive"), &value));

        drop(value);

        assert!(handle.upgrade().is_none());
        assert!(!handle.is_live());
        assert_ne!(handle, other);
        assert_eq!(handle, handle.clone());
    }

    #[test]
    fn value_handles_compare_by_identity() {
        let first = Arc::new(5_u32);
        let second = Arc::new(5_u32);

        assert_ne!(ValueHandle::new(&first), ValueHandle::new(&second));
    }

    #[test]
    fn debug_reports_liveness() {
        let value = Arc::new(3_u16);
        let handle = ValueHandle::new(&value);
        assert!(format!("{handle:?}").contains("live: true"));

        drop(value);
        assert!(format!("{handle:?}").contains("live: false"));
    }
}
