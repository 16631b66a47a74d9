// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Strong handles that announce their own reclamation.

use std::fmt::{self, Debug};
use std::ops::Deref;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

/// A reclamation callback, registered on behalf of an owner that may go away first.
struct Watcher {
    owner: Weak<()>,
    on_reclaimed: Box<dyn FnOnce() + Send>,
}

impl Watcher {
    fn is_wanted(&self) -> bool {
        self.owner.strong_count() > 0
    }
}

/// A shared, reference-counted owner of a primary key.
///
/// `Tracked<T>` behaves like an [`Arc<T>`]: clones are cheap and share the same object, and the
/// object is dropped together with the last clone. In addition, every [`WeakCache`] that uses the
/// object as a primary key registers itself with it, and is notified once the last clone is gone.
/// This is how a cache learns that it can discard everything it stored under that key, without
/// keeping the key alive itself.
///
/// Identity, not value, is what a cache compares: two `Tracked` objects holding equal values are
/// still two different primary keys.
///
/// [`WeakCache`]: crate::WeakCache
///
/// # Examples
///
/// ```
/// use weak_cache::Tracked;
///
/// let loader = Tracked::new("system loader".to_string());
/// let same = loader.clone();
///
/// assert!(Tracked::ptr_eq(&loader, &same));
/// assert!(!Tracked::ptr_eq(&loader, &Tracked::new("system loader".to_string())));
/// assert_eq!(loader.len(), 13);
/// ```
pub struct Tracked<T> {
    inner: Arc<TrackedInner<T>>,
}

pub(crate) struct TrackedInner<T> {
    value: T,
    watchers: Mutex<Vec<Watcher>>,
}

impl<T> Tracked<T> {
    /// Wraps `value` in a new tracked object.
    #[must_use]
    pub fn new(value: T) -> Self {
        Self {
            inner: Arc::new(TrackedInner {
                value,
                watchers: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Returns `true` if both handles refer to the same object.
    #[must_use]
    pub fn ptr_eq(this: &Self, other: &Self) -> bool {
        Arc::ptr_eq(&this.inner, &other.inner)
    }

    /// Returns the number of live clones of this handle.
    #[must_use]
    pub fn strong_count(this: &Self) -> usize {
        Arc::strong_count(&this.inner)
    }

    pub(crate) fn downgrade(&self) -> Weak<TrackedInner<T>> {
        Arc::downgrade(&self.inner)
    }

    /// Runs `on_reclaimed` once the last clone of this object has been dropped, unless `owner`
    /// is gone by then.
    ///
    /// Watchers whose owner is already gone are discarded here, so the list stays proportional
    /// to the number of live owners.
    pub(crate) fn watch(&self, owner: &Arc<()>, on_reclaimed: impl FnOnce() + Send + 'static) {
        let mut watchers = self.inner.watchers.lock();
        watchers.retain(Watcher::is_wanted);
        watchers.push(Watcher {
            owner: Arc::downgrade(owner),
            on_reclaimed: Box::new(on_reclaimed),
        });
    }

    #[cfg(test)]
    pub(crate) fn watcher_count(this: &Self) -> usize {
        this.inner.watchers.lock().len()
    }
}

impl<T> TrackedInner<T> {
    pub(crate) fn value(&self) -> &T {
        &self.value
    }
}

impl<T> Drop for TrackedInner<T> {
    fn drop(&mut self) {
        for watcher in self.watchers.get_mut().drain(..) {
            if watcher.is_wanted() {
                (watcher.on_reclaimed)();
            }
        }
    }
}

impl<T> Clone for Tracked<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Deref for Tracked<T> {
    type Target = T;

    fn deref(&self) -> &T {
        self.inner.value()
    }
}

impl<T> AsRef<T> for Tracked<T> {
    fn as_ref(&self) -> &T {
        self.inner.value()
    }
}

impl<T: Debug> Debug for Tracked<T> {
    #[cfg_attr(test, mutants::skip)] // Diagnostic output only.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Tracked").field(self.inner.value()).finish()
    }
}
