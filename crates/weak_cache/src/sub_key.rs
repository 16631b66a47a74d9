// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Sub-keys built from a small, ordered set of shared objects.
//!
//! A common way to tell entries under one primary key apart is by a list of auxiliary objects,
//! for example the set of interfaces a generated type implements. Such a sub-key must not keep
//! those objects alive, so [`CompositeKey`] holds them weakly and compares them by identity.
//!
//! Sub-keys of arity zero, one and two are stored inline; only larger ones allocate.

use std::fmt::{self, Debug};
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Weak};

use crate::handle::identity_of;

/// An identity-based sub-key over zero or more weakly held objects.
///
/// Two composite keys are equal when they have the same arity and, position by position, refer to
/// the same objects. A component that has been reclaimed keeps its allocation reserved for as long
/// as a key refers to it, so no newer object can take its place: once any component is gone, the
/// key only equals its own clones, and no lookup built from live objects can ever match it again.
///
/// The hash is computed once, from the live objects, when the key is built.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use weak_cache::CompositeKey;
///
/// let read = Arc::new("Read");
/// let write = Arc::new("Write");
///
/// let key = CompositeKey::new(&[Arc::clone(&read), Arc::clone(&write)]);
/// assert_eq!(key, CompositeKey::new(&[Arc::clone(&read), Arc::clone(&write)]));
/// assert_ne!(key, CompositeKey::new(&[write, read]));
/// assert_eq!(key.arity(), 2);
/// ```
pub enum CompositeKey<T: ?Sized> {
    /// A key without components. All such keys are equal.
    Zero,
    /// A key with exactly one component.
    One {
        /// Identity hash of the component.
        hash: usize,
        /// The component.
        first: Weak<T>,
    },
    /// A key with exactly two components.
    Two {
        /// Combined, order-sensitive identity hash of the components.
        hash: usize,
        /// The first component.
        first: Weak<T>,
        /// The second component.
        second: Weak<T>,
    },
    /// A key with three or more components.
    Many {
        /// Combined, order-sensitive identity hash of the components.
        hash: usize,
        /// The components, in order.
        parts: Arc<[Weak<T>]>,
    },
}

impl<T: ?Sized> CompositeKey<T> {
    /// Builds a key from `parts`, choosing the variant by the number of parts.
    #[must_use]
    pub fn new(parts: &[Arc<T>]) -> Self {
        let hash = combined_hash(parts);
        match parts {
            [] => Self::Zero,
            [first] => Self::One {
                hash,
                first: Arc::downgrade(first),
            },
            [first, second] => Self::Two {
                hash,
                first: Arc::downgrade(first),
                second: Arc::downgrade(second),
            },
            _ => Self::Many {
                hash,
                parts: parts.iter().map(Arc::downgrade).collect(),
            },
        }
    }

    /// Returns the number of components.
    #[must_use]
    pub fn arity(&self) -> usize {
        match self {
            Self::Zero => 0,
            Self::One { .. } => 1,
            Self::Two { .. } => 2,
            Self::Many { parts, .. } => parts.len(),
        }
    }

    /// Returns `true` if every component is still alive.
    #[must_use]
    pub fn is_live(&self) -> bool {
        match self {
            Self::Zero => true,
            Self::One { first, .. } => is_live(first),
            Self::Two { first, second, .. } => is_live(first) && is_live(second),
            Self::Many { parts, .. } => parts.iter().all(is_live),
        }
    }

    fn identity_hash(&self) -> usize {
        match self {
            Self::Zero => 0,
            Self::One { hash, .. } | Self::Two { hash, .. } | Self::Many { hash, .. } => *hash,
        }
    }
}

/// A sub-key strategy that keys entries by the identity of the objects in the parameter.
///
/// The primary key is ignored. Pass this function directly as the sub-key strategy of a
/// [`WeakCache`][crate::WeakCache] whose parameter is a list of shared objects.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use weak_cache::{CompositeKey, WeakCache, sub_key};
///
/// let cache = WeakCache::<(), Vec<Arc<str>>, CompositeKey<str>, String>::new(sub_key::by_identity, |_, parts| {
///     Ok::<_, std::convert::Infallible>(Arc::new(parts.join("+")))
/// });
///
/// let parts: Vec<Arc<str>> = vec![Arc::from("a"), Arc::from("b")];
/// assert_eq!(*cache.get(None, &parts)?, "a+b");
/// # Ok::<(), weak_cache::Error>(())
/// ```
pub fn by_identity<K, P, T>(_key: Option<&K>, parameter: &P) -> Option<CompositeKey<T>>
where
    P: AsRef<[Arc<T>]>,
    T: ?Sized,
{
    Some(CompositeKey::new(parameter.as_ref()))
}

fn is_live<T: ?Sized>(part: &Weak<T>) -> bool {
    part.strong_count() > 0
}

fn combined_hash<T: ?Sized>(parts: &[Arc<T>]) -> usize {
    parts
        .iter()
        .fold(1_usize, |acc, part| acc.wrapping_mul(31).wrapping_add(identity_of(Arc::as_ptr(part))))
}

impl<T: ?Sized> PartialEq for CompositeKey<T> {
    fn eq(&self, other: &Self) -> bool {
        if self.identity_hash() != other.identity_hash() {
            return false;
        }
        match (self, other) {
            (Self::Zero, Self::Zero) => true,
            (Self::One { first: a, .. }, Self::One { first: b, .. }) => Weak::ptr_eq(a, b),
            (Self::Two { first: a1, second: a2, .. }, Self::Two { first: b1, second: b2, .. }) => {
                Weak::ptr_eq(a1, b1) && Weak::ptr_eq(a2, b2)
            }
            (Self::Many { parts: a, .. }, Self::Many { parts: b, .. }) => {
                a.len() == b.len() && a.iter().zip(b.iter()).all(|(a, b)| Weak::ptr_eq(a, b))
            }
            _ => false,
        }
    }
}

impl<T: ?Sized> Eq for CompositeKey<T> {}

impl<T: ?Sized> Hash for CompositeKey<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_usize(self.identity_hash());
    }
}

impl<T: ?Sized> Clone for CompositeKey<T> {
    fn clone(&self) -> Self {
        match self {
            Self::Zero => Self::Zero,
            Self::One { hash, first } => Self::One {
                hash: *hash,
                first: Weak::clone(first),
            },
            Self::Two { hash, first, second } => Self::Two {
                hash: *hash,
                first: Weak::clone(first),
                second: Weak::clone(second),
            },
            Self::Many { hash, parts } => Self::Many {
                hash: *hash,
                parts: Arc::clone(parts),
            },
        }
    }
}

impl<T: ?Sized> Debug for CompositeKey<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompositeKey")
            .field("arity", &self.arity())
            .field("live", &self.is_live())
            .finish()
    }
}
