// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The two-level table: primary key handle to a map of sub-key slots.

use std::fmt::{self, Debug};
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use ahash::RandomState;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use crate::handle::{KeyHandle, ValueHandle};
use crate::slot::{Pending, Slot};
use crate::tracked::Tracked;

/// The slots stored under one primary key, by sub-key.
///
/// Every state change is a single atomic map operation: insert-if-absent, replace-if-unchanged or
/// remove-if-unchanged.
pub(crate) struct SubMap<S, V> {
    slots: DashMap<S, Slot<V>, RandomState>,
}

impl<S: Hash + Eq, V> SubMap<S, V> {
    pub(crate) fn new() -> Self {
        Self {
            slots: DashMap::with_hasher(RandomState::new()),
        }
    }

    pub(crate) fn slot(&self, sub_key: &S) -> Option<Slot<V>> {
        self.slots.get(sub_key).map(|slot| slot.value().clone())
    }

    /// Installs `slot` unless the coordinate is already occupied, in which case the occupant is
    /// returned instead.
    pub(crate) fn install(&self, sub_key: &S, slot: Slot<V>) -> Result<(), Slot<V>>
    where
        S: Clone,
    {
        match self.slots.entry(sub_key.clone()) {
            Entry::Occupied(occupied) => Err(occupied.get().clone()),
            Entry::Vacant(vacant) => {
                vacant.insert(slot);
                Ok(())
            }
        }
    }

    /// Replaces `expected` with `slot`, provided `expected` is still what the coordinate holds.
    pub(crate) fn replace(&self, sub_key: &S, expected: &Slot<V>, slot: Slot<V>) -> bool {
        match self.slots.get_mut(sub_key) {
            Some(mut current) if current.is_same(expected) => {
                *current = slot;
                true
            }
            _ => false,
        }
    }

    pub(crate) fn holds_token(&self, sub_key: &S, token: &Pending) -> bool {
        self.slots.get(sub_key).is_some_and(|slot| slot.is_token(token))
    }

    /// Replaces the pending `token` with the finished `slot`.
    pub(crate) fn complete(&self, sub_key: &S, token: &Pending, slot: Slot<V>) -> bool {
        match self.slots.get_mut(sub_key) {
            Some(mut current) if current.is_token(token) => {
                *current = slot;
                true
            }
            _ => false,
        }
    }

    /// Empties the coordinate if it still holds `token`.
    pub(crate) fn abandon(&self, sub_key: &S, token: &Pending) -> bool {
        self.slots.remove_if(sub_key, |_, slot| slot.is_token(token)).is_some()
    }

    pub(crate) fn ready_handles(&self) -> Vec<ValueHandle<V>> {
        self.slots
            .iter()
            .filter_map(|slot| match slot.value() {
                Slot::Ready(handle) => Some(handle.clone()),
                Slot::Pending(_) => None,
            })
            .collect()
    }

    /// Removes every ready slot whose value has been reclaimed and returns how many were removed.
    ///
    /// Each slot is checked and removed under its shard lock, so a slot another thread replaced
    /// in the meantime is left alone.
    pub(crate) fn remove_reclaimed(&self) -> usize {
        let mut removed = 0;
        self.slots.retain(|_, slot| match slot {
            Slot::Ready(handle) if !handle.is_live() => {
                removed += 1;
                false
            }
            _ => true,
        });
        removed
    }

    pub(crate) fn len(&self) -> usize {
        self.slots.len()
    }
}

impl<S: Hash + Eq, V> Debug for SubMap<S, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubMap").field("slots", &self.len()).finish()
    }
}

/// The first-level key. All requests without a primary key share the sentinel bucket.
enum Bucket<K> {
    Sentinel,
    Key(KeyHandle<K>),
}

impl<K> PartialEq for Bucket<K> {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Sentinel, Self::Sentinel) => true,
            (Self::Key(a), Self::Key(b)) => a == b,
            _ => false,
        }
    }
}

impl<K> Eq for Bucket<K> {}

impl<K> Hash for Bucket<K> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match self {
            Self::Sentinel => state.write_u8(0),
            Self::Key(handle) => handle.hash(state),
        }
    }
}

/// Maps each live primary key, through a weak handle, to its [`SubMap`].
pub(crate) struct Table<K, S, V> {
    buckets: DashMap<Bucket<K>, Arc<SubMap<S, V>>, RandomState>,
}

impl<K, S: Hash + Eq, V> Table<K, S, V> {
    pub(crate) fn new() -> Self {
        Self {
            buckets: DashMap::with_hasher(RandomState::new()),
        }
    }

    /// Returns the sub-map for `key`, creating it if needed.
    ///
    /// `on_new_key` runs exactly once per primary key, for the handle that ends up stored, while
    /// the insertion is still exclusive.
    pub(crate) fn sub_map(&self, key: Option<&Tracked<K>>, on_new_key: impl FnOnce(&Tracked<K>, &KeyHandle<K>)) -> Arc<SubMap<S, V>> {
        let bucket = key.map_or(Bucket::Sentinel, |key| Bucket::Key(KeyHandle::new(key)));

        if let Some(existing) = self.buckets.get(&bucket) {
            return Arc::clone(existing.value());
        }

        match self.buckets.entry(bucket) {
            Entry::Occupied(occupied) => Arc::clone(occupied.get()),
            Entry::Vacant(vacant) => {
                if let (Some(key), Bucket::Key(handle)) = (key, vacant.key()) {
                    on_new_key(key, handle);
                }
                let sub_map = Arc::new(SubMap::new());
                vacant.insert(Arc::clone(&sub_map));
                sub_map
            }
        }
    }

    /// Removes and returns everything stored under the (dead) primary key `handle`.
    pub(crate) fn expunge(&self, handle: KeyHandle<K>) -> Option<Arc<SubMap<S, V>>> {
        self.buckets.remove(&Bucket::Key(handle)).map(|(_, sub_map)| sub_map)
    }

    /// Removes the ready slots of reclaimed values from every bucket and returns how many were
    /// removed.
    pub(crate) fn remove_reclaimed_values(&self) -> usize {
        // Collected first so no bucket shard stays locked while the sub-maps are walked.
        let sub_maps: Vec<_> = self.buckets.iter().map(|bucket| Arc::clone(bucket.value())).collect();
        sub_maps.iter().map(|sub_map| sub_map.remove_reclaimed()).sum()
    }

    /// Returns the number of slots across all buckets.
    #[cfg(test)]
    pub(crate) fn slot_count(&self) -> usize {
        self.buckets.iter().map(|bucket| bucket.value().len()).sum()
    }

    /// Returns the number of primary keys, including the sentinel, with a bucket.
    pub(crate) fn len(&self) -> usize {
        self.buckets.len()
    }
}

impl<K, S: Hash + Eq, V> Debug for Table<K, S, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Table").field("buckets", &self.len()).finish()
    }
}
