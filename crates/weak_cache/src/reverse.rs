// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::fmt::{self, Debug};
use std::sync::Arc;

use ahash::RandomState;
use dashmap::DashMap;

use crate::handle::ValueHandle;

/// The set of values currently published by the cache, held weakly.
///
/// Each distinct value is represented by one canonical handle. Slots store that canonical handle,
/// so an entry can still be removed by handle identity after its value is gone.
pub(crate) struct ReverseIndex<V> {
    values: DashMap<ValueHandle<V>, (), RandomState>,
}

impl<V> ReverseIndex<V> {
    pub(crate) fn new() -> Self {
        Self {
            values: DashMap::with_hasher(RandomState::new()),
        }
    }

    /// Adds `handle` and returns the canonical handle for its value.
    pub(crate) fn intern(&self, handle: ValueHandle<V>) -> ValueHandle<V> {
        self.values.entry(handle).or_insert(()).key().clone()
    }

    pub(crate) fn remove(&self, handle: &ValueHandle<V>) -> bool {
        self.values.remove(handle).is_some()
    }

    /// Removes `handle` if its value has been reclaimed.
    pub(crate) fn forget_reclaimed(&self, handle: &ValueHandle<V>) -> bool {
        self.values.remove_if(handle, |handle, ()| !handle.is_live()).is_some()
    }

    pub(crate) fn contains(&self, value: &Arc<V>) -> bool {
        self.values.contains_key(&ValueHandle::new(value))
    }

    /// Drops entries for reclaimed values and returns how many were dropped.
    pub(crate) fn remove_reclaimed(&self) -> usize {
        let mut removed = 0;
        self.values.retain(|handle, ()| {
            let live = handle.is_live();
            if !live {
                removed += 1;
            }
            live
        });
        removed
    }

    /// Drops entries for reclaimed values and returns how many live values remain.
    pub(crate) fn live_len(&self) -> usize {
        self.remove_reclaimed();
        self.values.len()
    }

    /// Returns the number of entries, live or not.
    pub(crate) fn len(&self) -> usize {
        self.values.len()
    }
}

impl<V> Debug for ReverseIndex<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReverseIndex").field("entries", &self.len()).finish()
    }
}
