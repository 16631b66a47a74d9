// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Removes cache entries whose primary key or value has been reclaimed.

use std::fmt::{self, Debug};
use std::hash::Hash;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{Receiver, Sender, channel};

use parking_lot::Mutex;

use crate::handle::KeyHandle;
use crate::reverse::ReverseIndex;
use crate::table::Table;
use crate::tracked::Tracked;

/// Fewest publications between two prunes of reclaimed values.
pub(crate) const PRUNE_FLOOR: usize = 64;

/// Whether a sweep also removes the slots and index entries of reclaimed values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Prune {
    /// Prune once enough values were published since the last prune to pay for the full walk.
    WhenDue,
    /// Prune on this pass.
    Now,
}

/// What one sweep removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct SweepReport {
    /// Primary keys whose buckets were expunged.
    pub(crate) expunged: usize,
    /// Ready slots of reclaimed values that were removed.
    pub(crate) pruned: usize,
}

/// Collects reclamation notices for primary keys and expunges their entries on demand.
///
/// Keys post their notice from whatever thread drops their last clone. The notices are only
/// acted upon when [`sweep()`](Self::sweep) is called, which the cache does before each lookup
/// and size query.
///
/// Values are not watched. Their slots and index entries are pruned by a full walk that runs
/// once the number of values published since the previous walk reaches the number of values
/// that survived it (at least [`PRUNE_FLOOR`]), so the walk costs amortized constant time per
/// publication.
pub(crate) struct Sweeper<K> {
    notices: Sender<KeyHandle<K>>,
    queue: Mutex<Receiver<KeyHandle<K>>>,
    limit: Option<usize>,
    // Watchers registered by this sweeper are discarded once it is dropped.
    alive: Arc<()>,
    published: AtomicUsize,
    prune_after: AtomicUsize,
}

impl<K> Sweeper<K> {
    /// Creates a sweeper that handles at most `limit` notices per pass, or all queued notices
    /// if `limit` is `None`.
    pub(crate) fn new(limit: Option<usize>) -> Self {
        let (notices, queue) = channel();
        Self {
            notices,
            queue: Mutex::new(queue),
            limit,
            alive: Arc::new(()),
            published: AtomicUsize::new(0),
            prune_after: AtomicUsize::new(PRUNE_FLOOR),
        }
    }

    /// Arranges for `handle` to be posted to this sweeper once `key` is reclaimed.
    pub(crate) fn watch(&self, key: &Tracked<K>, handle: &KeyHandle<K>)
    where
        K: Send + Sync + 'static,
    {
        let notices = self.notices.clone();
        let handle = handle.clone();
        key.watch(&self.alive, move || {
            // The cache may be gone already, in which case there is nothing left to clean up.
            let _ = notices.send(handle);
        });
    }

    /// Counts a value newly published by the cache towards the next prune.
    pub(crate) fn note_published(&self) {
        self.published.fetch_add(1, Ordering::Relaxed);
    }

    /// Expunges the entries of every reclaimed key queued so far and, if `prune` asks for it,
    /// the slots and index entries of reclaimed values.
    ///
    /// Never blocks: if another thread is already sweeping, this pass does nothing.
    pub(crate) fn sweep<S: Hash + Eq, V>(&self, table: &Table<K, S, V>, reverse: &ReverseIndex<V>, prune: Prune) -> SweepReport {
        let Some(queue) = self.queue.try_lock() else {
            return SweepReport::default();
        };

        let mut report = SweepReport::default();
        while self.limit.is_none_or(|limit| report.expunged < limit) {
            let Ok(handle) = queue.try_recv() else {
                break;
            };
            if let Some(sub_map) = table.expunge(handle) {
                for value in sub_map.ready_handles() {
                    reverse.remove(&value);
                }
            }
            report.expunged += 1;
        }

        let due = self.published.load(Ordering::Relaxed) >= self.prune_after.load(Ordering::Relaxed);
        if prune == Prune::Now || due {
            self.published.store(0, Ordering::Relaxed);
            report.pruned = table.remove_reclaimed_values();
            reverse.remove_reclaimed();
            self.prune_after.store(reverse.len().max(PRUNE_FLOOR), Ordering::Relaxed);
        }

        report
    }
}

impl<K> Debug for Sweeper<K> {
    #[cfg_attr(test, mutants::skip)] // Diagnostic output only.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Sweeper")
            .field("limit", &self.limit)
            .field("published", &self.published.load(Ordering::Relaxed))
            .field("prune_after", &self.prune_after.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handle::ValueHandle;
    use crate::slot::Slot;

    struct Fixture {
        sweeper: Sweeper<String>,
        table: Table<String, u8, u32>,
        reverse: ReverseIndex<u32>,
    }

    impl Fixture {
        fn new(limit: Option<usize>) -> Self {
            Self {
                sweeper: Sweeper::new(limit),
                table: Table::new(),
                reverse: ReverseIndex::new(),
            }
        }

        /// Stores a value at `(key, sub_key)` and returns it.
        fn populate(&self, key: &Tracked<String>, sub_key: u8) -> Arc<u32> {
            let sub_map = self.table.sub_map(Some(key), |key, handle| self.sweeper.watch(key, handle));
            let value = Arc::new(u32::from(sub_key));
            let handle = self.reverse.intern(ValueHandle::new(&value));
            sub_map.install(&sub_key, Slot::Ready(handle)).expect("empty coordinate");
            value
        }

        /// Stores a value that nothing else holds, as if a caller had received it and dropped it.
        fn publish_and_drop(&self, key: &Tracked<String>, sub_key: u8) {
            drop(self.populate(key, sub_key));
            self.sweeper.note_published();
        }

        fn sweep(&self) -> usize {
            self.sweeper.sweep(&self.table, &self.reverse, Prune::WhenDue).expunged
        }
    }

    #[test]
    fn nothing_to_do_while_keys_live() {
        let fixture = Fixture::new(None);
        let key = Tracked::new("loader".to_string());
        let _value = fixture.populate(&key, 1);

        assert_eq!(fixture.sweep(), 0);
        assert_eq!(fixture.table.len(), 1);
        assert_eq!(fixture.reverse.live_len(), 1);
    }

    #[test]
    fn reclaimed_key_is_expunged_with_its_values() {
        let fixture = Fixture::new(None);
        let key = Tracked::new("loader".to_string());
        let value = fixture.populate(&key, 1);

        drop(key);

        assert_eq!(fixture.sweep(), 1);
        assert_eq!(fixture.table.len(), 0);
        assert!(!fixture.reverse.contains(&value));
        assert_eq!(fixture.sweep(), 0);
    }

    #[test]
    fn limit_bounds_each_pass() {
        let fixture = Fixture::new(Some(2));
        let keys: Vec<_> = (0..5).map(|i| Tracked::new(format!("key-{i}"))).collect();
        let _values: Vec<_> = keys.iter().map(|key| fixture.populate(key, 1)).collect();

        drop(keys);

        assert_eq!(fixture.sweep(), 2);
        assert_eq!(fixture.sweep(), 2);
        assert_eq!(fixture.sweep(), 1);
        assert_eq!(fixture.table.len(), 0);
    }

    #[test]
    fn concurrent_sweep_does_not_block() {
        let fixture = Fixture::new(None);
        let key = Tracked::new("loader".to_string());
        let _value = fixture.populate(&key, 1);
        drop(key);

        let held = fixture.sweeper.queue.lock();
        assert_eq!(fixture.sweep(), 0);
        drop(held);

        assert_eq!(fixture.sweep(), 1);
    }

    #[test]
    fn prune_waits_until_due() {
        let fixture = Fixture::new(None);
        let key = Tracked::new("loader".to_string());
        for sub_key in 0..10 {
            fixture.publish_and_drop(&key, sub_key);
        }

        let report = fixture.sweeper.sweep(&fixture.table, &fixture.reverse, Prune::WhenDue);
        assert_eq!(report, SweepReport::default());
        assert_eq!(fixture.reverse.len(), 10);

        let report = fixture.sweeper.sweep(&fixture.table, &fixture.reverse, Prune::Now);
        assert_eq!(report.pruned, 10);
        assert_eq!(fixture.reverse.len(), 0);
        assert_eq!(fixture.table.slot_count(), 0);
    }

    #[test]
    fn prune_runs_once_enough_values_were_published() {
        let fixture = Fixture::new(None);
        let key = Tracked::new("loader".to_string());
        let sub_keys = u8::try_from(PRUNE_FLOOR).expect("floor fits a sub-key");
        for sub_key in 0..sub_keys {
            fixture.publish_and_drop(&key, sub_key);
        }

        let report = fixture.sweeper.sweep(&fixture.table, &fixture.reverse, Prune::WhenDue);

        assert_eq!(report.pruned, PRUNE_FLOOR);
        assert_eq!(fixture.reverse.len(), 0);
        assert_eq!(fixture.table.slot_count(), 0);
        assert_eq!(fixture.sweeper.published.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn prune_threshold_follows_surviving_values() {
        let fixture = Fixture::new(None);
        let key = Tracked::new("loader".to_string());
        let kept: Vec<_> = (0..100).map(|sub_key| fixture.populate(&key, sub_key)).collect();
        fixture.publish_and_drop(&key, 200);

        let _ = fixture.sweeper.sweep(&fixture.table, &fixture.reverse, Prune::Now);

        assert_eq!(fixture.sweeper.prune_after.load(Ordering::Relaxed), kept.len());
        assert_eq!(fixture.table.slot_count(), kept.len());
    }

    #[test]
    fn dropped_sweeper_leaves_no_watcher_behind() {
        let key = Tracked::new("loader".to_string());
        for _ in 0..100 {
            let fixture = Fixture::new(None);
            let _value = fixture.populate(&key, 1);
        }

        assert_eq!(Tracked::watcher_count(&key), 1);
    }

    #[test]
    fn notices_after_sweeper_is_gone_are_ignored() {
        let key = Tracked::new("loader".to_string());
        {
            let fixture = Fixture::new(None);
            let _value = fixture.populate(&key, 1);
        }
        drop(key);
    }
}
