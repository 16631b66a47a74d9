// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::fmt::{self, Debug};
use std::hash::Hash;
use std::sync::Arc;

use crate::builder::WeakCacheBuilder;
use crate::error::{BoxError, Error, Result};
use crate::reverse::ReverseIndex;
use crate::slot::{Pending, Slot};
use crate::strategy::{SubKeyStrategy, ValueFactory, sub_key_strategy, value_factory};
use crate::sweeper::{Prune, Sweeper};
use crate::table::Table;
use crate::telemetry::{CacheActivity, CacheTelemetry};
use crate::tracked::Tracked;

/// A concurrent two-level cache that holds neither its keys nor its values strongly.
///
/// Entries live at a `(primary key, sub-key)` coordinate. The primary key is a [`Tracked`]
/// object (or `None`, which selects a shared sentinel bucket), and the sub-key is derived from
/// the primary key and a caller-supplied parameter by the sub-key strategy. Values are produced
/// by the value factory at most once per coordinate at a time, no matter how many threads ask
/// for them concurrently.
///
/// The cache keeps an entry only as long as something else keeps its parts alive:
///
/// - Once every clone of a primary key is dropped, the entries under it are expunged by the
///   next sweep. Sweeps run at the start of every [`get()`](Self::get), [`size()`](Self::size)
///   and [`contains_value()`](Self::contains_value).
/// - Once every `Arc` of a value is dropped, its coordinate is computed afresh on the next
///   request. The leftover slot is removed by a later sweep: lookups prune reclaimed values once
///   enough new values were published to pay for the walk, and [`sweep()`](Self::sweep) and
///   [`size()`](Self::size) prune them every time.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use weak_cache::{Tracked, WeakCache};
///
/// let cache = WeakCache::<&str, u32, u32, u32>::new(|_, p| Some(*p), |_, p| Ok::<_, std::io::Error>(Arc::new(p * 2)));
/// let loader = Tracked::new("system");
///
/// let first = cache.get(Some(&loader), &5)?;
/// let second = cache.get(Some(&loader), &5)?;
/// assert_eq!(*first, 10);
/// assert!(Arc::ptr_eq(&first, &second));
/// assert_eq!(cache.size(), 1);
///
/// drop(loader);
/// assert_eq!(cache.size(), 0);
/// # Ok::<(), weak_cache::Error>(())
/// ```
pub struct WeakCache<K, P, S, V> {
    telemetry: CacheTelemetry,
    sub_key: SubKeyStrategy<K, P, S>,
    factory: ValueFactory<K, P, V>,
    table: Table<K, S, V>,
    reverse: ReverseIndex<V>,
    sweeper: Sweeper<K>,
}

impl<K, P, S, V> WeakCache<K, P, S, V> {
    /// Creates a cache with default settings.
    ///
    /// `sub_key` derives the second-level key from the primary key and the parameter. It must
    /// be deterministic; returning `None` rejects the request. `factory` computes the value for
    /// a coordinate that holds none.
    #[must_use]
    pub fn new<SF, VF, E>(sub_key: SF, factory: VF) -> Self
    where
        S: Hash + Eq,
        SF: Fn(Option<&K>, &P) -> Option<S> + Send + Sync + 'static,
        VF: Fn(Option<&K>, &P) -> std::result::Result<Arc<V>, E> + Send + Sync + 'static,
        E: Into<BoxError>,
    {
        Self::builder(sub_key, factory).build()
    }

    /// Starts configuring a cache. See [`WeakCache::new`] for the meaning of the arguments.
    pub fn builder<SF, VF, E>(sub_key: SF, factory: VF) -> WeakCacheBuilder<K, P, S, V>
    where
        SF: Fn(Option<&K>, &P) -> Option<S> + Send + Sync + 'static,
        VF: Fn(Option<&K>, &P) -> std::result::Result<Arc<V>, E> + Send + Sync + 'static,
        E: Into<BoxError>,
    {
        WeakCacheBuilder::new(sub_key_strategy(sub_key), value_factory(factory))
    }

    pub(crate) fn from_builder(builder: WeakCacheBuilder<K, P, S, V>) -> Self
    where
        S: Hash + Eq,
    {
        Self {
            telemetry: CacheTelemetry::new(builder.name, builder.meter.as_ref()),
            sub_key: builder.sub_key,
            factory: builder.factory,
            table: Table::new(),
            reverse: ReverseIndex::new(),
            sweeper: Sweeper::new(builder.sweep_limit),
        }
    }

    /// Returns the name this cache reports in log events and metrics.
    #[must_use]
    pub fn name(&self) -> &str {
        self.telemetry.name()
    }
}

impl<K, P, S: Hash + Eq, V> WeakCache<K, P, S, V> {
    /// Expunges the entries of primary keys reclaimed since the last sweep, removes the slots of
    /// reclaimed values, and returns how many primary keys were expunged.
    ///
    /// Sweeping never blocks. If another thread is sweeping at the same time, this call returns
    /// 0 and leaves the work to that thread.
    pub fn sweep(&self) -> usize {
        self.sweep_with(Prune::Now)
    }

    fn sweep_with(&self, prune: Prune) -> usize {
        let report = self.sweeper.sweep(&self.table, &self.reverse, prune);
        if report.expunged > 0 {
            self.telemetry.record(CacheActivity::Expunged, Some(report.expunged));
        }
        if report.pruned > 0 {
            self.telemetry.record(CacheActivity::Pruned, Some(report.pruned));
        }
        report.expunged
    }

    /// Returns the number of live values in the cache.
    ///
    /// The count is an estimate: values whose last `Arc` is being dropped concurrently may or
    /// may not be counted.
    #[must_use]
    pub fn size(&self) -> usize {
        self.sweep();
        self.reverse.live_len()
    }

    /// Returns `true` if the cache holds no live values.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// Returns `true` if this exact value, compared by identity, is currently cached.
    #[must_use]
    pub fn contains_value(&self, value: &Arc<V>) -> bool {
        self.sweep_with(Prune::WhenDue);
        self.reverse.contains(value)
    }
}

impl<K, P, S, V> WeakCache<K, P, S, V>
where
    K: Send + Sync + 'static,
    S: Hash + Eq + Clone,
{
    /// Returns the value for `key` and `parameter`, computing it if the cache holds none.
    ///
    /// Concurrent calls that resolve to the same coordinate share one computation and all
    /// receive the same `Arc`. The cache only holds the value weakly, so callers keep it cached
    /// by keeping it alive.
    ///
    /// The value factory must not call `get` for the coordinate it is computing.
    ///
    /// # Errors
    ///
    /// Returns a usage error if the sub-key strategy rejects the request, and a computation
    /// error if the value factory fails. Neither is cached: a later call computes again.
    ///
    /// # Panics
    ///
    /// Panics if the value factory panics. The coordinate is left empty, so a later call
    /// computes again.
    pub fn get(&self, key: Option<&Tracked<K>>, parameter: &P) -> Result<Arc<V>> {
        self.sweep_with(Prune::WhenDue);

        let sub_map = self.table.sub_map(key, |key, handle| self.sweeper.watch(key, handle));
        let key_value = key.map(|key| &**key);

        let Some(sub_key) = (self.sub_key)(key_value, parameter) else {
            self.telemetry.record(CacheActivity::Rejected, None);
            return Err(Error::missing_sub_key());
        };

        let mut own_token: Option<Arc<Pending>> = None;
        let mut slot = sub_map.slot(&sub_key);

        loop {
            match slot.clone() {
                Some(Slot::Ready(handle)) => {
                    if let Some(value) = handle.upgrade() {
                        self.telemetry.record(CacheActivity::Hit, None);
                        return Ok(value);
                    }
                }
                Some(Slot::Pending(token)) => {
                    match token.run(&sub_map, &sub_key, &self.reverse, || (self.factory)(key_value, parameter)) {
                        Ok(Some(value)) => {
                            self.sweeper.note_published();
                            self.telemetry.record(CacheActivity::Computed, None);
                            return Ok(value);
                        }
                        Ok(None) => self.telemetry.record(CacheActivity::Retried, None),
                        Err(error) => {
                            self.telemetry.record(CacheActivity::Failed, None);
                            return Err(error);
                        }
                    }
                    slot = sub_map.slot(&sub_key);
                    continue;
                }
                None => {}
            }

            // The coordinate is empty or its value was reclaimed: try to claim it.
            let pending = Slot::Pending(Arc::clone(own_token.get_or_insert_with(Pending::new)));

            slot = match slot {
                None => match sub_map.install(&sub_key, pending.clone()) {
                    Ok(()) => Some(pending),
                    Err(winner) => Some(winner),
                },
                Some(stale) => {
                    if sub_map.replace(&sub_key, &stale, pending.clone()) {
                        if let Slot::Ready(handle) = &stale {
                            self.reverse.forget_reclaimed(handle);
                        }
                        Some(pending)
                    } else {
                        sub_map.slot(&sub_key)
                    }
                }
            };
        }
    }
}

impl<K, P, S: Hash + Eq, V> Debug for WeakCache<K, P, S, V> {
    #[cfg_attr(test, mutants::skip)] // Diagnostic output only.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakCache")
            .field("name", &self.name())
            .field("table", &self.table)
            .field("reverse", &self.reverse)
            .field("sweeper", &self.sweeper)
            .finish_non_exhaustive()
    }
}
