// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Configuration for [`WeakCache`].

use std::borrow::Cow;
use std::fmt::{self, Debug};
use std::hash::Hash;

use opentelemetry::metrics::{Meter, MeterProvider};

use crate::WeakCache;
use crate::strategy::{SubKeyStrategy, ValueFactory};
use crate::telemetry::create_meter;

pub(crate) const DEFAULT_NAME: &str = "weak_cache";

/// Builder for configuring a [`WeakCache`].
///
/// Created by [`WeakCache::builder()`].
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use weak_cache::{Tracked, WeakCache};
///
/// let cache = WeakCache::<String, u32, u32, String>::builder(
///     |_, id| Some(*id),
///     |owner, id| Ok::<_, std::io::Error>(Arc::new(format!("{}#{id}", owner.map_or("-", String::as_str)))),
/// )
/// .name("descriptors")
/// .sweep_limit(128)
/// .build();
///
/// let owner = Tracked::new("core".to_string());
/// assert_eq!(*cache.get(Some(&owner), &3)?, "core#3");
/// assert_eq!(cache.name(), "descriptors");
/// # Ok::<(), weak_cache::Error>(())
/// ```
pub struct WeakCacheBuilder<K, P, S, V> {
    pub(crate) name: Cow<'static, str>,
    pub(crate) sweep_limit: Option<usize>,
    pub(crate) meter: Option<Meter>,
    pub(crate) sub_key: SubKeyStrategy<K, P, S>,
    pub(crate) factory: ValueFactory<K, P, V>,
}

impl<K, P, S, V> WeakCacheBuilder<K, P, S, V> {
    pub(crate) fn new(sub_key: SubKeyStrategy<K, P, S>, factory: ValueFactory<K, P, V>) -> Self {
        Self {
            name: Cow::Borrowed(DEFAULT_NAME),
            sweep_limit: None,
            meter: None,
            sub_key,
            factory,
        }
    }

    /// Sets the name that identifies this cache in log events.
    ///
    /// Defaults to `"weak_cache"`.
    #[must_use]
    pub fn name(mut self, name: impl Into<Cow<'static, str>>) -> Self {
        self.name = name.into();
        self
    }

    /// Limits how many reclaimed primary keys a single sweep expunges.
    ///
    /// Every lookup starts with a sweep, so this bounds the extra work a lookup can pick up after
    /// many primary keys were dropped at once. Remaining keys are expunged by later sweeps.
    /// By default a sweep handles everything queued at the time it starts.
    ///
    /// # Panics
    ///
    /// Panics if `limit` is 0.
    #[must_use]
    pub fn sweep_limit(mut self, limit: usize) -> Self {
        assert!(limit > 0, "sweep_limit must be at least 1");
        self.sweep_limit = Some(limit);
        self
    }

    /// Counts cache events with a `cache.event.count` counter created from `provider`.
    ///
    /// Each event carries the `cache.name` and `cache.activity` attributes, with the same
    /// activity names as the log events. Without this call no metrics are recorded.
    #[must_use]
    pub fn metrics(mut self, provider: &dyn MeterProvider) -> Self {
        self.meter = Some(create_meter(provider));
        self
    }

    /// Builds the cache.
    #[must_use]
    pub fn build(self) -> WeakCache<K, P, S, V>
    where
        S: Hash + Eq,
    {
        WeakCache::from_builder(self)
    }
}

impl<K, P, S, V> Debug for WeakCacheBuilder<K, P, S, V> {
    #[cfg_attr(test, mutants::skip)] // Diagnostic output only.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakCacheBuilder")
            .field("name", &self.name)
            .field("sweep_limit", &self.sweep_limit)
            .field("metrics", &self.meter.is_some())
            .finish_non_exhaustive()
    }
}
