// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Structured log events and metrics for cache activity.
//!
//! Every event is emitted through [`tracing`] with the message `cache.event` and the fields
//! `cache.name`, `cache.activity` and, where a count applies, `cache.entries`. When a meter is
//! configured, every event also increments the `cache.event.count` counter with the
//! `cache.name` and `cache.activity` attributes.

use std::borrow::Cow;

use opentelemetry::metrics::{Counter, Meter, MeterProvider};
use opentelemetry::{InstrumentationScope, KeyValue};

const METER_NAME: &str = "weak_cache";
const VERSION: &str = "v0.1.0";
const SCHEMA_URL: &str = "https://opentelemetry.io/schemas/1.47.0";
const CACHE_EVENT_COUNT_NAME: &str = "cache.event.count";

pub(crate) const CACHE_NAME: &str = "cache.name";
pub(crate) const CACHE_ACTIVITY_NAME: &str = "cache.activity";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CacheActivity {
    /// A live value was found.
    Hit,
    /// The value factory produced a new value.
    Computed,
    /// A lookup lost a race and re-read its slot.
    Retried,
    /// The value factory failed.
    Failed,
    /// The sub-key strategy rejected the request.
    Rejected,
    /// Entries of reclaimed primary keys were removed.
    Expunged,
    /// Slots and index entries of reclaimed values were removed.
    Pruned,
}

impl CacheActivity {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            Self::Hit => "cache.hit",
            Self::Computed => "cache.computed",
            Self::Retried => "cache.retried",
            Self::Failed => "cache.failed",
            Self::Rejected => "cache.rejected",
            Self::Expunged => "cache.expunged",
            Self::Pruned => "cache.pruned",
        }
    }
}

pub(crate) fn create_meter(meter_provider: &dyn MeterProvider) -> Meter {
    meter_provider.meter_with_scope(
        InstrumentationScope::builder(METER_NAME)
            .with_version(VERSION)
            .with_schema_url(SCHEMA_URL)
            .build(),
    )
}

fn create_event_counter(meter: &Meter) -> Counter<u64> {
    meter
        .u64_counter(CACHE_EVENT_COUNT_NAME)
        .with_description("Cache events")
        .with_unit("{event}")
        .build()
}

/// Reports the activity of one cache to the log and, if configured, to a meter.
#[derive(Clone, Debug)]
pub(crate) struct CacheTelemetry {
    name: Cow<'static, str>,
    name_attribute: KeyValue,
    event_counter: Option<Counter<u64>>,
}

impl CacheTelemetry {
    pub(crate) fn new(name: Cow<'static, str>, meter: Option<&Meter>) -> Self {
        Self {
            name_attribute: KeyValue::new(CACHE_NAME, name.to_string()),
            name,
            event_counter: meter.map(create_event_counter),
        }
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    /// Records one occurrence of `activity`; `entries` is the number of entries it affected.
    pub(crate) fn record(&self, activity: CacheActivity, entries: Option<usize>) {
        if let Some(counter) = &self.event_counter {
            counter.add(
                1,
                &[
                    self.name_attribute.clone(),
                    KeyValue::new(CACHE_ACTIVITY_NAME, activity.as_str()),
                ],
            );
        }

        emit(&self.name, activity, entries);
    }
}

fn emit(cache_name: &str, activity: CacheActivity, entries: Option<usize>) {
    let activity_name = activity.as_str();

    // Tracing levels must be constant, so the level is selected through a macro.
    macro_rules! emit_event {
        ($level:ident) => {
            tracing::$level!(
                cache.name = cache_name,
                cache.activity = activity_name,
                cache.entries = ?entries,
                "cache.event"
            )
        };
    }

    match activity {
        CacheActivity::Failed => emit_event!(error),
        CacheActivity::Rejected => emit_event!(warn),
        CacheActivity::Hit | CacheActivity::Computed | CacheActivity::Expunged | CacheActivity::Pruned => emit_event!(debug),
        CacheActivity::Retried => emit_event!(trace),
    }
}
