// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Captures cache log events and metrics for assertions in tests.

use std::io::Write;
use std::sync::Arc;

use opentelemetry::KeyValue;
use opentelemetry_sdk::metrics::data::{AggregatedMetrics, MetricData, ResourceMetrics, ScopeMetrics};
use opentelemetry_sdk::metrics::{InMemoryMetricExporter, SdkMeterProvider};
use parking_lot::Mutex;
use tracing::subscriber::DefaultGuard;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::layer::SubscriberExt;

/// Collects the formatted output of every event logged on the current thread while installed.
#[derive(Debug, Clone, Default)]
pub(crate) struct LogCapture {
    lines: Arc<Mutex<Vec<u8>>>,
}

impl LogCapture {
    /// Starts capturing on the current thread until the returned guard is dropped.
    pub fn install() -> (Self, DefaultGuard) {
        let capture = Self::default();
        let subscriber =
            tracing_subscriber::registry().with(tracing_subscriber::fmt::layer().with_writer(capture.clone()).with_ansi(false));
        let guard = tracing::subscriber::set_default(subscriber);
        (capture, guard)
    }

    /// Returns everything logged so far.
    pub fn output(&self) -> String {
        String::from_utf8_lossy(&self.lines.lock()).into_owned()
    }

    /// Asserts that `expected` appears anywhere in the output.
    pub fn assert_contains(&self, expected: &str) {
        let output = self.output();
        assert!(output.contains(expected), "log output does not contain '{expected}', got:\n{output}");
    }

    /// Asserts that an event for `activity` (for example `cache.hit`) was logged at `level`.
    pub fn assert_activity(&self, level: &str, activity: &str) {
        let output = self.output();
        let needle = format!("cache.activity=\"{activity}\"");
        assert!(
            output.lines().any(|line| line.contains(level) && line.contains(&needle)),
            "no {level} event for {activity}, got:\n{output}"
        );
    }
}

impl<'a> MakeWriter<'a> for LogCapture {
    type Writer = Self;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

impl Write for LogCapture {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.lines.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// Exports the metrics of a meter provider to memory for assertions.
#[derive(Debug)]
pub(crate) struct MetricTester {
    exporter: InMemoryMetricExporter,
    provider: SdkMeterProvider,
}

impl Default for MetricTester {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricTester {
    pub fn new() -> Self {
        let exporter = InMemoryMetricExporter::default();
        Self {
            provider: SdkMeterProvider::builder().with_periodic_exporter(exporter.clone()).build(),
            exporter,
        }
    }

    pub fn meter_provider(&self) -> &SdkMeterProvider {
        &self.provider
    }

    /// Asserts that every one of `expected` is attached to some exported data point.
    pub fn assert_attributes_contain(&self, expected: &[KeyValue]) {
        let attributes: Vec<KeyValue> = self
            .export()
            .iter()
            .flat_map(ResourceMetrics::scope_metrics)
            .flat_map(ScopeMetrics::metrics)
            .flat_map(|metric| match metric.data() {
                AggregatedMetrics::U64(MetricData::Sum(sum)) => {
                    sum.data_points().flat_map(|point| point.attributes().cloned()).collect()
                }
                _ => Vec::new(),
            })
            .collect();

        for attribute in expected {
            assert!(attributes.contains(attribute), "{attribute:?} not found in {attributes:?}");
        }
    }

    /// Returns the current value of the event counter for `activity`.
    pub fn event_count(&self, activity: &str) -> u64 {
        let expected = KeyValue::new(crate::telemetry::CACHE_ACTIVITY_NAME, activity.to_string());
        let exported = self.export();

        // The counter is cumulative, so the latest export holds the totals.
        exported
            .last()
            .into_iter()
            .flat_map(ResourceMetrics::scope_metrics)
            .flat_map(ScopeMetrics::metrics)
            .filter_map(|metric| match metric.data() {
                AggregatedMetrics::U64(MetricData::Sum(sum)) => Some(
                    sum.data_points()
                        .filter(|point| point.attributes().any(|attribute| *attribute == expected))
                        .map(|point| point.value())
                        .sum::<u64>(),
                ),
                _ => None,
            })
            .sum()
    }

    fn export(&self) -> Vec<ResourceMetrics> {
        self.provider.force_flush().expect("metrics flush");
        self.exporter.get_finished_metrics().expect("exported metrics")
    }
}
