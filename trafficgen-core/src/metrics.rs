//! Metrics collection for simulation components
//!
//! Components record counters, gauges and histograms through [`SimulationMetrics`].
//! Every value is forwarded to the `metrics` crate facade, labelled with the
//! component name, so an installed recorder sees it. A local aggregate is kept as
//! well, which is what components read their typed stats views from.

use metrics::{counter, gauge, histogram};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::time::Duration;

/// Running summary of the values recorded into one histogram.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HistogramSummary {
    pub count: u64,
    pub sum: f64,
    pub min: f64,
    pub max: f64,
}

impl HistogramSummary {
    fn new(value: f64) -> Self {
        Self {
            count: 1,
            sum: value,
            min: value,
            max: value,
        }
    }

    fn record(&mut self, value: f64) {
        self.count += 1;
        self.sum += value;
        self.min = self.min.min(value);
        self.max = self.max.max(value);
    }

    pub fn mean(&self) -> f64 {
        self.sum / self.count as f64
    }
}

type MetricKey = (String, String);

fn metric_key(name: &str, component: &str) -> MetricKey {
    (name.to_string(), component.to_string())
}

/// Per-component metrics store that also feeds the global `metrics` recorder.
#[derive(Debug, Default, Clone)]
pub struct SimulationMetrics {
    counters: HashMap<MetricKey, u64>,
    gauges: HashMap<MetricKey, f64>,
    histograms: HashMap<MetricKey, HistogramSummary>,
}

impl SimulationMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a counter increment
    pub fn increment_counter(&mut self, name: &str, component: &str) {
        self.increment_counter_by(name, component, 1);
    }

    /// Record a counter increment with a specific value
    pub fn increment_counter_by(&mut self, name: &str, component: &str, value: u64) {
        counter!(name.to_string(), "component" => component.to_string()).increment(value);
        *self.counters.entry(metric_key(name, component)).or_default() += value;
    }

    /// Record a gauge value
    pub fn record_gauge(&mut self, name: &str, component: &str, value: f64) {
        gauge!(name.to_string(), "component" => component.to_string()).set(value);
        self.gauges.insert(metric_key(name, component), value);
    }

    /// Record a histogram value (latencies, sizes and the like)
    pub fn record_histogram(&mut self, name: &str, component: &str, value: f64) {
        histogram!(name.to_string(), "component" => component.to_string()).record(value);
        self.histograms
            .entry(metric_key(name, component))
            .and_modify(|h| h.record(value))
            .or_insert_with(|| HistogramSummary::new(value));
    }

    /// Record a duration as a histogram in milliseconds
    pub fn record_duration(&mut self, name: &str, component: &str, duration: Duration) {
        self.record_histogram(name, component, duration.as_secs_f64() * 1000.0);
    }

    /// Current counter value; zero when nothing was recorded.
    pub fn counter(&self, name: &str, component: &str) -> u64 {
        self.counters.get(&metric_key(name, component)).copied().unwrap_or(0)
    }

    pub fn gauge(&self, name: &str, component: &str) -> Option<f64> {
        self.gauges.get(&metric_key(name, component)).copied()
    }

    pub fn histogram(&self, name: &str, component: &str) -> Option<HistogramSummary> {
        self.histograms.get(&metric_key(name, component)).copied()
    }

    /// Sum of a millisecond histogram fed by [`Self::record_duration`].
    pub fn total_duration(&self, name: &str, component: &str) -> Duration {
        self.histogram(name, component)
            .map_or(Duration::ZERO, |h| Duration::from_secs_f64(h.sum.max(0.0) / 1000.0))
    }

    pub fn clear(&mut self) {
        self.counters.clear();
        self.gauges.clear();
        self.histograms.clear();
    }

    pub fn summary(&self) -> MetricsSummary {
        let components: HashSet<&str> = self
            .counters
            .keys()
            .chain(self.gauges.keys())
            .chain(self.histograms.keys())
            .map(|(_, component)| component.as_str())
            .collect();
        MetricsSummary {
            total_metrics: self.counters.len() + self.gauges.len() + self.histograms.len(),
            total_counters: self.counters.len(),
            total_gauges: self.gauges.len(),
            total_histograms: self.histograms.len(),
            components: components.len(),
        }
    }
}

/// Summary statistics for recorded metrics
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct MetricsSummary {
    pub total_metrics: usize,
    pub total_counters: usize,
    pub total_gauges: usize,
    pub total_histograms: usize,
    pub components: usize,
}

impl fmt::Display for MetricsSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Metrics Summary: {} total ({} counters, {} gauges, {} histograms) from {} components",
            self.total_metrics, self.total_counters, self.total_gauges, self.total_histograms, self.components
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_accumulate_per_component() {
        let mut metrics = SimulationMetrics::new();
        metrics.increment_counter("requests_sent", "browser-1");
        metrics.increment_counter("requests_sent", "browser-1");
        metrics.increment_counter("requests_sent", "browser-2");
        metrics.increment_counter_by("bytes_received", "browser-1", 1024);

        assert_eq!(metrics.counter("requests_sent", "browser-1"), 2);
        assert_eq!(metrics.counter("requests_sent", "browser-2"), 1);
        assert_eq!(metrics.counter("bytes_received", "browser-1"), 1024);
        assert_eq!(metrics.counter("bytes_received", "browser-2"), 0);
    }

    #[test]
    fn test_gauge_keeps_last_value() {
        let mut metrics = SimulationMetrics::new();
        metrics.record_gauge("open_sessions", "server", 3.0);
        metrics.record_gauge("open_sessions", "server", 1.0);
        assert_eq!(metrics.gauge("open_sessions", "server"), Some(1.0));
        assert_eq!(metrics.gauge("open_sessions", "client"), None);
    }

    #[test]
    fn test_histogram_summary() {
        let mut metrics = SimulationMetrics::new();
        metrics.record_histogram("slice_size", "server", 40.0);
        metrics.record_histogram("slice_size", "server", 250.0);
        metrics.record_duration("total_object_delay", "browser", Duration::from_millis(250));
        metrics.record_duration("total_object_delay", "browser", Duration::from_millis(750));

        let sizes = metrics.histogram("slice_size", "server").unwrap();
        assert_eq!(sizes.count, 2);
        assert_eq!(sizes.min, 40.0);
        assert_eq!(sizes.max, 250.0);
        assert_eq!(sizes.mean(), 145.0);
        assert_eq!(metrics.total_duration("total_object_delay", "browser"), Duration::from_secs(1));
        assert_eq!(metrics.total_duration("total_object_delay", "viewer"), Duration::ZERO);
    }

    #[test]
    fn test_metrics_summary() {
        let mut metrics = SimulationMetrics::new();
        metrics.increment_counter("requests_sent", "client");
        metrics.record_gauge("open_sessions", "server", 10.0);
        metrics.record_histogram("object_delay_ms", "client", 50.0);

        let summary = metrics.summary();
        assert_eq!(summary.total_metrics, 3);
        assert_eq!(summary.total_counters, 1);
        assert_eq!(summary.total_gauges, 1);
        assert_eq!(summary.total_histograms, 1);
        assert_eq!(summary.components, 2);

        metrics.clear();
        assert_eq!(metrics.summary(), MetricsSummary::default());
    }

    #[test]
    fn test_values_reach_installed_recorder() {
        use metrics_util::debugging::{DebugValue, DebuggingRecorder};

        let recorder = DebuggingRecorder::new();
        let snapshotter = recorder.snapshotter();
        let mut store = SimulationMetrics::new();
        metrics::with_local_recorder(&recorder, || {
            store.increment_counter("requests_sent", "browser");
            store.increment_counter_by("bytes_received", "browser", 500);
        });

        let counters: HashMap<String, u64> = snapshotter
            .snapshot()
            .into_vec()
            .into_iter()
            .filter_map(|(key, _, _, value)| match value {
                DebugValue::Counter(v) => {
                    let key = key.key();
                    assert!(key.labels().any(|l| l.key() == "component" && l.value() == "browser"));
                    Some((key.name().to_string(), v))
                }
                _ => None,
            })
            .collect();
        assert_eq!(counters.get("requests_sent"), Some(&1));
        assert_eq!(counters.get("bytes_received"), Some(&500));
        assert_eq!(store.counter("bytes_received", "browser"), 500);
    }
}
