//! Telemetry: per-cycle timings and outcome counters.
//!
//! The core reports into a [`TelemetrySink`]; exporters with wire formats
//! live outside this crate. [`MetricsRecorder`] keeps rolling in-memory
//! aggregates and can persist a JSON snapshot so long-running behavior
//! survives restarts of whatever scrapes it.

use std::collections::HashMap;
use std::path::PathBuf;

use serde::Serialize;

/// Samples kept per metric series.
const MAX_SAMPLES: usize = 100;

/// Receiver for cycle timings, counters and gauges.
pub trait TelemetrySink: Send {
    /// Record a duration observation in seconds.
    fn observe_duration(&mut self, metric: &str, seconds: f64, labels: &[(&str, &str)]);

    /// Increment a counter by one.
    fn increment(&mut self, counter: &str, labels: &[(&str, &str)]);

    /// Set a gauge to an absolute value.
    fn set_gauge(&mut self, gauge: &str, value: f64);

    /// Called once per cycle after all observations; sinks with persistence
    /// write their snapshot here.
    fn flush(&mut self) {}
}

/// Sink that forwards everything to `tracing` and keeps no state.
#[derive(Debug, Default)]
pub struct LogSink;

impl TelemetrySink for LogSink {
    fn observe_duration(&mut self, metric: &str, seconds: f64, labels: &[(&str, &str)]) {
        tracing::debug!(metric, seconds, ?labels, "duration");
    }

    fn increment(&mut self, counter: &str, labels: &[(&str, &str)]) {
        tracing::debug!(counter, ?labels, "increment");
    }

    fn set_gauge(&mut self, gauge: &str, value: f64) {
        tracing::debug!(gauge, value, "gauge");
    }
}

/// Point-in-time metrics summary, serialized for the snapshot file.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSummary {
    /// Mean of the retained samples per series
    pub average_seconds: HashMap<String, f64>,
    /// Retained sample counts per series
    pub sample_counts: HashMap<String, usize>,
    /// Counter totals
    pub counters: HashMap<String, u64>,
    /// Gauge values
    pub gauges: HashMap<String, f64>,
}

/// Rolling in-memory aggregates with optional JSON persistence.
#[derive(Debug, Default)]
pub struct MetricsRecorder {
    samples: HashMap<String, Vec<f64>>,
    counters: HashMap<String, u64>,
    gauges: HashMap<String, f64>,
    snapshot_path: Option<PathBuf>,
}

fn series_key(name: &str, labels: &[(&str, &str)]) -> String {
    if labels.is_empty() {
        return name.to_string();
    }
    let mut key = String::from(name);
    for (_, value) in labels {
        key.push('.');
        key.push_str(value);
    }
    key
}

impl MetricsRecorder {
    /// Create a recorder with no snapshot file.
    pub fn new() -> Self {
        Self::default()
    }

    /// Persist a JSON summary to `path` after every recorded cycle outcome.
    #[must_use]
    pub fn with_snapshot_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.snapshot_path = Some(path.into());
        self
    }

    /// Mean of the retained samples for a series, 0.0 when empty.
    pub fn average(&self, series: &str) -> f64 {
        match self.samples.get(series) {
            Some(samples) if !samples.is_empty() => {
                samples.iter().sum::<f64>() / samples.len() as f64
            }
            _ => 0.0,
        }
    }

    /// Current value of a counter.
    pub fn counter(&self, name: &str) -> u64 {
        self.counters.get(name).copied().unwrap_or(0)
    }

    /// Ratio of successful to attempted updates, 1.0 before any attempt.
    pub fn success_rate(&self) -> f64 {
        let attempts = self.counter("update_attempts");
        if attempts == 0 {
            return 1.0;
        }
        self.counter("update_success") as f64 / attempts as f64
    }

    /// Build the current summary.
    pub fn summary(&self) -> MetricsSummary {
        MetricsSummary {
            average_seconds: self
                .samples
                .keys()
                .map(|k| (k.clone(), self.average(k)))
                .collect(),
            sample_counts: self
                .samples
                .iter()
                .map(|(k, v)| (k.clone(), v.len()))
                .collect(),
            counters: self.counters.clone(),
            gauges: self.gauges.clone(),
        }
    }

    /// Write the JSON snapshot, if a path is configured.
    pub fn save_snapshot(&self) {
        let Some(path) = &self.snapshot_path else {
            return;
        };
        let summary = self.summary();
        let result = serde_json::to_string_pretty(&summary)
            .map_err(|e| e.to_string())
            .and_then(|json| {
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent).map_err(|e| e.to_string())?;
                }
                std::fs::write(path, json).map_err(|e| e.to_string())
            });
        if let Err(e) = result {
            tracing::warn!(path = %path.display(), error = %e, "failed to write metrics snapshot");
        }
    }
}

impl TelemetrySink for MetricsRecorder {
    fn observe_duration(&mut self, metric: &str, seconds: f64, labels: &[(&str, &str)]) {
        tracing::debug!(metric, seconds, ?labels, "duration");
        let series = self.samples.entry(series_key(metric, labels)).or_default();
        series.push(seconds);
        if series.len() > MAX_SAMPLES {
            let excess = series.len() - MAX_SAMPLES;
            series.drain(..excess);
        }
    }

    fn increment(&mut self, counter: &str, labels: &[(&str, &str)]) {
        let key = series_key(counter, labels);
        *self.counters.entry(key).or_insert(0) += 1;
    }

    fn set_gauge(&mut self, gauge: &str, value: f64) {
        self.gauges.insert(gauge.to_string(), value);
    }

    fn flush(&mut self) {
        self.save_snapshot();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_series_key_flattens_labels() {
        assert_eq!(series_key("render_seconds", &[]), "render_seconds");
        assert_eq!(
            series_key("render_seconds", &[("type", "session")]),
            "render_seconds.session"
        );
        assert_eq!(
            series_key("cycle_seconds", &[("status", "ok"), ("mode", "bw")]),
            "cycle_seconds.ok.bw"
        );
    }

    #[test]
    fn test_average_and_counters() {
        let mut recorder = MetricsRecorder::new();
        recorder.observe_duration("render_seconds", 1.0, &[("type", "session")]);
        recorder.observe_duration("render_seconds", 3.0, &[("type", "session")]);
        recorder.increment("update_attempts", &[]);
        recorder.increment("update_attempts", &[]);
        recorder.increment("update_success", &[]);
        recorder.set_gauge("schedule_offset_seconds", -0.25);

        assert_eq!(recorder.average("render_seconds.session"), 2.0);
        assert_eq!(recorder.counter("update_attempts"), 2);
        assert_eq!(recorder.success_rate(), 0.5);

        let summary = recorder.summary();
        assert_eq!(summary.gauges["schedule_offset_seconds"], -0.25);
        assert_eq!(summary.sample_counts["render_seconds.session"], 2);
    }

    #[test]
    fn test_samples_are_trimmed() {
        let mut recorder = MetricsRecorder::new();
        for i in 0..250 {
            recorder.observe_duration("cycle_seconds", f64::from(i), &[]);
        }
        let summary = recorder.summary();
        assert_eq!(summary.sample_counts["cycle_seconds"], MAX_SAMPLES);
        // Oldest samples dropped: mean of 150..=249
        assert_eq!(recorder.average("cycle_seconds"), 199.5);
    }

    #[test]
    fn test_snapshot_round_trip() {
        let path = std::env::temp_dir().join(format!(
            "paperdash-test-{}-metrics/metrics.json",
            std::process::id()
        ));
        let _ = std::fs::remove_file(&path);

        let mut recorder = MetricsRecorder::new().with_snapshot_path(&path);
        recorder.increment("update_attempts", &[]);
        recorder.save_snapshot();

        let raw = std::fs::read_to_string(&path).unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(value["counters"]["update_attempts"], 1);

        let _ = std::fs::remove_file(&path);
    }
}
