//! Prometheus metrics surface.
//!
//! Two vectors track check outcomes: a counter and a latency histogram, both
//! labeled by check name, status and the configured label allowlist. Result
//! labels outside the allowlist never become metric labels, so user labels
//! cannot widen cardinality. On check removal every series recorded for that
//! name is deleted.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts, Registry, TextEncoder,
};

use crate::healthcheck::CheckResult;

const DURATION_BUCKETS: &[f64] = &[
    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 0.75, 1.0, 2.5, 5.0, 7.5, 10.0,
];

#[derive(Debug, thiserror::Error)]
#[error("metrics setup failed: {0}")]
pub struct MetricsError(#[from] prometheus::Error);

pub struct Metrics {
    registry: Registry,
    check_total: IntCounterVec,
    check_duration: HistogramVec,
    exporter_sent: IntCounterVec,
    channel_full: IntCounter,
    /// Allowlisted label keys lifted from result labels to metric labels.
    allowlist: Vec<String>,
    /// Label-value tuples observed per check name, for series deletion.
    series: Mutex<HashMap<String, HashSet<Vec<String>>>>,
}

impl std::fmt::Debug for Metrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Metrics")
            .field("allowlist", &self.allowlist)
            .finish_non_exhaustive()
    }
}

impl Metrics {
    pub fn new(allowlist: &[String]) -> Result<Self, MetricsError> {
        let registry = Registry::new();
        let mut label_names: Vec<&str> = vec!["name", "status"];
        label_names.extend(allowlist.iter().map(String::as_str));
        let check_total = IntCounterVec::new(
            Opts::new("healthcheck_total", "Number of healthchecks executed"),
            &label_names,
        )?;
        let check_duration = HistogramVec::new(
            HistogramOpts::new(
                "healthcheck_duration_seconds",
                "Latency of the healthcheck attempts",
            )
            .buckets(DURATION_BUCKETS.to_vec()),
            &label_names,
        )?;
        let exporter_sent = IntCounterVec::new(
            Opts::new(
                "exporter_sent_total",
                "Number of results pushed to exporters",
            ),
            &["name", "status"],
        )?;
        let channel_full = IntCounter::new(
            "scheduler_channel_full_total",
            "Number of results that found the fan-out channel full",
        )?;
        registry.register(Box::new(check_total.clone()))?;
        registry.register(Box::new(check_duration.clone()))?;
        registry.register(Box::new(exporter_sent.clone()))?;
        registry.register(Box::new(channel_full.clone()))?;
        Ok(Metrics {
            registry,
            check_total,
            check_duration,
            exporter_sent,
            channel_full,
            allowlist: allowlist.to_vec(),
            series: Mutex::new(HashMap::new()),
        })
    }

    /// Record one finished attempt.
    pub fn observe(&self, result: &CheckResult) {
        let status = if result.success { "success" } else { "failure" };
        let mut values: Vec<String> = Vec::with_capacity(2 + self.allowlist.len());
        values.push(result.name.clone());
        values.push(status.to_string());
        for key in &self.allowlist {
            let value = result
                .labels
                .as_ref()
                .and_then(|labels| labels.get(key))
                .cloned()
                .unwrap_or_default();
            values.push(value);
        }
        let refs: Vec<&str> = values.iter().map(String::as_str).collect();
        self.check_total.with_label_values(&refs).inc();
        self.check_duration
            .with_label_values(&refs)
            .observe(result.duration as f64 / 1000.0);
        self.series
            .lock()
            .expect("metrics series lock poisoned")
            .entry(result.name.clone())
            .or_default()
            .insert(values);
    }

    /// Delete every series recorded for a check name, across both vectors.
    pub fn delete_check_series(&self, name: &str) {
        let tuples = self
            .series
            .lock()
            .expect("metrics series lock poisoned")
            .remove(name);
        if let Some(tuples) = tuples {
            for tuple in tuples {
                let refs: Vec<&str> = tuple.iter().map(String::as_str).collect();
                let _ = self.check_total.remove_label_values(&refs);
                let _ = self.check_duration.remove_label_values(&refs);
            }
        }
    }

    pub fn observe_exporter_push(&self, exporter: &str, success: bool) {
        let status = if success { "success" } else { "failure" };
        self.exporter_sent
            .with_label_values(&[exporter, status])
            .inc();
    }

    /// The fan-out channel was full when a result was produced.
    pub fn incr_channel_full(&self) {
        self.channel_full.inc();
    }

    /// Prometheus text exposition of every registered metric.
    pub fn export(&self) -> Result<String, MetricsError> {
        let mut buffer = Vec::new();
        let encoder = TextEncoder::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer)
            .map_err(|err| MetricsError(prometheus::Error::Msg(err.to_string())))
    }
}
