//! Agent Metrics
//!
//! In-memory counters and latency histograms for the scoring pipeline,
//! exportable as Prometheus text or JSON. These aggregate the same timing
//! samples the audit sink persists, for operators who scrape instead of
//! tailing logs.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::decision::Verdict;

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct MetricsConfig {
    /// Enable metrics collection
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Enable latency histograms
    #[serde(default = "default_true")]
    pub latency_histograms: bool,
    /// Histogram bucket boundaries (ms)
    #[serde(default = "default_buckets")]
    pub histogram_buckets: Vec<f64>,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            latency_histograms: true,
            histogram_buckets: default_buckets(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_buckets() -> Vec<f64> {
    vec![0.5, 1.0, 2.5, 5.0, 10.0, 25.0, 50.0, 100.0, 250.0]
}

/// Metrics collector for the scoring agent.
pub struct AgentMetrics {
    config: MetricsConfig,

    requests_total: AtomicU64,
    requests_blocked: AtomicU64,
    requests_allowed: AtomicU64,

    // detector failures that reached the decision engine
    network_errors: AtomicU64,
    content_errors: AtomicU64,

    decisions_by_reason: RwLock<HashMap<String, u64>>,
    latency_histogram: RwLock<Histogram>,

    start_time: Instant,
}

impl AgentMetrics {
    pub fn new(config: MetricsConfig) -> Self {
        let buckets = config.histogram_buckets.clone();
        Self {
            config,
            requests_total: AtomicU64::new(0),
            requests_blocked: AtomicU64::new(0),
            requests_allowed: AtomicU64::new(0),
            network_errors: AtomicU64::new(0),
            content_errors: AtomicU64::new(0),
            decisions_by_reason: RwLock::new(HashMap::new()),
            latency_histogram: RwLock::new(Histogram::new(buckets)),
            start_time: Instant::now(),
        }
    }

    /// Record one finished evaluation.
    pub fn record_verdict(&self, verdict: &Verdict) {
        if !self.config.enabled {
            return;
        }

        self.requests_total.fetch_add(1, Ordering::Relaxed);
        if verdict.blocked {
            self.requests_blocked.fetch_add(1, Ordering::Relaxed);
        } else {
            self.requests_allowed.fetch_add(1, Ordering::Relaxed);
        }

        if verdict.network_score.is_none() {
            self.network_errors.fetch_add(1, Ordering::Relaxed);
        }
        if verdict.content_score.is_none() {
            self.content_errors.fetch_add(1, Ordering::Relaxed);
        }

        {
            let mut by_reason = self.decisions_by_reason.write();
            *by_reason.entry(verdict.reason.to_string()).or_insert(0) += 1;
        }

        if self.config.latency_histograms {
            let ms = verdict.total_latency.as_secs_f64() * 1000.0;
            self.latency_histogram.write().observe(ms);
        }
    }

    pub fn uptime_secs(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    /// Export in Prometheus text format.
    pub fn prometheus(&self) -> String {
        let mut out = String::new();

        out.push_str("# HELP waf_ml_requests_total Requests evaluated\n");
        out.push_str("# TYPE waf_ml_requests_total counter\n");
        out.push_str(&format!(
            "waf_ml_requests_total {}\n",
            self.requests_total.load(Ordering::Relaxed)
        ));

        out.push_str("# HELP waf_ml_requests_blocked Requests blocked\n");
        out.push_str("# TYPE waf_ml_requests_blocked counter\n");
        out.push_str(&format!(
            "waf_ml_requests_blocked {}\n",
            self.requests_blocked.load(Ordering::Relaxed)
        ));

        out.push_str("# HELP waf_ml_requests_allowed Requests allowed\n");
        out.push_str("# TYPE waf_ml_requests_allowed counter\n");
        out.push_str(&format!(
            "waf_ml_requests_allowed {}\n",
            self.requests_allowed.load(Ordering::Relaxed)
        ));

        out.push_str("# HELP waf_ml_detector_errors Detector failures by detector\n");
        out.push_str("# TYPE waf_ml_detector_errors counter\n");
        out.push_str(&format!(
            "waf_ml_detector_errors{{detector=\"network\"}} {}\n",
            self.network_errors.load(Ordering::Relaxed)
        ));
        out.push_str(&format!(
            "waf_ml_detector_errors{{detector=\"content\"}} {}\n",
            self.content_errors.load(Ordering::Relaxed)
        ));

        out.push_str("# HELP waf_ml_decisions_by_reason Decisions by reason code\n");
        out.push_str("# TYPE waf_ml_decisions_by_reason counter\n");
        for (reason, count) in self.decisions_by_reason.read().iter() {
            out.push_str(&format!(
                "waf_ml_decisions_by_reason{{reason=\"{}\"}} {}\n",
                reason, count
            ));
        }

        if self.config.latency_histograms {
            out.push_str("# HELP waf_ml_latency_ms Evaluation latency in milliseconds\n");
            out.push_str("# TYPE waf_ml_latency_ms histogram\n");
            let histogram = self.latency_histogram.read();
            for (bound, count) in histogram.buckets() {
                out.push_str(&format!(
                    "waf_ml_latency_ms_bucket{{le=\"{}\"}} {}\n",
                    bound, count
                ));
            }
            out.push_str(&format!(
                "waf_ml_latency_ms_bucket{{le=\"+Inf\"}} {}\n",
                histogram.count()
            ));
            out.push_str(&format!("waf_ml_latency_ms_sum {}\n", histogram.sum()));
            out.push_str(&format!("waf_ml_latency_ms_count {}\n", histogram.count()));
        }

        out.push_str("# HELP waf_ml_uptime_seconds Seconds since the agent started\n");
        out.push_str("# TYPE waf_ml_uptime_seconds gauge\n");
        out.push_str(&format!("waf_ml_uptime_seconds {}\n", self.uptime_secs()));

        out
    }

    /// Export as JSON.
    pub fn json(&self) -> serde_json::Value {
        let histogram = self.latency_histogram.read();
        let by_reason = self.decisions_by_reason.read();

        serde_json::json!({
            "requests": {
                "total": self.requests_total.load(Ordering::Relaxed),
                "blocked": self.requests_blocked.load(Ordering::Relaxed),
                "allowed": self.requests_allowed.load(Ordering::Relaxed),
            },
            "detector_errors": {
                "network": self.network_errors.load(Ordering::Relaxed),
                "content": self.content_errors.load(Ordering::Relaxed),
            },
            "decisions_by_reason": by_reason.clone(),
            "latency": {
                "p50_ms": histogram.percentile(50.0),
                "p99_ms": histogram.percentile(99.0),
                "mean_ms": histogram.mean(),
                "count": histogram.count(),
            },
            "uptime_seconds": self.uptime_secs(),
        })
    }

    /// Snapshot of the headline numbers.
    pub fn summary(&self) -> MetricsSummary {
        let histogram = self.latency_histogram.read();

        MetricsSummary {
            requests_total: self.requests_total.load(Ordering::Relaxed),
            requests_blocked: self.requests_blocked.load(Ordering::Relaxed),
            requests_allowed: self.requests_allowed.load(Ordering::Relaxed),
            detector_errors: self.network_errors.load(Ordering::Relaxed)
                + self.content_errors.load(Ordering::Relaxed),
            latency_p50_ms: histogram.percentile(50.0),
            latency_p99_ms: histogram.percentile(99.0),
            uptime_secs: self.uptime_secs(),
        }
    }
}

impl Default for AgentMetrics {
    fn default() -> Self {
        Self::new(MetricsConfig::default())
    }
}

/// Headline metrics snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSummary {
    pub requests_total: u64,
    pub requests_blocked: u64,
    pub requests_allowed: u64,
    pub detector_errors: u64,
    pub latency_p50_ms: f64,
    pub latency_p99_ms: f64,
    pub uptime_secs: u64,
}

/// Simple histogram with bounded percentile memory.
struct Histogram {
    buckets: Vec<(f64, u64)>,
    sum: f64,
    count: u64,
    values: Vec<f64>,
}

impl Histogram {
    fn new(bounds: Vec<f64>) -> Self {
        Self {
            buckets: bounds.into_iter().map(|b| (b, 0u64)).collect(),
            sum: 0.0,
            count: 0,
            values: Vec::new(),
        }
    }

    fn observe(&mut self, value: f64) {
        self.sum += value;
        self.count += 1;
        self.values.push(value);

        if self.values.len() > 10_000 {
            self.values.remove(0);
        }

        for (bound, count) in &mut self.buckets {
            if value <= *bound {
                *count += 1;
            }
        }
    }

    fn buckets(&self) -> impl Iterator<Item = (f64, u64)> + '_ {
        self.buckets.iter().copied()
    }

    fn sum(&self) -> f64 {
        self.sum
    }

    fn count(&self) -> u64 {
        self.count
    }

    fn mean(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.sum / self.count as f64
        }
    }

    fn percentile(&self, p: f64) -> f64 {
        if self.values.is_empty() {
            return 0.0;
        }

        let mut sorted = self.values.clone();
        sorted.sort_by(f64::total_cmp);

        let idx = ((p / 100.0) * (sorted.len() - 1) as f64).round() as usize;
        sorted[idx.min(sorted.len() - 1)]
    }
}
