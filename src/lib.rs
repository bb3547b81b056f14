//! ML Request Threat-Scoring Agent
//!
//! Scores individual HTTP requests on behalf of an external reverse-proxy
//! WAF rule engine. Two independently-trained detectors (a network/metadata
//! detector and a content detector) each turn a request
//! into a fixed-length feature vector and a probability; the decision
//! engine combines the two scores under configurable thresholds into an
//! allow/block verdict with a reason code.
//!
//! # Design
//!
//! - **Fail-closed by default**: a detector that cannot score (model
//!   missing, timeout, crash) blocks the request. Operators tell outages
//!   apart from attacks via the audit log's reason field, never via the
//!   response the client sees.
//! - **One-time model loading**: scoring models load once per process
//!   behind a guarded initialization; evaluations share them read-only.
//! - **Best-effort audit**: decision and timing records flow through a
//!   single writer task; a logging failure never changes a verdict.
//!
//! # Example
//!
//! ```ignore
//! use waf_ml_agent::{AgentConfig, RequestRecord, ScoringAgent};
//!
//! let agent = ScoringAgent::new(AgentConfig::default())?;
//! let verdict = agent.evaluate(record).await;
//! if verdict.blocked {
//!     // return the 403-equivalent upstream
//! }
//! ```

pub mod audit;
pub mod config;
pub mod decision;
pub mod detector;
pub mod error;
pub mod features;
pub mod metrics;
pub mod request;

// Re-exports for convenience
pub use config::{AgentConfig, AuditConfig, ThresholdConfig};
pub use decision::{decide, BlockReason, Verdict};
pub use detector::{DetectionScore, Detector, DetectorKind, LinearModel, ModelDetector};
pub use error::DetectorError;
pub use features::{extract_content, extract_network, FeatureVector, CONTENT_FEATURES, NETWORK_FEATURES};
pub use metrics::{AgentMetrics, MetricsConfig, MetricsSummary};
pub use request::RequestRecord;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use audit::{AuditSink, PhaseTimings};

/// The bridge between the external rule engine and the scoring pipeline.
///
/// Owns the fail-open/fail-closed policy and the per-detector time budget.
/// One instance serves all concurrent requests; every evaluation is
/// stateless and owns its record, vectors and verdict exclusively.
pub struct ScoringAgent {
    config: AgentConfig,
    network: Arc<dyn Detector>,
    content: Arc<dyn Detector>,
    audit: AuditSink,
    metrics: Arc<AgentMetrics>,
}

impl ScoringAgent {
    /// Build an agent with the shipped model-backed detectors.
    ///
    /// Models are loaded eagerly here so a bad weights file shows up in the
    /// logs at startup; a load failure does not abort, it resurfaces on
    /// every scoring call and feeds the fail policy instead.
    pub fn new(config: AgentConfig) -> Result<Self> {
        let network = ModelDetector::network(config.network_model_path.clone());
        if let Err(err) = network.preload() {
            warn!(error = %err, "network model unavailable at startup");
        }
        let content = ModelDetector::content(config.content_model_path.clone());
        if let Err(err) = content.preload() {
            warn!(error = %err, "content model unavailable at startup");
        }

        Self::with_detectors(config, Arc::new(network), Arc::new(content))
    }

    /// Build an agent around caller-supplied detectors.
    pub fn with_detectors(
        config: AgentConfig,
        network: Arc<dyn Detector>,
        content: Arc<dyn Detector>,
    ) -> Result<Self> {
        let audit = AuditSink::spawn(&config.audit);
        let metrics = Arc::new(AgentMetrics::new(config.metrics.clone()));

        info!(
            network_threshold = config.thresholds.network,
            content_threshold = config.thresholds.content,
            fail_open = config.fail_open,
            detector_timeout_ms = config.detector_timeout_ms,
            "scoring agent initialized"
        );

        Ok(Self {
            config,
            network,
            content,
            audit,
            metrics,
        })
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub fn metrics(&self) -> Arc<AgentMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Evaluate one request and return the verdict.
    ///
    /// Infallible from the caller's view: every failure mode inside the
    /// pipeline is folded into the verdict by the fail policy. The decision
    /// is final once returned; nothing here is retried or revoked.
    pub async fn evaluate(&self, record: RequestRecord) -> Verdict {
        let started = Instant::now();

        let mut record = record;
        record.normalize(self.config.max_body_bytes);

        let extract_started = Instant::now();
        let network_features = extract_network(&record);
        let content_features = extract_content(&record);
        let extract = extract_started.elapsed();

        let budget = self.config.detector_timeout();
        let (network, content) = tokio::join!(
            score_detector(Arc::clone(&self.network), network_features, budget),
            score_detector(Arc::clone(&self.content), content_features, budget),
        );

        for err in [network.as_ref().err(), content.as_ref().err()]
            .into_iter()
            .flatten()
        {
            warn!(detector = %err.detector(), error = %err, "detector invocation failed");
        }

        let score_network = phase_elapsed(&network, budget);
        let score_content = phase_elapsed(&content, budget);

        let mut verdict = decide(network, content, &self.config.thresholds, self.config.fail_open);
        verdict.total_latency = started.elapsed();

        let timings = PhaseTimings {
            extract,
            score_network,
            score_content,
            total: verdict.total_latency,
        };
        self.metrics.record_verdict(&verdict);
        self.audit.record(&record, &verdict, &timings);

        if verdict.blocked {
            info!(
                reason = %verdict.reason,
                uri = %record.uri,
                remote = %record.remote_addr,
                latency_us = verdict.total_latency.as_micros() as u64,
                "request blocked"
            );
        } else {
            debug!(
                uri = %record.uri,
                remote = %record.remote_addr,
                latency_us = verdict.total_latency.as_micros() as u64,
                "request allowed"
            );
        }

        verdict
    }

    /// Drain the audit sink. Call before shutdown.
    pub async fn flush(&self) {
        self.audit.flush().await;
    }
}

/// Run one detector on the blocking pool under its time budget.
///
/// A timeout or a panicked worker becomes a detector error; the decision
/// engine owns what that means for the verdict.
async fn score_detector(
    detector: Arc<dyn Detector>,
    features: FeatureVector,
    budget: Duration,
) -> Result<DetectionScore, DetectorError> {
    let kind = detector.kind();
    let task = tokio::task::spawn_blocking(move || detector.score(&features));

    match tokio::time::timeout(budget, task).await {
        Ok(Ok(result)) => result,
        Ok(Err(join_err)) => Err(DetectorError::Crashed {
            detector: kind,
            reason: join_err.to_string(),
        }),
        Err(_) => Err(DetectorError::Timeout {
            detector: kind,
            budget,
        }),
    }
}

fn phase_elapsed(result: &Result<DetectionScore, DetectorError>, budget: Duration) -> Duration {
    match result {
        Ok(score) => score.elapsed,
        Err(DetectorError::Timeout { .. }) => budget,
        Err(_) => Duration::ZERO,
    }
}

/// Verdict in the shape the external rule engine consumes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerdictResponse {
    pub blocked: bool,
    pub reason: BlockReason,
    pub network_score: Option<f32>,
    pub content_score: Option<f32>,
}

impl From<&Verdict> for VerdictResponse {
    fn from(verdict: &Verdict) -> Self {
        Self {
            blocked: verdict.blocked,
            reason: verdict.reason,
            network_score: verdict.network_score,
            content_score: verdict.content_score,
        }
    }
}

impl VerdictResponse {
    /// Response for input the pipeline never saw (e.g. malformed records);
    /// honors the configured fail policy.
    pub fn failure(reason: BlockReason, fail_open: bool) -> Self {
        Self {
            blocked: !fail_open,
            reason,
            network_score: None,
            content_score: None,
        }
    }
}
