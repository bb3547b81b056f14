//! Agent Configuration
//!
//! Thresholds, fail policy, timeouts and file paths for the scoring
//! pipeline. Everything here is read once at process start and shared
//! read-only across concurrent evaluations; there is no hot reload.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::detector::DetectorKind;
use crate::metrics::MetricsConfig;

/// Top-level agent configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct AgentConfig {
    /// Per-detector block thresholds
    #[serde(default)]
    pub thresholds: ThresholdConfig,
    /// Allow requests when a detector cannot score. The default is
    /// fail-closed: an unscorable request is blocked.
    #[serde(default)]
    pub fail_open: bool,
    /// Per-detector scoring timeout in milliseconds
    #[serde(default = "default_detector_timeout_ms")]
    pub detector_timeout_ms: u64,
    /// Network model weights file (JSON); built-in weights when absent
    #[serde(default)]
    pub network_model_path: Option<PathBuf>,
    /// Content model weights file (JSON); built-in weights when absent
    #[serde(default)]
    pub content_model_path: Option<PathBuf>,
    /// Maximum request body bytes retained for content scoring
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
    /// Audit/timing log configuration
    #[serde(default)]
    pub audit: AuditConfig,
    /// Metrics collection configuration
    #[serde(default)]
    pub metrics: MetricsConfig,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            thresholds: ThresholdConfig::default(),
            fail_open: false,
            detector_timeout_ms: default_detector_timeout_ms(),
            network_model_path: None,
            content_model_path: None,
            max_body_bytes: default_max_body_bytes(),
            audit: AuditConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl AgentConfig {
    pub fn detector_timeout(&self) -> Duration {
        Duration::from_millis(self.detector_timeout_ms)
    }
}

fn default_detector_timeout_ms() -> u64 {
    25
}

fn default_max_body_bytes() -> usize {
    1048576 // 1MB
}

/// Per-detector block thresholds.
///
/// The defaults are deliberately asymmetric: the two detectors have
/// different base rates, and the network detector earns a lower bar.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ThresholdConfig {
    /// Network detector threshold (default: 0.2)
    #[serde(default = "default_network_threshold")]
    pub network: f32,
    /// Content detector threshold (default: 0.5)
    #[serde(default = "default_content_threshold")]
    pub content: f32,
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        Self {
            network: default_network_threshold(),
            content: default_content_threshold(),
        }
    }
}

impl ThresholdConfig {
    /// Threshold for a detector identity.
    pub fn get(&self, kind: DetectorKind) -> f32 {
        match kind {
            DetectorKind::Network => self.network,
            DetectorKind::Content => self.content,
        }
    }
}

fn default_network_threshold() -> f32 {
    0.2
}

fn default_content_threshold() -> f32 {
    0.5
}

/// Audit and timing log configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct AuditConfig {
    /// Enable the audit/timing sink
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Decision audit log path
    #[serde(default = "default_audit_log")]
    pub audit_log: PathBuf,
    /// Timing sample log path
    #[serde(default = "default_timing_log")]
    pub timing_log: PathBuf,
    /// Queue depth before records are dropped instead of queued
    #[serde(default = "default_queue_depth")]
    pub queue_depth: usize,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            audit_log: default_audit_log(),
            timing_log: default_timing_log(),
            queue_depth: default_queue_depth(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_audit_log() -> PathBuf {
    PathBuf::from("./waf_ml_audit.log")
}

fn default_timing_log() -> PathBuf {
    PathBuf::from("./waf_ml_timing.log")
}

fn default_queue_depth() -> usize {
    1024
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_thresholds_are_asymmetric() {
        let config = AgentConfig::default();
        assert_eq!(config.thresholds.network, 0.2);
        assert_eq!(config.thresholds.content, 0.5);
        assert_eq!(config.thresholds.get(DetectorKind::Network), 0.2);
        assert_eq!(config.thresholds.get(DetectorKind::Content), 0.5);
    }

    #[test]
    fn test_default_policy_is_fail_closed() {
        let config = AgentConfig::default();
        assert!(!config.fail_open);
        assert_eq!(config.detector_timeout(), Duration::from_millis(25));
    }

    #[test]
    fn test_config_deserializes_with_defaults() {
        let config: AgentConfig = serde_json::from_str(r#"{"fail-open": true}"#).unwrap();
        assert!(config.fail_open);
        assert_eq!(config.thresholds.content, 0.5);
        assert!(config.audit.enabled);
    }
}
