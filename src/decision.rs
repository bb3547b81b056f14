//! Decision Engine
//!
//! Combines the two detector results into a single verdict under the
//! configured thresholds. Pure and deterministic: identical inputs always
//! produce identical verdicts, and no retries happen here; retry policy
//! belongs to the bridge.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::config::ThresholdConfig;
use crate::detector::{DetectionScore, DetectorKind};
use crate::error::DetectorError;

/// Why a request was (or was not) blocked.
///
/// `DetectorUnavailable` and `InternalError` exist so operators can tell a
/// detector outage apart from a detected attack in the audit log; the two
/// must never be folded into one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockReason {
    Allowed,
    NetworkAttack,
    ContentAttack,
    DetectorUnavailable,
    InternalError,
}

impl fmt::Display for BlockReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BlockReason::Allowed => "allowed",
            BlockReason::NetworkAttack => "network_attack",
            BlockReason::ContentAttack => "content_attack",
            BlockReason::DetectorUnavailable => "detector_unavailable",
            BlockReason::InternalError => "internal_error",
        };
        f.write_str(name)
    }
}

/// The allow/block decision for one request, with supporting evidence.
#[derive(Debug, Clone, PartialEq)]
pub struct Verdict {
    pub blocked: bool,
    pub reason: BlockReason,
    /// Network detector score; absent when that detector failed
    pub network_score: Option<f32>,
    /// Content detector score; absent when that detector failed
    pub content_score: Option<f32>,
    /// Wall-clock time for the whole pipeline, filled in by the bridge
    pub total_latency: Duration,
}

/// Combine the two detector results into a verdict.
///
/// A detector error under fail-closed blocks the request outright: an
/// unscorable request is treated as hostile. A detector panic is surfaced
/// as `internal_error` rather than `detector_unavailable` so crash loops
/// stand out in the audit log. Under fail-open an errored detector simply
/// contributes no score and the decision falls to whatever scored.
///
/// Threshold comparison is strict `>`: a score exactly at the threshold
/// does not block. When both detectors exceed their thresholds the network
/// reason wins: volumetric signals carry higher confidence here.
pub fn decide(
    network: Result<DetectionScore, DetectorError>,
    content: Result<DetectionScore, DetectorError>,
    thresholds: &ThresholdConfig,
    fail_open: bool,
) -> Verdict {
    let network_score = network.as_ref().ok().map(|s| s.probability);
    let content_score = content.as_ref().ok().map(|s| s.probability);

    if (network.is_err() || content.is_err()) && !fail_open {
        let crashed = matches!(network, Err(DetectorError::Crashed { .. }))
            || matches!(content, Err(DetectorError::Crashed { .. }));
        let reason = if crashed {
            BlockReason::InternalError
        } else {
            BlockReason::DetectorUnavailable
        };
        return Verdict {
            blocked: true,
            reason,
            network_score,
            content_score,
            total_latency: Duration::ZERO,
        };
    }

    let network_hit = network_score.is_some_and(|s| s > thresholds.get(DetectorKind::Network));
    let content_hit = content_score.is_some_and(|s| s > thresholds.get(DetectorKind::Content));

    let reason = if network_hit {
        BlockReason::NetworkAttack
    } else if content_hit {
        BlockReason::ContentAttack
    } else {
        BlockReason::Allowed
    };

    Verdict {
        blocked: network_hit || content_hit,
        reason,
        network_score,
        content_score,
        total_latency: Duration::ZERO,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detector::DetectorKind;

    fn score(kind: DetectorKind, probability: f32) -> Result<DetectionScore, DetectorError> {
        Ok(DetectionScore {
            detector: kind,
            probability,
            elapsed: Duration::ZERO,
        })
    }

    fn unavailable(kind: DetectorKind) -> Result<DetectionScore, DetectorError> {
        Err(DetectorError::NotLoaded {
            detector: kind,
            reason: "model missing".to_string(),
        })
    }

    fn thresholds() -> ThresholdConfig {
        ThresholdConfig::default() // network 0.2, content 0.5
    }

    #[test]
    fn test_low_scores_allow() {
        let verdict = decide(
            score(DetectorKind::Network, 0.05),
            score(DetectorKind::Content, 0.1),
            &thresholds(),
            false,
        );
        assert!(!verdict.blocked);
        assert_eq!(verdict.reason, BlockReason::Allowed);
        assert_eq!(verdict.network_score, Some(0.05));
        assert_eq!(verdict.content_score, Some(0.1));
    }

    #[test]
    fn test_content_over_threshold_blocks() {
        let verdict = decide(
            score(DetectorKind::Network, 0.05),
            score(DetectorKind::Content, 0.9),
            &thresholds(),
            false,
        );
        assert!(verdict.blocked);
        assert_eq!(verdict.reason, BlockReason::ContentAttack);
    }

    #[test]
    fn test_network_takes_precedence_when_both_exceed() {
        let verdict = decide(
            score(DetectorKind::Network, 1.0),
            score(DetectorKind::Content, 0.9),
            &thresholds(),
            false,
        );
        assert!(verdict.blocked);
        assert_eq!(verdict.reason, BlockReason::NetworkAttack);
    }

    #[test]
    fn test_score_at_threshold_does_not_block() {
        let verdict = decide(
            score(DetectorKind::Network, 0.2),
            score(DetectorKind::Content, 0.5),
            &thresholds(),
            false,
        );
        assert!(!verdict.blocked);
        assert_eq!(verdict.reason, BlockReason::Allowed);
    }

    #[test]
    fn test_score_one_step_above_threshold_blocks() {
        let verdict = decide(
            score(DetectorKind::Network, 0.0),
            score(DetectorKind::Content, 0.5 + f32::EPSILON),
            &thresholds(),
            false,
        );
        assert!(verdict.blocked);
        assert_eq!(verdict.reason, BlockReason::ContentAttack);
    }

    #[test]
    fn test_detector_error_fails_closed() {
        let verdict = decide(
            score(DetectorKind::Network, 0.01),
            unavailable(DetectorKind::Content),
            &thresholds(),
            false,
        );
        assert!(verdict.blocked);
        assert_eq!(verdict.reason, BlockReason::DetectorUnavailable);
        assert_eq!(verdict.network_score, Some(0.01));
        assert_eq!(verdict.content_score, None);
    }

    #[test]
    fn test_timeout_fails_closed() {
        let verdict = decide(
            score(DetectorKind::Network, 0.01),
            Err(DetectorError::Timeout {
                detector: DetectorKind::Content,
                budget: Duration::from_millis(25),
            }),
            &thresholds(),
            false,
        );
        assert!(verdict.blocked);
        assert_eq!(verdict.reason, BlockReason::DetectorUnavailable);
    }

    #[test]
    fn test_crash_is_reported_as_internal_error() {
        let verdict = decide(
            Err(DetectorError::Crashed {
                detector: DetectorKind::Network,
                reason: "worker panicked".to_string(),
            }),
            score(DetectorKind::Content, 0.0),
            &thresholds(),
            false,
        );
        assert!(verdict.blocked);
        assert_eq!(verdict.reason, BlockReason::InternalError);
    }

    #[test]
    fn test_fail_open_falls_back_to_remaining_score() {
        // errored detector contributes nothing, low survivor allows
        let verdict = decide(
            score(DetectorKind::Network, 0.05),
            unavailable(DetectorKind::Content),
            &thresholds(),
            true,
        );
        assert!(!verdict.blocked);
        assert_eq!(verdict.reason, BlockReason::Allowed);

        // but a hot survivor still blocks
        let verdict = decide(
            score(DetectorKind::Network, 0.95),
            unavailable(DetectorKind::Content),
            &thresholds(),
            true,
        );
        assert!(verdict.blocked);
        assert_eq!(verdict.reason, BlockReason::NetworkAttack);
    }

    #[test]
    fn test_fail_open_with_both_detectors_down_allows() {
        let verdict = decide(
            unavailable(DetectorKind::Network),
            unavailable(DetectorKind::Content),
            &thresholds(),
            true,
        );
        assert!(!verdict.blocked);
        assert_eq!(verdict.reason, BlockReason::Allowed);
    }

    #[test]
    fn test_decide_is_deterministic() {
        let make = || {
            decide(
                score(DetectorKind::Network, 0.19),
                score(DetectorKind::Content, 0.51),
                &thresholds(),
                false,
            )
        };
        assert_eq!(make(), make());
    }

    #[test]
    fn test_reason_display_is_snake_case() {
        assert_eq!(BlockReason::NetworkAttack.to_string(), "network_attack");
        assert_eq!(BlockReason::DetectorUnavailable.to_string(), "detector_unavailable");
        assert_eq!(
            serde_json::to_string(&BlockReason::ContentAttack).unwrap(),
            "\"content_attack\""
        );
    }
}
