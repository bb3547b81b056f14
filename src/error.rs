//! Error Types
//!
//! A scoring failure is never a score: the decision engine must be able to
//! tell "scored low" apart from "could not score", so every failure mode a
//! detector can hit is a distinct variant here.

use std::time::Duration;
use thiserror::Error;

use crate::detector::DetectorKind;

/// Failure modes of a detector invocation.
#[derive(Debug, Error)]
pub enum DetectorError {
    /// The scoring model failed to load (bad path, malformed weights).
    #[error("{detector} model not available: {reason}")]
    NotLoaded { detector: DetectorKind, reason: String },

    /// The detector was handed a vector of the wrong length.
    #[error("{detector} detector fed a {got}-element vector, expected {expected}")]
    BadVector {
        detector: DetectorKind,
        expected: usize,
        got: usize,
    },

    /// The detector did not answer within its time budget.
    #[error("{detector} detector timed out after {budget:?}")]
    Timeout {
        detector: DetectorKind,
        budget: Duration,
    },

    /// The detector panicked or its worker died mid-call.
    #[error("{detector} detector crashed: {reason}")]
    Crashed { detector: DetectorKind, reason: String },
}

impl DetectorError {
    /// Which detector produced this error.
    pub fn detector(&self) -> DetectorKind {
        match self {
            DetectorError::NotLoaded { detector, .. }
            | DetectorError::BadVector { detector, .. }
            | DetectorError::Timeout { detector, .. }
            | DetectorError::Crashed { detector, .. } => *detector,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_names_the_detector() {
        let err = DetectorError::Timeout {
            detector: DetectorKind::Content,
            budget: Duration::from_millis(25),
        };
        assert!(err.to_string().contains("content"));

        let err = DetectorError::BadVector {
            detector: DetectorKind::Network,
            expected: 30,
            got: 7,
        };
        assert!(err.to_string().contains("expected 30"));
        assert_eq!(err.detector(), DetectorKind::Network);
    }
}
