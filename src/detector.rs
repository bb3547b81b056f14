//! Detector Adapters
//!
//! Uniform interface over the two independently-trained scoring functions.
//! The pipeline only ever sees the [`Detector`] trait, so a detector can be
//! swapped for a stub in tests or for a different scoring backend without
//! touching the decision path.
//!
//! The shipped implementation wraps a standardize-then-linear-then-sigmoid
//! model: per-feature mean/scale standardization followed by a dot product
//! and a logistic squash. Weights come from a JSON file named in the
//! configuration, or from built-in defaults when no file is configured.
//! A model is loaded at most once per process, behind a guarded one-time
//! initialization, so concurrent first callers cannot double-load.

use anyhow::Context;
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::info;

use crate::error::DetectorError;
use crate::features::{FeatureVector, CONTENT_FEATURES, NETWORK_FEATURES};

/// Identity of a detector, carried on every score and error it produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectorKind {
    /// Network/metadata-pattern detector (volumetric signals)
    Network,
    /// Content-pattern detector (injection signals)
    Content,
}

impl fmt::Display for DetectorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DetectorKind::Network => f.write_str("network"),
            DetectorKind::Content => f.write_str("content"),
        }
    }
}

/// One detector's answer for one request.
#[derive(Debug, Clone, PartialEq)]
pub struct DetectionScore {
    /// Which detector produced the score
    pub detector: DetectorKind,
    /// Attack probability in [0.0, 1.0]
    pub probability: f32,
    /// Time spent inside the scoring call
    pub elapsed: Duration,
}

/// A black-box scoring function behind a stable interface.
///
/// Implementations must be cheap to call concurrently; the bridge invokes
/// them from the blocking pool under a per-call timeout.
pub trait Detector: Send + Sync {
    fn kind(&self) -> DetectorKind;

    /// Score a feature vector. A failure is always an error, never a
    /// probability of 0 or 1.
    fn score(&self, features: &FeatureVector) -> Result<DetectionScore, DetectorError>;
}

/// Pre-trained linear scoring function with feature standardization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinearModel {
    /// Per-feature weights; length fixes the expected vector length
    pub weights: Vec<f32>,
    /// Intercept added before the logistic squash
    pub bias: f32,
    /// Per-feature standardization means (zero when absent)
    #[serde(default)]
    pub mean: Vec<f32>,
    /// Per-feature standardization scales (one when absent, zero disables
    /// the feature, the training pipeline's convention)
    #[serde(default)]
    pub scale: Vec<f32>,
}

impl LinearModel {
    /// Load weights from a JSON file and validate them against the vector
    /// length the detector will feed in.
    pub fn from_file(path: &Path, expected_len: usize) -> anyhow::Result<Self> {
        let raw = std::fs::read(path)
            .with_context(|| format!("reading model weights from {}", path.display()))?;
        let model: LinearModel = serde_json::from_slice(&raw)
            .with_context(|| format!("parsing model weights from {}", path.display()))?;
        anyhow::ensure!(
            model.weights.len() == expected_len,
            "model at {} has {} weights, expected {}",
            path.display(),
            model.weights.len(),
            expected_len
        );
        Ok(model)
    }

    /// Built-in default weights for a detector variant, used when no model
    /// file is configured.
    pub fn builtin(kind: DetectorKind) -> Self {
        match kind {
            DetectorKind::Network => Self::builtin_network(),
            DetectorKind::Content => Self::builtin_content(),
        }
    }

    /// Defaults for the network detector: mostly-neutral weights over the
    /// derived length/count features, with the connection-count feature
    /// dominating so volumetric floods score high on their own.
    fn builtin_network() -> Self {
        let mut weights = vec![0.0; NETWORK_FEATURES];
        let mut mean = vec![0.0; NETWORK_FEATURES];
        let mut scale = vec![1.0; NETWORK_FEATURES];

        // (weight, mean, scale) for: uri length, user-agent length,
        // content length, header count, connection count, query length
        let head = [
            (0.3, 64.0, 256.0),
            (0.2, 80.0, 160.0),
            (0.25, 512.0, 4096.0),
            (0.2, 8.0, 8.0),
            (1.2, 4.0, 64.0),
            (0.3, 32.0, 128.0),
        ];
        for (i, (w, m, s)) in head.into_iter().enumerate() {
            weights[i] = w;
            mean[i] = m;
            scale[i] = s;
        }

        Self {
            weights,
            bias: -3.0,
            mean,
            scale,
        }
    }

    /// Defaults for the content detector: weights over the injection
    /// indicator counts; raw lengths carry no weight so large benign
    /// payloads do not score.
    fn builtin_content() -> Self {
        let weights = vec![
            0.0, // combined length
            0.6, // single quotes
            0.6, // double quotes
            0.9, // sql comments
            1.2, // union
            1.2, // select
            0.8, // insert
            0.8, // delete
            1.6, // <script>
            1.4, // javascript:
            1.2, // onload=
            1.2, // alert(
            0.8, // sql/xss/script flag
            0.0, // query length
            0.0, // body length
        ];

        Self {
            weights,
            bias: -2.2,
            mean: vec![0.0; CONTENT_FEATURES],
            scale: vec![1.0; CONTENT_FEATURES],
        }
    }

    /// Standardize, project and squash a feature vector into [0.0, 1.0].
    pub fn predict(&self, values: &[f32]) -> f32 {
        let mut z = self.bias;
        for (i, (&w, &x)) in self.weights.iter().zip(values).enumerate() {
            let m = self.mean.get(i).copied().unwrap_or(0.0);
            let s = self.scale.get(i).copied().unwrap_or(1.0);
            let standardized = if s == 0.0 { 0.0 } else { (x - m) / s };
            z += w * standardized;
        }
        sigmoid(z)
    }
}

fn sigmoid(z: f32) -> f32 {
    (1.0 / (1.0 + (-z).exp())).clamp(0.0, 1.0)
}

/// Detector adapter around a lazily-loaded [`LinearModel`].
pub struct ModelDetector {
    kind: DetectorKind,
    expected_len: usize,
    source: Option<PathBuf>,
    model: OnceCell<LinearModel>,
}

impl ModelDetector {
    /// Network detector; built-in weights when `path` is `None`.
    pub fn network(path: Option<PathBuf>) -> Self {
        Self {
            kind: DetectorKind::Network,
            expected_len: NETWORK_FEATURES,
            source: path,
            model: OnceCell::new(),
        }
    }

    /// Content detector; built-in weights when `path` is `None`.
    pub fn content(path: Option<PathBuf>) -> Self {
        Self {
            kind: DetectorKind::Content,
            expected_len: CONTENT_FEATURES,
            source: path,
            model: OnceCell::new(),
        }
    }

    /// Trigger model loading eagerly. A failure here is the same failure
    /// every subsequent `score` call will report.
    pub fn preload(&self) -> Result<(), DetectorError> {
        self.model().map(|_| ())
    }

    fn model(&self) -> Result<&LinearModel, DetectorError> {
        self.model.get_or_try_init(|| {
            let started = Instant::now();
            let model = match &self.source {
                Some(path) => LinearModel::from_file(path, self.expected_len).map_err(|e| {
                    DetectorError::NotLoaded {
                        detector: self.kind,
                        reason: e.to_string(),
                    }
                })?,
                None => LinearModel::builtin(self.kind),
            };
            info!(
                detector = %self.kind,
                features = self.expected_len,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "scoring model loaded"
            );
            Ok(model)
        })
    }
}

impl Detector for ModelDetector {
    fn kind(&self) -> DetectorKind {
        self.kind
    }

    fn score(&self, features: &FeatureVector) -> Result<DetectionScore, DetectorError> {
        if features.len() != self.expected_len {
            return Err(DetectorError::BadVector {
                detector: self.kind,
                expected: self.expected_len,
                got: features.len(),
            });
        }

        let model = self.model()?;
        let started = Instant::now();
        let probability = model.predict(features.values());

        Ok(DetectionScore {
            detector: self.kind,
            probability,
            elapsed: started.elapsed(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn vector(values: Vec<f32>, len: usize) -> FeatureVector {
        FeatureVector::new(values, len)
    }

    #[test]
    fn test_sigmoid_midpoint() {
        let model = LinearModel {
            weights: vec![1.0],
            bias: 0.0,
            mean: vec![],
            scale: vec![],
        };
        assert_eq!(model.predict(&[0.0]), 0.5);
    }

    #[test]
    fn test_predict_stays_in_unit_interval() {
        let model = LinearModel::builtin(DetectorKind::Network);
        for extreme in [0.0, 1e9, -1e9] {
            let p = model.predict(&[extreme; NETWORK_FEATURES]);
            assert!((0.0..=1.0).contains(&p), "probability out of range: {}", p);
        }
    }

    #[test]
    fn test_zero_scale_disables_feature() {
        let model = LinearModel {
            weights: vec![100.0],
            bias: 0.0,
            mean: vec![0.0],
            scale: vec![0.0],
        };
        assert_eq!(model.predict(&[1e6]), 0.5);
    }

    #[test]
    fn test_wrong_vector_length_is_an_error() {
        let detector = ModelDetector::network(None);
        let err = detector.score(&vector(vec![1.0], 7)).unwrap_err();
        assert!(matches!(err, DetectorError::BadVector { expected: 30, got: 7, .. }));
    }

    #[test]
    fn test_builtin_score_carries_identity() {
        let detector = ModelDetector::content(None);
        let score = detector
            .score(&vector(vec![0.0], CONTENT_FEATURES))
            .unwrap();
        assert_eq!(score.detector, DetectorKind::Content);
        assert!((0.0..=1.0).contains(&score.probability));
    }

    #[test]
    fn test_model_loads_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        let model = LinearModel {
            weights: vec![0.5; CONTENT_FEATURES],
            bias: -1.0,
            mean: vec![],
            scale: vec![],
        };
        file.write_all(serde_json::to_string(&model).unwrap().as_bytes())
            .unwrap();

        let detector = ModelDetector::content(Some(file.path().to_path_buf()));
        assert!(detector.preload().is_ok());
        let score = detector
            .score(&vector(vec![1.0; CONTENT_FEATURES], CONTENT_FEATURES))
            .unwrap();
        assert!(score.probability > 0.9);
    }

    #[test]
    fn test_missing_model_file_errors_on_every_call() {
        let detector = ModelDetector::network(Some(PathBuf::from("/nonexistent/weights.json")));

        for _ in 0..2 {
            let err = detector
                .score(&vector(vec![0.0], NETWORK_FEATURES))
                .unwrap_err();
            assert!(matches!(err, DetectorError::NotLoaded { .. }));
        }
    }

    #[test]
    fn test_wrong_weight_count_is_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        let model = LinearModel {
            weights: vec![0.5; 3],
            bias: 0.0,
            mean: vec![],
            scale: vec![],
        };
        file.write_all(serde_json::to_string(&model).unwrap().as_bytes())
            .unwrap();

        let detector = ModelDetector::content(Some(file.path().to_path_buf()));
        assert!(matches!(
            detector.preload().unwrap_err(),
            DetectorError::NotLoaded { .. }
        ));
    }
}
