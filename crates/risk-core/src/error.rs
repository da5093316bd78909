use std::path::PathBuf;

use serde::Serialize;
use thiserror::Error;

/// Model or threshold artifact could not be loaded. Fatal at startup.
#[derive(Debug, Error)]
pub enum ArtifactLoadError {
    #[error("artifact not found: {}", path.display())]
    Missing { path: PathBuf },

    #[error("read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("parse {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("malformed {}: {reason}", path.display())]
    Malformed { path: PathBuf, reason: String },
}

impl ArtifactLoadError {
    pub(crate) fn malformed(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::Malformed {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

/// A covariate selection is missing, out of range or contradictory.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("missing covariate selection(s): {}", keys.join(", "))]
    MissingCovariates { keys: Vec<&'static str> },

    #[error("invalid code {code} for covariate `{covariate}` (valid: {valid:?})")]
    InvalidCode {
        covariate: &'static str,
        code: i64,
        valid: &'static [i64],
    },

    #[error("unknown label {label:?} for covariate `{covariate}`")]
    UnknownLabel { covariate: &'static str, label: String },

    #[error("conflicting selections for covariate `{covariate}`: {first} vs {second}")]
    ConflictingSelection {
        covariate: &'static str,
        first: i64,
        second: i64,
    },
}

/// Feature vector shape or order does not match the loaded model.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchemaMismatchError {
    #[error("feature vector length {actual} does not match model schema length {expected}")]
    Length { expected: usize, actual: usize },

    #[error("feature column {position} is `{actual}`, model expects `{expected}`")]
    Order {
        position: usize,
        expected: String,
        actual: String,
    },

    #[error("model feature `{feature}` has no covariate in the active codebook")]
    UnknownFeature { feature: String },
}

/// Scoring itself failed. Never retried.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum InferenceError {
    #[error("feature `{feature}` is not finite ({value})")]
    NonFiniteFeature { feature: String, value: f64 },

    #[error("ensemble produced a non-finite margin ({margin})")]
    NonFiniteMargin { margin: f64 },
}

/// What the presentation layer should tell the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// "please complete the form"
    IncompleteForm,
    /// "system unavailable"
    Unavailable,
    /// "internal inconsistency"
    InternalInconsistency,
    InferenceFailed,
}

impl FailureKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::IncompleteForm => "incomplete_form",
            Self::Unavailable => "unavailable",
            Self::InternalInconsistency => "internal_inconsistency",
            Self::InferenceFailed => "inference_failed",
        }
    }
}

#[derive(Debug, Error)]
pub enum RiskError {
    #[error(transparent)]
    ArtifactLoad(#[from] ArtifactLoadError),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    SchemaMismatch(#[from] SchemaMismatchError),

    #[error(transparent)]
    Inference(#[from] InferenceError),
}

impl RiskError {
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::ArtifactLoad(_) => FailureKind::Unavailable,
            Self::Validation(_) => FailureKind::IncompleteForm,
            Self::SchemaMismatch(_) => FailureKind::InternalInconsistency,
            Self::Inference(_) => FailureKind::InferenceFailed,
        }
    }
}
