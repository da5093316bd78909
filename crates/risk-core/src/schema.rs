use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::codebook::Covariate;
use crate::encoder::MissingPolicy;

/// Result of scoring one feature vector.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RiskScore {
    /// Positive-class probability in [0, 1]
    pub probability: f64,
    /// `probability >= threshold`
    pub is_high_risk: bool,
    pub threshold: f64,
}

impl RiskScore {
    /// Inclusive boundary, no rounding before the comparison.
    #[inline]
    pub fn classify(probability: f64, threshold: f64) -> Self {
        Self {
            probability,
            is_high_risk: probability >= threshold,
            threshold,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoreRequest {
    /// Optional; generated server-side when absent
    #[serde(default)]
    pub trace_id: Option<Uuid>,

    /// covariate key (or model feature name) -> code
    pub selections: BTreeMap<String, i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoreVectorRequest {
    #[serde(default)]
    pub trace_id: Option<Uuid>,
    pub features: Vec<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoreResponse {
    pub trace_id: Uuid,
    pub probability: f64,
    pub is_high_risk: bool,
    pub threshold: f64,
    /// Per-stage timings in microseconds
    pub timings_us: TimingsUs,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TimingsUs {
    pub encode: u64,
    pub score: u64,
    pub total: u64,
}

/// One selectable option of a covariate.
#[derive(Debug, Clone, Serialize)]
pub struct CodeOption {
    pub code: i64,
    pub label: &'static str,
}

#[derive(Debug, Clone, Serialize)]
pub struct CovariateInfo {
    pub key: &'static str,
    pub feature_name: &'static str,
    pub display_name: &'static str,
    pub required: bool,
    pub options: Vec<CodeOption>,
}

/// Everything a form needs to render itself against the loaded model.
#[derive(Debug, Clone, Serialize)]
pub struct SchemaInfo {
    pub feature_names: Vec<String>,
    pub threshold: f64,
    pub missing_policy: MissingPolicy,
    pub covariates: Vec<CovariateInfo>,
}

impl CovariateInfo {
    pub fn new(c: Covariate, required: bool) -> Self {
        Self {
            key: c.key(),
            feature_name: c.feature_name(),
            display_name: c.display_name(),
            required,
            options: c
                .options()
                .into_iter()
                .map(|(code, label)| CodeOption { code, label })
                .collect(),
        }
    }
}
