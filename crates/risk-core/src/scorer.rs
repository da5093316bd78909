use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::encoder::{FeatureSchema, FeatureVector};
use crate::ensemble::Ensemble;
use crate::error::{ArtifactLoadError, InferenceError, RiskError, SchemaMismatchError};
use crate::schema::RiskScore;

const MODEL_FILES: [&str; 4] = [
    "xgb_model.json",
    "bcsc_xgb_model.json",
    "xgb_model.json.gz",
    "bcsc_xgb_model.json.gz",
];
const THRESHOLD_FILES: [&str; 2] = ["threshold.json", "threshold.txt"];

pub fn select_model_file(dir: &Path) -> Option<PathBuf> {
    for name in MODEL_FILES {
        let p = dir.join(name);
        if p.exists() {
            return Some(p);
        }
    }

    // fallback: checkpoints saved as xgb_model_iter1800.json, xgb_model_iter1801.json, ...
    let mut cands: Vec<(u32, PathBuf)> = vec![];
    if let Ok(rd) = fs::read_dir(dir) {
        for ent in rd.flatten() {
            let path = ent.path();
            if !path.is_file() {
                continue;
            }
            let name = path.file_name().and_then(|s| s.to_str()).unwrap_or("");
            if let Some(rest) = name.strip_prefix("xgb_model_iter") {
                if let Some(rest) = rest.strip_suffix(".json") {
                    if let Ok(it) = rest.parse::<u32>() {
                        cands.push((it, path));
                    }
                }
            }
        }
    }
    cands.sort_by_key(|(it, _)| *it);
    cands.first().map(|(_, p)| p.clone())
}

fn select_threshold_file(dir: &Path) -> PathBuf {
    THRESHOLD_FILES
        .iter()
        .map(|n| dir.join(n))
        .find(|p| p.exists())
        .unwrap_or_else(|| dir.join(THRESHOLD_FILES[0]))
}

fn read_to_string(path: &Path) -> Result<String, ArtifactLoadError> {
    if !path.exists() {
        return Err(ArtifactLoadError::Missing {
            path: path.to_path_buf(),
        });
    }
    fs::read_to_string(path).map_err(|source| ArtifactLoadError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Feature names next to the model, for models fit on a bare array.
fn load_feature_names(dir: &Path) -> Result<Option<Vec<String>>, ArtifactLoadError> {
    let json_path = dir.join("feature_names.json");
    if json_path.exists() {
        let s = read_to_string(&json_path)?;
        let names: Vec<String> =
            serde_json::from_str(&s).map_err(|source| ArtifactLoadError::Parse {
                path: json_path.clone(),
                source,
            })?;
        return Ok(Some(names));
    }

    let txt_path = dir.join("features.txt");
    if txt_path.exists() {
        let s = read_to_string(&txt_path)?;
        let out = s
            .lines()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .collect();
        return Ok(Some(out));
    }

    Ok(None)
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ThresholdJson {
    Bare(f64),
    Wrapped { threshold: f64 },
}

/// Threshold artifact: a bare number (`0.48`) or `{"threshold": 0.48}`.
pub fn load_threshold(path: &Path) -> Result<f64, ArtifactLoadError> {
    let s = read_to_string(path)?;
    let is_txt = path.extension().and_then(|e| e.to_str()) == Some("txt");
    let t = if is_txt {
        s.trim().parse::<f64>().map_err(|e| {
            ArtifactLoadError::malformed(path, format!("threshold is not a number: {e}"))
        })?
    } else {
        match serde_json::from_str::<ThresholdJson>(&s) {
            Ok(ThresholdJson::Bare(t)) | Ok(ThresholdJson::Wrapped { threshold: t }) => t,
            Err(source) => {
                return Err(ArtifactLoadError::Parse {
                    path: path.to_path_buf(),
                    source,
                })
            }
        }
    };
    check_threshold(t).map_err(|reason| ArtifactLoadError::malformed(path, reason))
}

fn check_threshold(t: f64) -> Result<f64, String> {
    if t.is_finite() && (0.0..=1.0).contains(&t) {
        Ok(t)
    } else {
        Err(format!("threshold {t} outside [0, 1]"))
    }
}

/// Loaded model plus decision threshold.
///
/// Obtaining one is the only state transition (`Unloaded -> Loaded`); it is
/// immutable afterwards. Build it once at startup and share it as
/// `Arc<RiskScorer>`; reloading means building a new handle.
#[derive(Debug)]
pub struct RiskScorer {
    model_path: Option<PathBuf>,
    ensemble: Ensemble,
    schema: Arc<FeatureSchema>,
    threshold: f64,
}

impl RiskScorer {
    /// Load explicit model and threshold artifacts. The model must carry its
    /// own feature names.
    pub fn load(model_path: &Path, threshold_path: &Path) -> Result<Self, ArtifactLoadError> {
        let ensemble = Ensemble::load(model_path)?;
        let threshold = load_threshold(threshold_path)?;
        let names = ensemble.feature_names().to_vec();
        Self::assemble(Some(model_path.to_path_buf()), ensemble, names, threshold)
    }

    /// Load everything from a model directory.
    ///
    /// Feature names come from the model itself, falling back to
    /// `feature_names.json` / `features.txt`. When both exist they must agree.
    pub fn load_from_dir(dir: &Path) -> Result<Self, ArtifactLoadError> {
        let model_path = select_model_file(dir).unwrap_or_else(|| dir.join(MODEL_FILES[0]));
        let ensemble = Ensemble::load(&model_path)?;
        let threshold = load_threshold(&select_threshold_file(dir))?;

        let side_names = load_feature_names(dir)?;
        let names = match (ensemble.feature_names(), side_names) {
            (embedded, Some(side)) if !embedded.is_empty() && embedded != side.as_slice() => {
                return Err(ArtifactLoadError::malformed(
                    dir.join("feature_names.json"),
                    "feature names disagree with the model's own feature_names",
                ));
            }
            (embedded, _) if !embedded.is_empty() => embedded.to_vec(),
            (_, Some(side)) => side,
            (_, None) => vec![],
        };

        Self::assemble(Some(model_path), ensemble, names, threshold)
    }

    /// Wrap an in-memory ensemble.
    pub fn from_parts(ensemble: Ensemble, threshold: f64) -> Result<Self, ArtifactLoadError> {
        let names = ensemble.feature_names().to_vec();
        Self::assemble(None, ensemble, names, threshold)
    }

    fn assemble(
        model_path: Option<PathBuf>,
        ensemble: Ensemble,
        names: Vec<String>,
        threshold: f64,
    ) -> Result<Self, ArtifactLoadError> {
        let where_ = || model_path.clone().unwrap_or_else(|| PathBuf::from("<memory>"));
        if names.is_empty() {
            return Err(ArtifactLoadError::malformed(
                where_(),
                "model has no feature names (add feature_names.json next to it)",
            ));
        }
        if names.len() != ensemble.num_feature() {
            return Err(ArtifactLoadError::malformed(
                where_(),
                format!(
                    "{} feature names for a model with num_feature={}",
                    names.len(),
                    ensemble.num_feature()
                ),
            ));
        }
        let threshold = check_threshold(threshold)
            .map_err(|reason| ArtifactLoadError::malformed(where_(), reason))?;

        tracing::info!(
            features = names.len(),
            trees = ensemble.num_trees(),
            threshold,
            "risk scorer loaded"
        );

        Ok(Self {
            model_path,
            ensemble,
            schema: Arc::new(FeatureSchema::new(names)),
            threshold,
        })
    }

    /// Replace the persisted threshold with a fixed one (e.g. a clinical convention).
    /// Consumes the handle: a scorer's threshold never changes once it is shared.
    pub fn with_threshold(self, threshold: f64) -> Result<Self, ArtifactLoadError> {
        let where_ = self
            .model_path
            .clone()
            .unwrap_or_else(|| PathBuf::from("<memory>"));
        let threshold =
            check_threshold(threshold).map_err(|reason| ArtifactLoadError::malformed(where_, reason))?;
        tracing::warn!(
            persisted = self.threshold,
            pinned = threshold,
            "decision threshold pinned by configuration"
        );
        Ok(Self { threshold, ..self })
    }

    pub fn model_path(&self) -> Option<&Path> {
        self.model_path.as_deref()
    }

    pub fn schema(&self) -> &Arc<FeatureSchema> {
        &self.schema
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn ensemble(&self) -> &Ensemble {
        &self.ensemble
    }

    /// Probability for a raw model-ordered row.
    pub fn predict_proba(&self, row: &[f64]) -> Result<f64, RiskError> {
        if row.len() != self.schema.len() {
            return Err(SchemaMismatchError::Length {
                expected: self.schema.len(),
                actual: row.len(),
            }
            .into());
        }

        let mut dense = Vec::with_capacity(row.len());
        for (i, &v) in row.iter().enumerate() {
            if !v.is_finite() {
                return Err(InferenceError::NonFiniteFeature {
                    feature: self.schema.names()[i].clone(),
                    value: v,
                }
                .into());
            }
            // XGBoost compares split conditions in f32
            dense.push(v as f32);
        }

        let margin = self.ensemble.margin(&dense)?;
        if !margin.is_finite() {
            return Err(InferenceError::NonFiniteMargin {
                margin: margin as f64,
            }
            .into());
        }
        Ok(crate::util::sigmoid(margin as f64))
    }

    /// Score a raw row. Only the length can be checked here; prefer
    /// [`RiskScorer::score_vector`] which also checks column order.
    pub fn score(&self, row: &[f64]) -> Result<RiskScore, RiskError> {
        let p = self.predict_proba(row)?;
        Ok(RiskScore::classify(p, self.threshold))
    }

    pub fn score_vector(&self, v: &FeatureVector) -> Result<RiskScore, RiskError> {
        if !Arc::ptr_eq(v.schema(), &self.schema) {
            self.schema.check_same(v.schema())?;
        }
        self.score(v.values())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ensemble::{Node, Tree};

    fn two_feature_scorer(threshold: f64) -> RiskScorer {
        let tree = Tree::new(vec![
            Node::Split {
                feature: 1,
                threshold: 0.5,
                left: 1,
                right: 2,
                default_left: true,
            },
            Node::Leaf { value: -0.4 },
            Node::Leaf { value: 0.6 },
        ]);
        let ens = Ensemble::from_trees(vec![tree], 0.5, vec!["a".into(), "b".into()]).unwrap();
        RiskScorer::from_parts(ens, threshold).unwrap()
    }

    #[test]
    fn short_row_is_schema_mismatch() {
        let s = two_feature_scorer(0.5);
        let err = s.score(&[1.0]).unwrap_err();
        assert!(matches!(
            err,
            RiskError::SchemaMismatch(SchemaMismatchError::Length {
                expected: 2,
                actual: 1
            })
        ));
    }

    #[test]
    fn non_finite_input_is_inference_error() {
        let s = two_feature_scorer(0.5);
        let err = s.score(&[0.0, f64::NAN]).unwrap_err();
        assert!(matches!(
            err,
            RiskError::Inference(InferenceError::NonFiniteFeature { ref feature, .. }) if feature == "b"
        ));
    }

    #[test]
    fn threshold_out_of_range_rejected() {
        let tree = Tree::new(vec![Node::Leaf { value: 0.0 }]);
        let ens = Ensemble::from_trees(vec![tree], 0.5, vec!["a".into()]).unwrap();
        assert!(RiskScorer::from_parts(ens.clone(), 1.5).is_err());
        assert!(RiskScorer::from_parts(ens.clone(), f64::NAN).is_err());
        assert!(RiskScorer::from_parts(ens, 0.0).is_ok());
    }

    #[test]
    fn pinned_threshold_replaces_persisted_one() {
        let s = two_feature_scorer(0.9).with_threshold(0.48).unwrap();
        assert_eq!(s.threshold(), 0.48);
        // margin 0.6 -> p ~= 0.6457
        assert!(s.score(&[0.0, 1.0]).unwrap().is_high_risk);
        assert!(two_feature_scorer(0.5).with_threshold(-0.1).is_err());
    }

    #[test]
    fn foreign_schema_vector_is_rejected() {
        use crate::encoder::{FeatureEncoder, MissingPolicy};
        let s = two_feature_scorer(0.5);
        let other = Arc::new(FeatureSchema::new(vec!["b".into(), "a".into()]));
        // build a vector tagged with another schema via FillDefault encoder
        let enc = FeatureEncoder::new(other, MissingPolicy::FillDefault).unwrap();
        let v = enc.encode(Vec::<(&str, i64)>::new()).unwrap();
        let err = s.score_vector(&v).unwrap_err();
        assert!(matches!(
            err,
            RiskError::SchemaMismatch(SchemaMismatchError::Order { position: 0, .. })
        ));
    }
}
