//! Pure-Rust evaluator for XGBoost JSON models (`Booster.save_model("*.json")`).
//!
//! Scope:
//! - booster `gbtree`, objective `binary:logistic` / `reg:logistic`
//! - numerical splits only (categorical splits are rejected at load)
//! - one output group (no multi-class)
//!
//! Traversal matches XGBoost: the feature value is compared as `f32`,
//! `x < split_condition` goes left, NaN follows `default_left`.
//! Leaf values are read from `split_conditions` (that is where XGBoost keeps them).

use std::fs;
use std::path::Path;

use serde::Deserialize;

use crate::error::{ArtifactLoadError, SchemaMismatchError};
use crate::util::{logit, sigmoid};

#[derive(Debug, Deserialize)]
struct XgbModelJson {
    learner: LearnerJson,
    #[serde(default)]
    version: Vec<u32>,
}

#[derive(Debug, Deserialize)]
struct LearnerJson {
    #[serde(default)]
    feature_names: Vec<String>,
    #[serde(default)]
    feature_types: Vec<String>,
    gradient_booster: GradientBoosterJson,
    learner_model_param: LearnerModelParamJson,
    objective: ObjectiveJson,
}

#[derive(Debug, Deserialize)]
struct GradientBoosterJson {
    name: String,
    #[serde(default)]
    model: Option<GbTreeModelJson>,
}

#[derive(Debug, Deserialize)]
struct GbTreeModelJson {
    trees: Vec<TreeJson>,
    #[serde(default)]
    tree_info: Vec<i64>,
}

#[derive(Debug, Deserialize)]
struct LearnerModelParamJson {
    #[serde(default)]
    base_score: Option<String>,
    #[serde(default)]
    num_class: Option<String>,
    #[serde(default)]
    num_feature: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ObjectiveJson {
    name: String,
}

#[derive(Debug, Deserialize)]
struct TreeJson {
    left_children: Vec<i64>,
    right_children: Vec<i64>,
    split_indices: Vec<i64>,
    split_conditions: Vec<f32>,
    default_left: Vec<Flag>,
    #[serde(default)]
    split_type: Vec<i64>,
}

/// `default_left` is an int array in most releases and a bool array in some.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(untagged)]
enum Flag {
    Bool(bool),
    Int(i64),
}

impl Flag {
    fn is_set(self) -> bool {
        match self {
            Flag::Bool(b) => b,
            Flag::Int(i) => i != 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Node {
    Split {
        feature: u32,
        threshold: f32,
        left: u32,
        right: u32,
        default_left: bool,
    },
    Leaf {
        value: f32,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Tree {
    nodes: Vec<Node>,
}

impl Tree {
    pub fn new(nodes: Vec<Node>) -> Self {
        Self { nodes }
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    /// Leaf value reached by `row`. `row` must be at least `num_feature` long;
    /// [`Ensemble::margin`] checks that before walking.
    #[inline]
    pub(crate) fn leaf_value(&self, row: &[f32]) -> f32 {
        let mut idx = 0usize;
        // children are validated at load, bound the walk anyway
        for _ in 0..=self.nodes.len() {
            match self.nodes[idx] {
                Node::Leaf { value } => return value,
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                    default_left,
                } => {
                    let x = row[feature as usize];
                    let go_left = if x.is_nan() { default_left } else { x < threshold };
                    idx = (if go_left { left } else { right }) as usize;
                }
            }
        }
        0.0
    }

    fn validate(&self, num_feature: usize) -> Result<(), String> {
        if self.nodes.is_empty() {
            return Err("tree has no nodes".into());
        }
        let n = self.nodes.len();
        for (i, node) in self.nodes.iter().enumerate() {
            if let Node::Split {
                feature,
                left,
                right,
                ..
            } = *node
            {
                if feature as usize >= num_feature {
                    return Err(format!(
                        "node {i} splits on feature {feature}, model has {num_feature}"
                    ));
                }
                for child in [left, right] {
                    // XGBoost always allocates children after their parent
                    if child as usize >= n || child as usize <= i {
                        return Err(format!("node {i} has invalid child {child} (nodes={n})"));
                    }
                }
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Objective {
    BinaryLogistic,
    RegLogistic,
}

impl Objective {
    fn parse(name: &str) -> Option<Self> {
        match name {
            "binary:logistic" => Some(Self::BinaryLogistic),
            "reg:logistic" => Some(Self::RegLogistic),
            _ => None,
        }
    }
}

/// Immutable tree ensemble. `Send + Sync`, share it behind an `Arc`.
#[derive(Debug, Clone)]
pub struct Ensemble {
    trees: Vec<Tree>,
    base_score: f32,
    base_margin: f32,
    num_feature: usize,
    feature_names: Vec<String>,
    objective: Objective,
}

impl Ensemble {
    /// Build from trees already in memory. `base_score` is in probability space.
    pub fn from_trees(
        trees: Vec<Tree>,
        base_score: f32,
        feature_names: Vec<String>,
    ) -> Result<Self, String> {
        let num_feature = feature_names.len();
        if !(base_score > 0.0 && base_score < 1.0) {
            return Err(format!("base_score {base_score} outside (0, 1)"));
        }
        for (t, tree) in trees.iter().enumerate() {
            tree.validate(num_feature).map_err(|e| format!("tree {t}: {e}"))?;
        }
        Ok(Self {
            trees,
            base_score,
            base_margin: logit(base_score as f64) as f32,
            num_feature,
            feature_names,
            objective: Objective::BinaryLogistic,
        })
    }

    /// Read a model file; `*.gz` is decompressed on the fly.
    pub fn load(path: &Path) -> Result<Self, ArtifactLoadError> {
        if !path.exists() {
            return Err(ArtifactLoadError::Missing {
                path: path.to_path_buf(),
            });
        }
        let bytes = fs::read(path).map_err(|source| ArtifactLoadError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let is_gz = path.extension().and_then(|s| s.to_str()) == Some("gz");
        let parsed = if is_gz {
            serde_json::from_reader(flate2::read::GzDecoder::new(bytes.as_slice()))
        } else {
            serde_json::from_slice(&bytes)
        };
        let raw: XgbModelJson = parsed.map_err(|source| ArtifactLoadError::Parse {
            path: path.to_path_buf(),
            source,
        })?;

        let ens = Self::from_json(raw).map_err(|reason| ArtifactLoadError::malformed(path, reason))?;
        tracing::info!(
            path = %path.display(),
            trees = ens.trees.len(),
            num_feature = ens.num_feature,
            base_score = ens.base_score,
            "loaded xgboost ensemble"
        );
        Ok(ens)
    }

    pub fn from_json_str(s: &str) -> Result<Self, String> {
        let raw: XgbModelJson = serde_json::from_str(s).map_err(|e| e.to_string())?;
        Self::from_json(raw)
    }

    fn from_json(raw: XgbModelJson) -> Result<Self, String> {
        let learner = raw.learner;

        if learner.gradient_booster.name != "gbtree" {
            return Err(format!(
                "unsupported booster `{}` (only gbtree)",
                learner.gradient_booster.name
            ));
        }
        let objective = Objective::parse(&learner.objective.name).ok_or_else(|| {
            format!(
                "unsupported objective `{}` (need binary:logistic or reg:logistic)",
                learner.objective.name
            )
        })?;

        let params = &learner.learner_model_param;
        let num_class = parse_param(params.num_class.as_deref()).unwrap_or(0.0);
        if num_class > 1.0 {
            return Err(format!("multi-class model (num_class={num_class})"));
        }
        let base_score = parse_param(params.base_score.as_deref()).unwrap_or(0.5) as f32;

        if learner.feature_types.iter().any(|t| t == "c") {
            return Err("categorical feature types are not supported".into());
        }

        let model = learner
            .gradient_booster
            .model
            .ok_or("gbtree model body missing")?;
        if model.tree_info.iter().any(|&g| g != 0) {
            return Err("trees assigned to more than one output group".into());
        }

        // feature_names is empty for models fit on a bare array; num_feature decides the width
        let num_feature = match parse_param(params.num_feature.as_deref()) {
            Some(n) if n >= 0.0 => n as usize,
            _ => learner.feature_names.len(),
        };
        if !learner.feature_names.is_empty() && learner.feature_names.len() != num_feature {
            return Err(format!(
                "feature_names has {} entries, num_feature={num_feature}",
                learner.feature_names.len()
            ));
        }

        let mut trees = Vec::with_capacity(model.trees.len());
        for (t, tj) in model.trees.into_iter().enumerate() {
            let tree = convert_tree(tj).map_err(|e| format!("tree {t}: {e}"))?;
            tree.validate(num_feature)
                .map_err(|e| format!("tree {t}: {e}"))?;
            trees.push(tree);
        }

        if !(base_score > 0.0 && base_score < 1.0) {
            return Err(format!("base_score {base_score} outside (0, 1)"));
        }

        tracing::debug!(version = ?raw.version, "parsed xgboost json");

        Ok(Self {
            trees,
            base_score,
            base_margin: logit(base_score as f64) as f32,
            num_feature,
            feature_names: learner.feature_names,
            objective,
        })
    }

    pub fn num_feature(&self) -> usize {
        self.num_feature
    }

    pub fn num_trees(&self) -> usize {
        self.trees.len()
    }

    /// Feature names stored in the model; empty when it was fit on a bare array.
    pub fn feature_names(&self) -> &[String] {
        &self.feature_names
    }

    pub fn objective(&self) -> &Objective {
        &self.objective
    }

    pub fn base_score(&self) -> f32 {
        self.base_score
    }

    /// Raw margin: base margin plus the leaf of every tree, accumulated in `f32`
    /// like XGBoost's predictor.
    pub fn margin(&self, row: &[f32]) -> Result<f32, SchemaMismatchError> {
        if row.len() != self.num_feature {
            return Err(SchemaMismatchError::Length {
                expected: self.num_feature,
                actual: row.len(),
            });
        }
        Ok(self
            .trees
            .iter()
            .fold(self.base_margin, |acc, t| acc + t.leaf_value(row)))
    }

    /// Positive-class probability.
    pub fn predict_proba(&self, row: &[f32]) -> Result<f64, SchemaMismatchError> {
        Ok(sigmoid(self.margin(row)? as f64))
    }
}

/// XGBoost stores scalar params as strings, e.g. `"5E-1"` or `"[5E-1]"` (3.x).
fn parse_param(v: Option<&str>) -> Option<f64> {
    let s = v?.trim().trim_start_matches('[').trim_end_matches(']').trim();
    s.parse::<f64>().ok()
}

fn convert_tree(t: TreeJson) -> Result<Tree, String> {
    let n = t.left_children.len();
    if t.right_children.len() != n
        || t.split_indices.len() != n
        || t.split_conditions.len() != n
        || t.default_left.len() != n
    {
        return Err("node arrays have different lengths".into());
    }
    if t.split_type.iter().any(|&s| s != 0) {
        return Err("categorical splits are not supported".into());
    }

    let mut nodes = Vec::with_capacity(n);
    for i in 0..n {
        let (l, r) = (t.left_children[i], t.right_children[i]);
        if l == -1 {
            nodes.push(Node::Leaf {
                value: t.split_conditions[i],
            });
            continue;
        }
        let to_u32 = |v: i64, what: &str| {
            u32::try_from(v).map_err(|_| format!("node {i}: bad {what} {v}"))
        };
        nodes.push(Node::Split {
            feature: to_u32(t.split_indices[i], "split index")?,
            threshold: t.split_conditions[i],
            left: to_u32(l, "left child")?,
            right: to_u32(r, "right child")?,
            default_left: t.default_left[i].is_set(),
        });
    }
    Ok(Tree::new(nodes))
}
