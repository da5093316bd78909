use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::encoder::MissingPolicy;

/// Runtime configuration: optional JSON file, then environment overrides.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Directory holding the model, threshold and optional feature names
    pub model_dir: PathBuf,

    /// What to do with covariates the caller did not provide
    pub missing_policy: MissingPolicy,

    /// Pin the decision threshold instead of using the persisted one
    pub threshold_override: Option<f64>,

    /// HTTP listen address (server only)
    pub bind_addr: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            model_dir: PathBuf::from("models/bcsc_xgb"),
            missing_policy: MissingPolicy::Reject,
            threshold_override: None,
            bind_addr: "127.0.0.1:8080".to_string(),
        }
    }
}

pub const ENV_MODEL_DIR: &str = "BCSC_MODEL_DIR";
pub const ENV_MISSING_POLICY: &str = "BCSC_MISSING_POLICY";
pub const ENV_THRESHOLD: &str = "BCSC_THRESHOLD";
pub const ENV_BIND: &str = "BCSC_BIND";

impl Config {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let s = std::fs::read_to_string(path)
            .with_context(|| format!("read config: {}", path.display()))?;
        let cfg: Config = serde_json::from_str(&s)
            .with_context(|| format!("parse config: {}", path.display()))?;
        Ok(cfg)
    }

    /// Optional file, then environment overrides.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let base = match path {
            Some(p) => Self::from_file(p)?,
            None => Self::default(),
        };
        base.with_env_overrides(|k| std::env::var(k).ok())
    }

    /// `lookup` is `std::env::var` in production; tests pass a map.
    pub fn with_env_overrides<F>(mut self, lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup(ENV_MODEL_DIR) {
            self.model_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup(ENV_MISSING_POLICY) {
            self.missing_policy = v
                .parse()
                .map_err(|e: String| anyhow::anyhow!(e))
                .with_context(|| format!("{ENV_MISSING_POLICY}={v}"))?;
        }
        if let Some(v) = lookup(ENV_THRESHOLD) {
            let t: f64 = v
                .trim()
                .parse()
                .with_context(|| format!("{ENV_THRESHOLD}={v}"))?;
            self.threshold_override = Some(t);
        }
        if let Some(v) = lookup(ENV_BIND) {
            self.bind_addr = v;
        }
        Ok(self)
    }
}
