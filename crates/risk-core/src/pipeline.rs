use std::sync::Arc;
use std::time::Instant;

use uuid::Uuid;

use crate::{
    codebook::Covariate,
    config::Config,
    encoder::{FeatureEncoder, FeatureVector, MissingPolicy},
    error::RiskError,
    profile::RiskProfile,
    schema::{CovariateInfo, RiskScore, ScoreRequest, ScoreResponse, SchemaInfo, TimingsUs},
    scorer::RiskScorer,
    util::now_us,
};

/// Encoder + shared scorer. Cheap to clone; every clone points at the same model.
#[derive(Debug, Clone)]
pub struct AppCore {
    pub encoder: FeatureEncoder,
    pub scorer: Arc<RiskScorer>,
}

impl AppCore {
    /// Load the artifacts named by `cfg`. Any failure here is startup-fatal.
    pub fn load(cfg: &Config) -> Result<Self, RiskError> {
        let mut scorer = RiskScorer::load_from_dir(&cfg.model_dir)?;
        if let Some(t) = cfg.threshold_override {
            scorer = scorer.with_threshold(t)?;
        }
        Self::from_scorer(Arc::new(scorer), cfg.missing_policy)
    }

    pub fn from_scorer(scorer: Arc<RiskScorer>, policy: MissingPolicy) -> Result<Self, RiskError> {
        let encoder = FeatureEncoder::new(Arc::clone(scorer.schema()), policy)?;
        Ok(Self { encoder, scorer })
    }

    pub fn threshold(&self) -> f64 {
        self.scorer.threshold()
    }

    /// Selections in, probability and decision out.
    pub fn score_request(&self, req: &ScoreRequest) -> Result<ScoreResponse, RiskError> {
        let trace_id = req.trace_id.unwrap_or_else(Uuid::new_v4);
        let _span = tracing::debug_span!("score_request", %trace_id).entered();
        let t0 = Instant::now();

        let t_enc = Instant::now();
        let encoded = self
            .encoder
            .encode(req.selections.iter().map(|(k, v)| (k.as_str(), *v)));
        let encode_us = now_us(t_enc);
        metrics::histogram!("stage_encode_us").record(encode_us as f64);
        let vector = encoded.map_err(|e| self.record_error(e.into()))?;

        self.finish(trace_id, t0, encode_us, &vector)
    }

    pub fn score_profile(&self, profile: &RiskProfile) -> Result<ScoreResponse, RiskError> {
        let t0 = Instant::now();
        let vector = self.encoder.encode_profile(profile);
        let encode_us = now_us(t0);
        metrics::histogram!("stage_encode_us").record(encode_us as f64);
        self.finish(Uuid::new_v4(), t0, encode_us, &vector)
    }

    /// Raw model-ordered row (already encoded by the caller).
    pub fn score_vector(
        &self,
        trace_id: Option<Uuid>,
        row: &[f64],
    ) -> Result<ScoreResponse, RiskError> {
        let trace_id = trace_id.unwrap_or_else(Uuid::new_v4);
        let t0 = Instant::now();
        let score = self.scorer.score(row).map_err(|e| self.record_error(e))?;
        let score_us = now_us(t0);
        metrics::histogram!("stage_score_us").record(score_us as f64);
        Ok(self.respond(trace_id, t0, 0, score_us, score))
    }

    fn finish(
        &self,
        trace_id: Uuid,
        t0: Instant,
        encode_us: u64,
        vector: &FeatureVector,
    ) -> Result<ScoreResponse, RiskError> {
        let t_score = Instant::now();
        let score = self
            .scorer
            .score_vector(vector)
            .map_err(|e| self.record_error(e))?;
        let score_us = now_us(t_score);
        metrics::histogram!("stage_score_us").record(score_us as f64);
        Ok(self.respond(trace_id, t0, encode_us, score_us, score))
    }

    fn respond(
        &self,
        trace_id: Uuid,
        t0: Instant,
        encode_us: u64,
        score_us: u64,
        score: RiskScore,
    ) -> ScoreResponse {
        metrics::counter!("score_total").increment(1);
        if score.is_high_risk {
            metrics::counter!("score_high_risk_total").increment(1);
        }
        let total = now_us(t0);
        metrics::histogram!("e2e_us").record(total as f64);

        tracing::debug!(
            %trace_id,
            probability = score.probability,
            is_high_risk = score.is_high_risk,
            "scored"
        );

        ScoreResponse {
            trace_id,
            probability: score.probability,
            is_high_risk: score.is_high_risk,
            threshold: score.threshold,
            timings_us: TimingsUs {
                encode: encode_us,
                score: score_us,
                total,
            },
        }
    }

    fn record_error(&self, e: RiskError) -> RiskError {
        let kind = e.kind().as_str();
        metrics::counter!("score_error_total", "kind" => kind).increment(1);
        tracing::info!(kind, error = %e, "score request failed");
        e
    }

    /// Model columns plus the codebook, for whoever renders the form.
    pub fn schema_info(&self) -> SchemaInfo {
        let required: Vec<Covariate> = self.encoder.required().collect();
        let reject = self.encoder.policy() == MissingPolicy::Reject;
        SchemaInfo {
            feature_names: self.scorer.schema().names().to_vec(),
            threshold: self.scorer.threshold(),
            missing_policy: self.encoder.policy(),
            covariates: Covariate::ALL
                .into_iter()
                .map(|c| CovariateInfo::new(c, reject && required.contains(&c)))
                .collect(),
        }
    }
}
