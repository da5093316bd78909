//! BCSC breast cancer risk scoring.
//!
//! Covariate selections go through the [`encoder::FeatureEncoder`] into a
//! model-ordered [`encoder::FeatureVector`], which the [`scorer::RiskScorer`]
//! turns into a probability and a thresholded decision.

pub mod codebook;
pub mod config;
pub mod encoder;
pub mod ensemble;
pub mod error;
pub mod evaluate;
pub mod pipeline;
pub mod profile;
pub mod schema;
pub mod scorer;
pub mod util;

pub use codebook::Covariate;
pub use encoder::{FeatureEncoder, FeatureSchema, FeatureVector, MissingPolicy};
pub use error::{
    ArtifactLoadError, FailureKind, InferenceError, RiskError, SchemaMismatchError,
    ValidationError,
};
pub use profile::RiskProfile;
pub use schema::RiskScore;
pub use scorer::RiskScorer;
