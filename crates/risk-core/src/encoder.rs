//! Covariate selections -> model-ordered feature vector.
//!
//! The column order always comes from the loaded model ([`FeatureSchema`]),
//! never from the order of the caller's input. A vector built for one schema
//! is tagged with it, so the scorer can refuse a vector built for another.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::codebook::Covariate;
use crate::error::{SchemaMismatchError, ValidationError};
use crate::profile::{collect_selections, RiskProfile};

/// Value written for a missing covariate under [`MissingPolicy::FillDefault`].
pub const DEFAULT_FILL: f64 = 0.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissingPolicy {
    /// Missing covariates are a [`ValidationError`].
    #[default]
    Reject,
    /// Missing covariates become [`DEFAULT_FILL`] (legacy dashboard behaviour).
    ///
    /// Model columns outside the codebook (e.g. `year`) are also written as
    /// [`DEFAULT_FILL`], even when the caller sends a value for them: only
    /// codebook-validated codes ever reach the model.
    FillDefault,
}

impl std::str::FromStr for MissingPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "reject" => Ok(Self::Reject),
            "fill_default" | "fill" => Ok(Self::FillDefault),
            other => Err(format!("unknown missing policy `{other}` (reject | fill_default)")),
        }
    }
}

/// Ordered feature names the model was fit with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FeatureSchema {
    names: Vec<String>,
}

impl FeatureSchema {
    pub fn new(names: Vec<String>) -> Self {
        Self { names }
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.names.iter().position(|n| n == name)
    }

    /// First column where `self` and `other` disagree.
    pub fn check_same(&self, other: &FeatureSchema) -> Result<(), SchemaMismatchError> {
        if self.len() != other.len() {
            return Err(SchemaMismatchError::Length {
                expected: self.len(),
                actual: other.len(),
            });
        }
        match self
            .names
            .iter()
            .zip(other.names.iter())
            .position(|(a, b)| a != b)
        {
            None => Ok(()),
            Some(position) => Err(SchemaMismatchError::Order {
                position,
                expected: self.names[position].clone(),
                actual: other.names[position].clone(),
            }),
        }
    }
}

/// Model-ordered features, tagged with the schema they were built for.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureVector {
    schema: Arc<FeatureSchema>,
    values: Vec<f64>,
}

impl FeatureVector {
    pub fn schema(&self) -> &Arc<FeatureSchema> {
        &self.schema
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// `(feature name, value)` pairs in model order.
    pub fn named(&self) -> impl Iterator<Item = (&str, f64)> + '_ {
        self.schema
            .names()
            .iter()
            .map(String::as_str)
            .zip(self.values.iter().copied())
    }

    pub fn into_values(self) -> Vec<f64> {
        self.values
    }
}

#[derive(Debug, Clone)]
pub struct FeatureEncoder {
    schema: Arc<FeatureSchema>,
    /// covariate feeding each model column; `None` = column outside the codebook
    columns: Vec<Option<Covariate>>,
    policy: MissingPolicy,
}

impl FeatureEncoder {
    pub fn new(
        schema: Arc<FeatureSchema>,
        policy: MissingPolicy,
    ) -> Result<Self, SchemaMismatchError> {
        let mut columns = Vec::with_capacity(schema.len());
        for name in schema.names() {
            let cov = Covariate::from_feature_name(name);
            if cov.is_none() {
                match policy {
                    MissingPolicy::Reject => {
                        return Err(SchemaMismatchError::UnknownFeature {
                            feature: name.clone(),
                        })
                    }
                    MissingPolicy::FillDefault => {
                        tracing::warn!(
                            feature = %name,
                            fill = DEFAULT_FILL,
                            "model feature outside the codebook, always filled with default"
                        );
                    }
                }
            }
            columns.push(cov);
        }
        Ok(Self {
            schema,
            columns,
            policy,
        })
    }

    pub fn schema(&self) -> &Arc<FeatureSchema> {
        &self.schema
    }

    pub fn policy(&self) -> MissingPolicy {
        self.policy
    }

    /// Covariates the model actually consumes, in model order.
    pub fn required(&self) -> impl Iterator<Item = Covariate> + '_ {
        self.columns.iter().filter_map(|c| *c)
    }

    /// Encode `(name, code)` pairs. Names may be caller keys or model feature
    /// names; anything else is dropped. Input order is irrelevant.
    pub fn encode<I, K>(&self, selections: I) -> Result<FeatureVector, ValidationError>
    where
        I: IntoIterator<Item = (K, i64)>,
        K: AsRef<str>,
    {
        let slots = collect_selections(selections)?;

        if self.policy == MissingPolicy::Reject {
            let missing: Vec<&'static str> = self
                .required()
                .filter(|c| slots[c.index()].is_none())
                .map(Covariate::key)
                .collect();
            if !missing.is_empty() {
                return Err(ValidationError::MissingCovariates { keys: missing });
            }
        }

        let values = self
            .columns
            .iter()
            .map(|col| {
                col.and_then(|c| slots[c.index()])
                    .map_or(DEFAULT_FILL, |code| code as f64)
            })
            .collect();

        Ok(FeatureVector {
            schema: Arc::clone(&self.schema),
            values,
        })
    }

    /// A profile is complete by construction, so this cannot fail.
    pub fn encode_profile(&self, profile: &RiskProfile) -> FeatureVector {
        let values = self
            .columns
            .iter()
            .map(|col| col.map_or(DEFAULT_FILL, |c| profile.code(c) as f64))
            .collect();
        FeatureVector {
            schema: Arc::clone(&self.schema),
            values,
        }
    }

    /// Encode with labels instead of codes (`"Yes"`, `"Unknown"`, ...).
    pub fn encode_labels<I, K, L>(&self, selections: I) -> Result<FeatureVector, ValidationError>
    where
        I: IntoIterator<Item = (K, L)>,
        K: AsRef<str>,
        L: AsRef<str>,
    {
        let mut coded = Vec::new();
        for (name, label) in selections {
            if let Some(cov) = Covariate::lookup(name.as_ref()) {
                coded.push((cov.key(), cov.code_for_label(label.as_ref())?));
            }
        }
        self.encode(coded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{BTreeMap, HashMap};

    /// BCSC column order (differs from the codebook order on purpose).
    fn bcsc_schema() -> Arc<FeatureSchema> {
        Arc::new(FeatureSchema::new(
            [
                "age_group_5_years",
                "race_eth",
                "first_degree_hx",
                "age_menarche",
                "age_first_birth",
                "BIRADS_breast_density",
                "current_hrt",
                "menopaus",
                "bmi_group",
                "biophx",
            ]
            .map(String::from)
            .to_vec(),
        ))
    }

    fn example() -> Vec<(&'static str, i64)> {
        vec![
            ("age_group", 6),
            ("race_eth", 1),
            ("age_menarche", 1),
            ("age_first_birth", 2),
            ("family_history", 0),
            ("personal_biopsy", 0),
            ("density", 2),
            ("hormone_use", 0),
            ("menopausal_status", 2),
            ("bmi_group", 2),
        ]
    }

    #[test]
    fn encodes_in_model_column_order() {
        let enc = FeatureEncoder::new(bcsc_schema(), MissingPolicy::Reject).unwrap();
        let v = enc.encode(example()).unwrap();
        assert_eq!(
            v.values(),
            &[6.0, 1.0, 0.0, 1.0, 2.0, 2.0, 0.0, 2.0, 2.0, 0.0]
        );
        let named: HashMap<&str, f64> = v.named().collect();
        assert_eq!(named["BIRADS_breast_density"], 2.0);
        assert_eq!(named["first_degree_hx"], 0.0);
    }

    #[test]
    fn map_types_and_orders_do_not_matter() {
        let enc = FeatureEncoder::new(bcsc_schema(), MissingPolicy::Reject).unwrap();
        let from_vec = enc.encode(example()).unwrap();
        let hm: HashMap<String, i64> = example().into_iter().map(|(k, v)| (k.to_string(), v)).collect();
        let bt: BTreeMap<&str, i64> = example().into_iter().collect();
        let mut rev = example();
        rev.reverse();

        assert_eq!(enc.encode(hm).unwrap(), from_vec);
        assert_eq!(enc.encode(bt).unwrap(), from_vec);
        assert_eq!(enc.encode(rev).unwrap(), from_vec);
    }

    #[test]
    fn unexpected_keys_are_dropped() {
        let enc = FeatureEncoder::new(bcsc_schema(), MissingPolicy::Reject).unwrap();
        let mut input = example();
        input.push(("year", 2009));
        input.push(("count", 17));
        assert_eq!(enc.encode(input).unwrap(), enc.encode(example()).unwrap());
    }

    #[test]
    fn reject_policy_names_missing_covariates_in_model_order() {
        let enc = FeatureEncoder::new(bcsc_schema(), MissingPolicy::Reject).unwrap();
        let partial: Vec<_> = example()
            .into_iter()
            .filter(|(k, _)| !matches!(*k, "personal_biopsy" | "family_history"))
            .collect();
        for _ in 0..3 {
            assert_eq!(
                enc.encode(partial.clone()).unwrap_err(),
                ValidationError::MissingCovariates {
                    keys: vec!["family_history", "personal_biopsy"]
                }
            );
        }
    }

    #[test]
    fn fill_policy_zero_fills_consistently() {
        let enc = FeatureEncoder::new(bcsc_schema(), MissingPolicy::FillDefault).unwrap();
        let partial = vec![("age_group", 13), ("density", 4)];
        let a = enc.encode(partial.clone()).unwrap();
        let b = enc.encode(partial).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.values(), &[13.0, 0.0, 0.0, 0.0, 0.0, 4.0, 0.0, 0.0, 0.0, 0.0]);
    }

    #[test]
    fn invalid_code_fails_before_anything_else() {
        let enc = FeatureEncoder::new(bcsc_schema(), MissingPolicy::FillDefault).unwrap();
        let err = enc.encode(vec![("density", 5)]).unwrap_err();
        assert!(matches!(err, ValidationError::InvalidCode { covariate: "density", code: 5, .. }));
    }

    #[test]
    fn unknown_model_feature_depends_on_policy() {
        let mut names = bcsc_schema().names().to_vec();
        names.push("year".into());
        let schema = Arc::new(FeatureSchema::new(names));

        let err = FeatureEncoder::new(Arc::clone(&schema), MissingPolicy::Reject).unwrap_err();
        assert_eq!(
            err,
            SchemaMismatchError::UnknownFeature {
                feature: "year".into()
            }
        );

        let enc = FeatureEncoder::new(schema, MissingPolicy::FillDefault).unwrap();
        let v = enc.encode(example()).unwrap();
        assert_eq!(v.len(), 11);
        assert_eq!(v.values()[10], DEFAULT_FILL);

        // a supplied value for that column is not validated, so it is not used
        let mut with_year = example();
        with_year.push(("year", 2009));
        let v = enc.encode(with_year).unwrap();
        assert_eq!(v.values()[10], DEFAULT_FILL);
        assert_eq!(v.values()[..10], enc.encode(example()).unwrap().values()[..10]);
    }

    #[test]
    fn labels_resolve_to_codes() {
        let enc = FeatureEncoder::new(bcsc_schema(), MissingPolicy::Reject).unwrap();
        let by_label = enc
            .encode_labels(vec![
                ("age_group", "50-54"),
                ("race_eth", "Non-Hispanic white"),
                ("age_menarche", "12-13"),
                ("age_first_birth", "25-29"),
                ("family_history", "No"),
                ("personal_biopsy", "No"),
                ("density", "Scattered fibroglandular"),
                ("hormone_use", "No"),
                ("menopausal_status", "Post-menopausal"),
                ("bmi_group", "25-29.99"),
            ])
            .unwrap();
        assert_eq!(by_label, enc.encode(example()).unwrap());
    }

    #[test]
    fn profile_encoding_matches_selection_encoding() {
        let enc = FeatureEncoder::new(bcsc_schema(), MissingPolicy::Reject).unwrap();
        let profile = RiskProfile::from_selections(example()).unwrap();
        assert_eq!(enc.encode_profile(&profile), enc.encode(example()).unwrap());
    }

    #[test]
    fn schema_check_reports_first_difference() {
        let a = bcsc_schema();
        let mut swapped = a.names().to_vec();
        swapped.swap(3, 4);
        let b = FeatureSchema::new(swapped);
        assert_eq!(
            a.check_same(&b),
            Err(SchemaMismatchError::Order {
                position: 3,
                expected: "age_menarche".into(),
                actual: "age_first_birth".into(),
            })
        );
        assert_eq!(a.check_same(&a), Ok(()));
    }

    #[test]
    fn missing_policy_parses() {
        assert_eq!("reject".parse::<MissingPolicy>(), Ok(MissingPolicy::Reject));
        assert_eq!("FILL_DEFAULT".parse::<MissingPolicy>(), Ok(MissingPolicy::FillDefault));
        assert!("zero".parse::<MissingPolicy>().is_err());
    }
}
