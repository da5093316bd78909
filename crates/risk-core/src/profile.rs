use serde::{Deserialize, Serialize};

use crate::codebook::{
    AgeFirstBirth, AgeGroup, AgeMenarche, BmiGroup, BreastDensity, Covariate, MenopausalStatus,
    RaceEthnicity, YesNoUnknown,
};
use crate::error::ValidationError;

/// Validated covariate record: one field per covariate, each restricted to
/// its codebook at the type level.
///
/// Serialized with the caller-facing keys and integer codes, e.g.
/// `{"age_group": 6, "race_eth": 1, ...}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RiskProfile {
    pub age_group: AgeGroup,
    pub race_eth: RaceEthnicity,
    pub family_history: YesNoUnknown,
    pub age_menarche: AgeMenarche,
    pub age_first_birth: AgeFirstBirth,
    pub density: BreastDensity,
    pub hormone_use: YesNoUnknown,
    pub menopausal_status: MenopausalStatus,
    pub bmi_group: BmiGroup,
    pub personal_biopsy: YesNoUnknown,
}

impl RiskProfile {
    pub fn code(&self, covariate: Covariate) -> i64 {
        match covariate {
            Covariate::AgeGroup => self.age_group.code(),
            Covariate::RaceEthnicity => self.race_eth.code(),
            Covariate::FamilyHistory => self.family_history.code(),
            Covariate::AgeMenarche => self.age_menarche.code(),
            Covariate::AgeFirstBirth => self.age_first_birth.code(),
            Covariate::BreastDensity => self.density.code(),
            Covariate::HormoneUse => self.hormone_use.code(),
            Covariate::MenopausalStatus => self.menopausal_status.code(),
            Covariate::BmiGroup => self.bmi_group.code(),
            Covariate::BiopsyHistory => self.personal_biopsy.code(),
        }
    }

    /// `(key, code)` pairs in codebook order.
    pub fn selections(&self) -> Vec<(&'static str, i64)> {
        Covariate::ALL
            .into_iter()
            .map(|c| (c.key(), self.code(c)))
            .collect()
    }

    /// Build a complete profile from loose `(name, code)` pairs.
    ///
    /// Every covariate is required here; names may be keys or feature names.
    /// Unrecognised names are ignored.
    pub fn from_selections<I, K>(selections: I) -> Result<Self, ValidationError>
    where
        I: IntoIterator<Item = (K, i64)>,
        K: AsRef<str>,
    {
        let slots = collect_selections(selections)?;
        let missing: Vec<&'static str> = Covariate::ALL
            .into_iter()
            .filter(|c| slots[c.index()].is_none())
            .map(Covariate::key)
            .collect();
        if !missing.is_empty() {
            return Err(ValidationError::MissingCovariates { keys: missing });
        }

        let pick = |c: Covariate| slots[c.index()].unwrap_or_default();
        Ok(Self {
            age_group: typed(Covariate::AgeGroup, pick, AgeGroup::from_code)?,
            race_eth: typed(Covariate::RaceEthnicity, pick, RaceEthnicity::from_code)?,
            family_history: typed(Covariate::FamilyHistory, pick, YesNoUnknown::from_code)?,
            age_menarche: typed(Covariate::AgeMenarche, pick, AgeMenarche::from_code)?,
            age_first_birth: typed(Covariate::AgeFirstBirth, pick, AgeFirstBirth::from_code)?,
            density: typed(Covariate::BreastDensity, pick, BreastDensity::from_code)?,
            hormone_use: typed(Covariate::HormoneUse, pick, YesNoUnknown::from_code)?,
            menopausal_status: typed(Covariate::MenopausalStatus, pick, MenopausalStatus::from_code)?,
            bmi_group: typed(Covariate::BmiGroup, pick, BmiGroup::from_code)?,
            personal_biopsy: typed(Covariate::BiopsyHistory, pick, YesNoUnknown::from_code)?,
        })
    }
}

fn typed<T>(
    covariate: Covariate,
    pick: impl Fn(Covariate) -> i64,
    from_code: fn(i64) -> Option<T>,
) -> Result<T, ValidationError> {
    let code = pick(covariate);
    from_code(code).ok_or(ValidationError::InvalidCode {
        covariate: covariate.key(),
        code,
        valid: covariate.codes(),
    })
}

/// Resolve `(name, code)` pairs into one validated slot per covariate.
///
/// Unknown names are dropped. A covariate seen twice must carry the same
/// code both times, so the result never depends on iteration order.
pub(crate) fn collect_selections<I, K>(
    selections: I,
) -> Result<[Option<i64>; Covariate::COUNT], ValidationError>
where
    I: IntoIterator<Item = (K, i64)>,
    K: AsRef<str>,
{
    let mut slots: [Option<i64>; Covariate::COUNT] = [None; Covariate::COUNT];
    for (name, code) in selections {
        let name = name.as_ref();
        let Some(cov) = Covariate::lookup(name) else {
            tracing::debug!(name, "dropping selection with no covariate in the codebook");
            continue;
        };
        let code = cov.validate(code)?;
        let slot = &mut slots[cov.index()];
        match *slot {
            Some(prev) if prev != code => {
                let (first, second) = (prev.min(code), prev.max(code));
                return Err(ValidationError::ConflictingSelection {
                    covariate: cov.key(),
                    first,
                    second,
                });
            }
            _ => *slot = Some(code),
        }
    }
    Ok(slots)
}
