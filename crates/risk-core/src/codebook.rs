//! BCSC covariate codebook.
//!
//! Active coding scheme: the BCSC risk-factor codebook with `9 = Unknown`
//! on every covariate except age group (where 9 is the 65-69 band).
//! Codes must match the ones the model was trained with bit for bit.
//! The "no unknown" variant of the codebook is not supported.

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Sentinel code for "Unknown" in the active codebook.
pub const UNKNOWN_CODE: i64 = 9;

macro_rules! codebook_enum {
    (
        $(#[$meta:meta])*
        $name:ident {
            $( $variant:ident = $code:literal => $label:literal ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(try_from = "i64", into = "i64")]
        pub enum $name {
            $( $variant ),+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$( $name::$variant ),+];
            pub const CODES: &'static [i64] = &[$( $code ),+];

            #[inline]
            pub fn code(self) -> i64 {
                match self {
                    $( $name::$variant => $code ),+
                }
            }

            pub fn label(self) -> &'static str {
                match self {
                    $( $name::$variant => $label ),+
                }
            }

            pub fn from_code(code: i64) -> Option<Self> {
                match code {
                    $( $code => Some($name::$variant), )+
                    _ => None,
                }
            }
        }

        impl From<$name> for i64 {
            fn from(v: $name) -> i64 {
                v.code()
            }
        }

        impl TryFrom<i64> for $name {
            type Error = String;

            fn try_from(code: i64) -> Result<Self, Self::Error> {
                Self::from_code(code).ok_or_else(|| {
                    format!("invalid {} code {code} (valid: {:?})", stringify!($name), Self::CODES)
                })
            }
        }
    };
}

codebook_enum! {
    /// `age_group_5_years`
    AgeGroup {
        Age18To29 = 1 => "18-29",
        Age30To34 = 2 => "30-34",
        Age35To39 = 3 => "35-39",
        Age40To44 = 4 => "40-44",
        Age45To49 = 5 => "45-49",
        Age50To54 = 6 => "50-54",
        Age55To59 = 7 => "55-59",
        Age60To64 = 8 => "60-64",
        Age65To69 = 9 => "65-69",
        Age70To74 = 10 => "70-74",
        Age75To79 = 11 => "75-79",
        Age80To84 = 12 => "80-84",
        Age85Plus = 13 => ">=85",
    }
}

codebook_enum! {
    RaceEthnicity {
        NonHispanicWhite = 1 => "Non-Hispanic white",
        NonHispanicBlack = 2 => "Non-Hispanic black",
        AsianPacificIslander = 3 => "Asian/Pacific Islander",
        NativeAmerican = 4 => "Native American",
        Hispanic = 5 => "Hispanic",
        OtherMixed = 6 => "Other/mixed",
        Unknown = 9 => "Unknown",
    }
}

codebook_enum! {
    /// Shared by family history, hormone therapy use and biopsy history.
    YesNoUnknown {
        No = 0 => "No",
        Yes = 1 => "Yes",
        Unknown = 9 => "Unknown",
    }
}

codebook_enum! {
    AgeMenarche {
        AtLeast14 = 0 => ">=14",
        From12To13 = 1 => "12-13",
        Under12 = 2 => "<12",
        Unknown = 9 => "Unknown",
    }
}

codebook_enum! {
    AgeFirstBirth {
        Under20 = 0 => "<20",
        From20To24 = 1 => "20-24",
        From25To29 = 2 => "25-29",
        AtLeast30 = 3 => ">=30",
        Nulliparous = 4 => "Nulliparous",
        Unknown = 9 => "Unknown",
    }
}

codebook_enum! {
    /// BI-RADS breast density.
    BreastDensity {
        AlmostEntirelyFat = 1 => "Almost entirely fat",
        ScatteredFibroglandular = 2 => "Scattered fibroglandular",
        HeterogeneouslyDense = 3 => "Heterogeneously dense",
        ExtremelyDense = 4 => "Extremely dense",
        Unknown = 9 => "Unknown",
    }
}

codebook_enum! {
    MenopausalStatus {
        PrePeri = 1 => "Pre-/peri-menopausal",
        Post = 2 => "Post-menopausal",
        Surgical = 3 => "Surgical menopause",
        Unknown = 9 => "Unknown",
    }
}

codebook_enum! {
    BmiGroup {
        Under25 = 1 => "10-24.99",
        From25To30 = 2 => "25-29.99",
        From30To35 = 3 => "30-34.99",
        AtLeast35 = 4 => ">=35",
        Unknown = 9 => "Unknown",
    }
}

/// One clinical/demographic input of the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Covariate {
    AgeGroup,
    RaceEthnicity,
    FamilyHistory,
    AgeMenarche,
    AgeFirstBirth,
    BreastDensity,
    HormoneUse,
    MenopausalStatus,
    BmiGroup,
    BiopsyHistory,
}

impl Covariate {
    pub const COUNT: usize = 10;

    pub const ALL: [Covariate; Self::COUNT] = [
        Covariate::AgeGroup,
        Covariate::RaceEthnicity,
        Covariate::FamilyHistory,
        Covariate::AgeMenarche,
        Covariate::AgeFirstBirth,
        Covariate::BreastDensity,
        Covariate::HormoneUse,
        Covariate::MenopausalStatus,
        Covariate::BmiGroup,
        Covariate::BiopsyHistory,
    ];

    #[inline]
    pub fn index(self) -> usize {
        self as usize
    }

    /// Caller-facing key.
    pub fn key(self) -> &'static str {
        match self {
            Self::AgeGroup => "age_group",
            Self::RaceEthnicity => "race_eth",
            Self::FamilyHistory => "family_history",
            Self::AgeMenarche => "age_menarche",
            Self::AgeFirstBirth => "age_first_birth",
            Self::BreastDensity => "density",
            Self::HormoneUse => "hormone_use",
            Self::MenopausalStatus => "menopausal_status",
            Self::BmiGroup => "bmi_group",
            Self::BiopsyHistory => "personal_biopsy",
        }
    }

    /// Column name in the BCSC training data (and the model's feature names).
    pub fn feature_name(self) -> &'static str {
        match self {
            Self::AgeGroup => "age_group_5_years",
            Self::RaceEthnicity => "race_eth",
            Self::FamilyHistory => "first_degree_hx",
            Self::AgeMenarche => "age_menarche",
            Self::AgeFirstBirth => "age_first_birth",
            Self::BreastDensity => "BIRADS_breast_density",
            Self::HormoneUse => "current_hrt",
            Self::MenopausalStatus => "menopaus",
            Self::BmiGroup => "bmi_group",
            Self::BiopsyHistory => "biophx",
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            Self::AgeGroup => "Age group",
            Self::RaceEthnicity => "Race/ethnicity",
            Self::FamilyHistory => "First-degree family history",
            Self::AgeMenarche => "Age at menarche",
            Self::AgeFirstBirth => "Age at first birth",
            Self::BreastDensity => "BI-RADS density",
            Self::HormoneUse => "Current hormone therapy use",
            Self::MenopausalStatus => "Menopausal status",
            Self::BmiGroup => "BMI group",
            Self::BiopsyHistory => "Biopsy history",
        }
    }

    pub fn codes(self) -> &'static [i64] {
        match self {
            Self::AgeGroup => AgeGroup::CODES,
            Self::RaceEthnicity => RaceEthnicity::CODES,
            Self::FamilyHistory | Self::HormoneUse | Self::BiopsyHistory => YesNoUnknown::CODES,
            Self::AgeMenarche => AgeMenarche::CODES,
            Self::AgeFirstBirth => AgeFirstBirth::CODES,
            Self::BreastDensity => BreastDensity::CODES,
            Self::MenopausalStatus => MenopausalStatus::CODES,
            Self::BmiGroup => BmiGroup::CODES,
        }
    }

    pub fn label(self, code: i64) -> Option<&'static str> {
        match self {
            Self::AgeGroup => AgeGroup::from_code(code).map(AgeGroup::label),
            Self::RaceEthnicity => RaceEthnicity::from_code(code).map(RaceEthnicity::label),
            Self::FamilyHistory | Self::HormoneUse | Self::BiopsyHistory => {
                YesNoUnknown::from_code(code).map(YesNoUnknown::label)
            }
            Self::AgeMenarche => AgeMenarche::from_code(code).map(AgeMenarche::label),
            Self::AgeFirstBirth => AgeFirstBirth::from_code(code).map(AgeFirstBirth::label),
            Self::BreastDensity => BreastDensity::from_code(code).map(BreastDensity::label),
            Self::MenopausalStatus => MenopausalStatus::from_code(code).map(MenopausalStatus::label),
            Self::BmiGroup => BmiGroup::from_code(code).map(BmiGroup::label),
        }
    }

    /// `(code, label)` pairs in codebook order.
    pub fn options(self) -> Vec<(i64, &'static str)> {
        self.codes()
            .iter()
            .filter_map(|&c| self.label(c).map(|l| (c, l)))
            .collect()
    }

    #[inline]
    pub fn is_valid(self, code: i64) -> bool {
        self.codes().contains(&code)
    }

    pub fn has_unknown(self) -> bool {
        self != Self::AgeGroup
    }

    pub fn validate(self, code: i64) -> Result<i64, ValidationError> {
        if self.is_valid(code) {
            Ok(code)
        } else {
            Err(ValidationError::InvalidCode {
                covariate: self.key(),
                code,
                valid: self.codes(),
            })
        }
    }

    /// Label -> code, ignoring ASCII case and surrounding whitespace.
    pub fn code_for_label(self, label: &str) -> Result<i64, ValidationError> {
        let want = label.trim();
        self.options()
            .into_iter()
            .find(|(_, l)| l.eq_ignore_ascii_case(want))
            .map(|(c, _)| c)
            .ok_or_else(|| ValidationError::UnknownLabel {
                covariate: self.key(),
                label: label.to_string(),
            })
    }

    /// Accepts the caller key or the model feature name.
    pub fn lookup(name: &str) -> Option<Covariate> {
        Self::ALL
            .into_iter()
            .find(|c| c.key() == name || c.feature_name() == name)
    }

    pub fn from_feature_name(name: &str) -> Option<Covariate> {
        Self::ALL.into_iter().find(|c| c.feature_name() == name)
    }
}

impl std::fmt::Display for Covariate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.key())
    }
}
