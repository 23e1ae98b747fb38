//! Outcome flags
//!
//! A flag is an immutable `(flag_id, value, target?, target_type?)` record.
//! Stages write flags to the per-query [`FlagStore`]; reporting reads them
//! back through the [`FlagEngine`], which attaches levels and text from the
//! [`FlagCatalog`] and computes summary flags that are never stored.

pub mod catalog;
pub mod engine;
pub mod store;

pub use catalog::{FlagCatalog, FlagText};
pub use engine::{FlagEngine, FlagEntry, FlagSet, RenderedFlag, TargetFlags};
pub use store::FlagStore;

use crate::models::TargetType;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Flag identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum FlagId {
    #[serde(rename = "1")]
    PositiveId,
    #[serde(rename = "2")]
    TaxaOfInterest,
    #[serde(rename = "4")]
    Sources,
    /// Summary of 5.1-5.3; computed at read time
    #[serde(rename = "5")]
    DbCoverage,
    #[serde(rename = "5.1")]
    DbCoverageTarget,
    #[serde(rename = "5.2")]
    DbCoverageRelated,
    #[serde(rename = "5.3")]
    DbCoverageCountry,
    #[serde(rename = "7")]
    PreliminaryId,
}

/// How flags of one id are keyed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlagFamily {
    /// One flag per query
    Single,
    /// One flag per target taxon
    ByTarget,
    /// One flag per (target type, target taxon)
    ByTargetType,
    /// Derived from other flags, never stored
    Summary,
}

impl FlagId {
    pub const ALL: [FlagId; 8] = [
        FlagId::PositiveId,
        FlagId::TaxaOfInterest,
        FlagId::Sources,
        FlagId::DbCoverage,
        FlagId::DbCoverageTarget,
        FlagId::DbCoverageRelated,
        FlagId::DbCoverageCountry,
        FlagId::PreliminaryId,
    ];

    pub fn code(&self) -> &'static str {
        match self {
            FlagId::PositiveId => "1",
            FlagId::TaxaOfInterest => "2",
            FlagId::Sources => "4",
            FlagId::DbCoverage => "5",
            FlagId::DbCoverageTarget => "5.1",
            FlagId::DbCoverageRelated => "5.2",
            FlagId::DbCoverageCountry => "5.3",
            FlagId::PreliminaryId => "7",
        }
    }

    pub fn family(&self) -> FlagFamily {
        match self {
            FlagId::PositiveId | FlagId::TaxaOfInterest | FlagId::PreliminaryId => FlagFamily::Single,
            FlagId::Sources => FlagFamily::ByTarget,
            FlagId::DbCoverageTarget | FlagId::DbCoverageRelated | FlagId::DbCoverageCountry => {
                FlagFamily::ByTargetType
            }
            FlagId::DbCoverage => FlagFamily::Summary,
        }
    }

    /// Values this flag can take; the catalogue must describe each one.
    pub fn values(&self) -> &'static [FlagValue] {
        use FlagValue::*;
        match self {
            FlagId::PositiveId => &[A, B, C, D, E],
            FlagId::TaxaOfInterest | FlagId::PreliminaryId => &[A, B, NA],
            FlagId::Sources => &[A, B],
            FlagId::DbCoverage
            | FlagId::DbCoverageTarget
            | FlagId::DbCoverageRelated
            | FlagId::DbCoverageCountry => &[A, B, C, NA, ERR],
        }
    }
}

impl fmt::Display for FlagId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[allow(clippy::upper_case_acronyms)]
pub enum FlagValue {
    A,
    B,
    C,
    D,
    E,
    NA,
    ERR,
}

impl fmt::Display for FlagValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FlagValue::A => "A",
            FlagValue::B => "B",
            FlagValue::C => "C",
            FlagValue::D => "D",
            FlagValue::E => "E",
            FlagValue::NA => "NA",
            FlagValue::ERR => "ERR",
        };
        f.write_str(s)
    }
}

/// A stored outcome record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Flag {
    pub flag_id: FlagId,
    pub value: FlagValue,
    #[serde(default)]
    pub target: Option<String>,
    #[serde(default)]
    pub target_type: Option<TargetType>,
}

impl Flag {
    pub fn new(flag_id: FlagId, value: FlagValue) -> Self {
        Self {
            flag_id,
            value,
            target: None,
            target_type: None,
        }
    }

    pub fn for_target(flag_id: FlagId, value: FlagValue, target: &str) -> Self {
        Self {
            target: Some(target.to_string()),
            ..Self::new(flag_id, value)
        }
    }

    pub fn for_typed_target(flag_id: FlagId, value: FlagValue, target: &str, target_type: TargetType) -> Self {
        Self {
            target: Some(target.to_string()),
            target_type: Some(target_type),
            ..Self::new(flag_id, value)
        }
    }

    /// Upsert key within a flag file
    pub fn same_key(&self, other: &Flag) -> bool {
        self.flag_id == other.flag_id && self.target == other.target && self.target_type == other.target_type
    }
}

impl fmt::Display for Flag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.flag_id, self.value)
    }
}

/// Report styling class for a flag level
pub fn level_class(level: u8) -> &'static str {
    match level {
        0 => "secondary",
        1 => "success",
        2 => "warning",
        _ => "danger",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flag_serializes_with_codes() {
        let flag = Flag::for_typed_target(FlagId::DbCoverageRelated, FlagValue::ERR, "Culex", TargetType::Toi);
        let json = serde_json::to_value(&flag).unwrap();
        assert_eq!(json["flag_id"], "5.2");
        assert_eq!(json["value"], "ERR");
        assert_eq!(json["target_type"], "toi");
        assert_eq!(flag.to_string(), "5.2ERR");
    }

    #[test]
    fn test_level_class() {
        assert_eq!(level_class(0), "secondary");
        assert_eq!(level_class(1), "success");
        assert_eq!(level_class(2), "warning");
        assert_eq!(level_class(3), "danger");
        assert_eq!(level_class(7), "danger");
    }
}
