//! Reference-database coverage results per target taxon

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Why a taxon is being assessed
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetType {
    Candidate,
    Pmi,
    Toi,
}

impl TargetType {
    pub const ALL: [TargetType; 3] = [TargetType::Candidate, TargetType::Pmi, TargetType::Toi];

    pub fn as_str(&self) -> &'static str {
        match self {
            TargetType::Candidate => "candidate",
            TargetType::Pmi => "pmi",
            TargetType::Toi => "toi",
        }
    }
}

impl fmt::Display for TargetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Species -> record count; `None` where that species' count failed
pub type SpeciesCounts = BTreeMap<String, Option<u64>>;

/// Serialized as the string `"NA"`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NotApplicable {
    #[serde(rename = "NA")]
    Na,
}

/// Related species recorded in the sample's country
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CountryCoverage {
    /// No country was declared for the sample
    NotApplicable(NotApplicable),
    Counts(SpeciesCounts),
}

impl CountryCoverage {
    pub fn not_applicable() -> Self {
        CountryCoverage::NotApplicable(NotApplicable::Na)
    }
}

/// Coverage of one target. `None` in any slot means that lookup failed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CoverageResult {
    /// Records for the taxon itself
    pub target: Option<u64>,
    /// Congeneric species and their record counts
    pub related: Option<SpeciesCounts>,
    pub country: Option<CountryCoverage>,
    /// Family or above: only `target` is assessed
    #[serde(default)]
    pub higher_taxon: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rank: Option<String>,
}

impl CoverageResult {
    /// A taxon no external source knows about
    pub fn unknown() -> Self {
        Self::default()
    }

    pub fn has_errors(&self) -> bool {
        if self.target.is_none() {
            return true;
        }
        !self.higher_taxon && (self.related.is_none() || self.country.is_none())
    }
}

/// Contents of `db_coverage.json`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CoverageReport {
    #[serde(default)]
    pub candidate: BTreeMap<String, CoverageResult>,
    #[serde(default)]
    pub pmi: BTreeMap<String, CoverageResult>,
    #[serde(default)]
    pub toi: BTreeMap<String, CoverageResult>,
}

impl CoverageReport {
    pub fn targets(&self, target_type: TargetType) -> &BTreeMap<String, CoverageResult> {
        match target_type {
            TargetType::Candidate => &self.candidate,
            TargetType::Pmi => &self.pmi,
            TargetType::Toi => &self.toi,
        }
    }

    pub fn targets_mut(&mut self, target_type: TargetType) -> &mut BTreeMap<String, CoverageResult> {
        match target_type {
            TargetType::Candidate => &mut self.candidate,
            TargetType::Pmi => &mut self.pmi,
            TargetType::Toi => &mut self.toi,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (TargetType, &str, &CoverageResult)> {
        TargetType::ALL.into_iter().flat_map(move |tt| {
            self.targets(tt)
                .iter()
                .map(move |(taxon, result)| (tt, taxon.as_str(), result))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_country_sentinel_round_trips_as_na() {
        let result = CoverageResult {
            target: Some(3),
            related: Some(SpeciesCounts::new()),
            country: Some(CountryCoverage::not_applicable()),
            higher_taxon: false,
            rank: None,
        };
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["country"], "NA");

        let back: CoverageResult = serde_json::from_value(json).unwrap();
        assert_eq!(back.country, Some(CountryCoverage::not_applicable()));
    }

    #[test]
    fn test_unknown_taxon_reports_errors() {
        assert!(CoverageResult::unknown().has_errors());
        let higher = CoverageResult {
            target: Some(10),
            higher_taxon: true,
            ..Default::default()
        };
        assert!(!higher.has_errors());
    }
}
