//! Reference-database coverage for target taxa (flags 5.1-5.3)
//!
//! Targets are the candidate species, the declared taxa of interest and the
//! preliminary ID. Each target is resolved to a taxon record; genus-level
//! and lower targets get three concurrent lookups (target, related,
//! related-in-country) while higher taxa get a target count only.

mod assess;
mod fetch;
mod targets;

pub use assess::{CoverageAssessor, CoverageOutcome};
pub use fetch::{CoverageFetcher, ResolvedTarget};
pub use targets::CoverageTargets;

use crate::flags::{Flag, FlagId, FlagValue};
use crate::models::{CountryCoverage, CoverageReport, SpeciesCounts};
use bcid_common::config::Criteria;
use tracing::warn;

fn represented(counts: &SpeciesCounts) -> usize {
    counts.values().filter(|c| c.is_some_and(|n| n > 0)).count()
}

/// Flag 5.1 from the target's own record count
pub fn target_flag(count: Option<u64>, criteria: &Criteria) -> FlagValue {
    match count {
        None => FlagValue::ERR,
        Some(n) if n > criteria.db_cov_target_min_a => FlagValue::A,
        Some(n) if n > criteria.db_cov_target_min_b => FlagValue::B,
        Some(_) => FlagValue::C,
    }
}

/// Flag 5.2 from the share of congeneric species with any record
pub fn related_flag(related: Option<&SpeciesCounts>, higher_taxon: bool, criteria: &Criteria) -> FlagValue {
    if higher_taxon {
        return FlagValue::NA;
    }
    let Some(counts) = related else {
        return FlagValue::ERR;
    };
    if counts.is_empty() {
        return FlagValue::NA;
    }
    let percent = 100.0 * represented(counts) as f64 / counts.len() as f64;
    if percent > criteria.db_cov_related_min_a {
        FlagValue::A
    } else if percent > criteria.db_cov_related_min_b {
        FlagValue::B
    } else {
        FlagValue::C
    }
}

/// Flag 5.3 from congeneric species recorded in the sample's country
pub fn country_flag(country: Option<&CountryCoverage>, higher_taxon: bool) -> FlagValue {
    if higher_taxon {
        return FlagValue::NA;
    }
    match country {
        None => FlagValue::ERR,
        Some(CountryCoverage::NotApplicable(_)) => FlagValue::NA,
        Some(CountryCoverage::Counts(counts)) if counts.is_empty() => FlagValue::C,
        Some(CountryCoverage::Counts(counts)) if represented(counts) == counts.len() => FlagValue::A,
        Some(CountryCoverage::Counts(_)) => FlagValue::B,
    }
}

/// Flags 5.1, 5.2 and 5.3 for every target in the report
pub fn coverage_flags(report: &CoverageReport, criteria: &Criteria) -> Vec<Flag> {
    let mut flags = Vec::new();
    for (target_type, taxon, result) in report.iter() {
        let values = [
            (FlagId::DbCoverageTarget, target_flag(result.target, criteria)),
            (
                FlagId::DbCoverageRelated,
                related_flag(result.related.as_ref(), result.higher_taxon, criteria),
            ),
            (
                FlagId::DbCoverageCountry,
                country_flag(result.country.as_ref(), result.higher_taxon),
            ),
        ];
        for (flag_id, value) in values {
            if value == FlagValue::ERR {
                warn!(
                    target = %taxon,
                    target_type = %target_type,
                    flag = %flag_id,
                    "Coverage lookup failed, flag set to ERR"
                );
            }
            flags.push(Flag::for_typed_target(flag_id, value, taxon, target_type));
        }
    }
    flags
}
