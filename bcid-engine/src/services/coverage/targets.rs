//! Target taxa for database coverage

use crate::models::{QueryMetadata, TargetType};
use bcid_common::config::CoverageSettings;
use bcid_common::{ErrorLocation, ErrorLog, ErrorRecord};
use tracing::{info, warn};

/// Taxa assessed for one query, by why they are assessed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CoverageTargets {
    pub candidates: Vec<String>,
    pub toi: Vec<String>,
    pub pmi: Option<String>,
}

impl CoverageTargets {
    /// Collect targets from the candidate species and sample metadata.
    /// Candidates beyond `max_candidates` skip the whole candidate set;
    /// taxa of interest beyond `toi_limit` are dropped with a logged error.
    pub fn collect(
        candidate_species: &[&str],
        metadata: &QueryMetadata,
        settings: &CoverageSettings,
        errors: &ErrorLog,
    ) -> Self {
        let candidates = if candidate_species.len() > settings.max_candidates {
            info!(
                candidates = candidate_species.len(),
                max = settings.max_candidates,
                "Too many candidate species, skipping candidate coverage"
            );
            Vec::new()
        } else {
            candidate_species.iter().map(|s| s.to_string()).collect()
        };

        let mut toi = metadata.taxa_of_interest.clone();
        if toi.len() > settings.toi_limit {
            let excluded = toi.split_off(settings.toi_limit);
            let message = format!(
                "Only the first {} taxa of interest will be evaluated. The following taxa of interest \
                 will be excluded: {}. This limit can be raised with the DB_COVERAGE_TOI_LIMIT \
                 environment variable.",
                settings.toi_limit,
                excluded.join(", ")
            );
            warn!(excluded = excluded.len(), "{}", message);
            errors.record(ErrorRecord::new(ErrorLocation::DbCoverage, message));
        }

        Self {
            candidates,
            toi,
            pmi: metadata.preliminary_id().map(str::to_string),
        }
    }

    /// Distinct target taxa: candidates, then taxa of interest, then PMI
    pub fn all(&self) -> Vec<String> {
        let mut taxa: Vec<String> = Vec::new();
        let ordered = self.candidates.iter().chain(self.toi.iter()).chain(self.pmi.iter());
        for taxon in ordered {
            if !taxa.contains(taxon) {
                taxa.push(taxon.clone());
            }
        }
        taxa
    }

    /// Every role `taxon` plays
    pub fn types_of(&self, taxon: &str) -> Vec<TargetType> {
        let mut types = Vec::new();
        if self.candidates.iter().any(|t| t == taxon) {
            types.push(TargetType::Candidate);
        }
        if self.pmi.as_deref() == Some(taxon) {
            types.push(TargetType::Pmi);
        }
        if self.toi.iter().any(|t| t == taxon) {
            types.push(TargetType::Toi);
        }
        types
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty() && self.toi.is_empty() && self.pmi.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metadata(toi: &[&str], pmi: Option<&str>) -> QueryMetadata {
        QueryMetadata {
            sample_id: "S1".to_string(),
            taxa_of_interest: toi.iter().map(|t| t.to_string()).collect(),
            preliminary_id: pmi.map(str::to_string),
            ..Default::default()
        }
    }

    #[test]
    fn test_too_many_candidates_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let errors = ErrorLog::for_dir(dir.path());
        let settings = CoverageSettings {
            max_candidates: 2,
            ..Default::default()
        };
        let targets = CoverageTargets::collect(&["A a", "B b", "C c"], &metadata(&[], None), &settings, &errors);
        assert!(targets.candidates.is_empty());
        assert!(targets.is_empty());
    }

    #[test]
    fn test_toi_truncation_logs_excluded_taxa() {
        let dir = tempfile::tempdir().unwrap();
        let errors = ErrorLog::for_dir(dir.path());
        let settings = CoverageSettings {
            toi_limit: 2,
            ..Default::default()
        };
        let targets = CoverageTargets::collect(
            &[],
            &metadata(&["Aedes", "Culex", "Anopheles", "Culiseta"], None),
            &settings,
            &errors,
        );
        assert_eq!(targets.toi, vec!["Aedes", "Culex"]);

        let logged = errors.read_all().unwrap();
        assert_eq!(logged.len(), 1);
        assert_eq!(logged[0].location, ErrorLocation::DbCoverage);
        assert!(logged[0].message.contains("Anopheles, Culiseta"));
    }

    #[test]
    fn test_shared_taxon_has_every_role() {
        let dir = tempfile::tempdir().unwrap();
        let errors = ErrorLog::for_dir(dir.path());
        let targets = CoverageTargets::collect(
            &["Culex pipiens"],
            &metadata(&["Culex pipiens", "Aedes"], Some("Culex pipiens")),
            &CoverageSettings::default(),
            &errors,
        );
        assert_eq!(targets.all(), vec!["Culex pipiens", "Aedes"]);
        assert_eq!(
            targets.types_of("Culex pipiens"),
            vec![TargetType::Candidate, TargetType::Pmi, TargetType::Toi]
        );
        assert_eq!(targets.types_of("Aedes"), vec![TargetType::Toi]);
    }
}
