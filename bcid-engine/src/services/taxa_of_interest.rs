//! Taxa of interest and preliminary identification checks (flags 2 and 7)
//!
//! Both checks compare user-declared taxon names, case-insensitively,
//! against every rank of a candidate species' lineage, so a TOI or PMI may
//! be given at any rank.

use crate::flags::FlagValue;
use crate::models::{CandidateSpecies, Rank};
use tracing::info;

pub const TOI_DETECTED_HEADER: [&str; 6] = [
    "Taxon of interest",
    "Match rank",
    "Match taxon",
    "Match species",
    "Match accession",
    "Match identity",
];

/// A lineage taxon of a candidate species that matched a declared name
#[derive(Debug, Clone, PartialEq)]
pub struct LineageMatch {
    pub rank: Rank,
    pub taxon: String,
    pub species: String,
    pub accession: String,
    pub identity: f64,
}

/// One row of `taxa_of_concern_detected.csv`
#[derive(Debug, Clone, PartialEq)]
pub struct ToiRow {
    pub toi: String,
    pub detected: Option<LineageMatch>,
}

impl ToiRow {
    pub fn record(&self) -> [String; 6] {
        match &self.detected {
            Some(m) => [
                self.toi.clone(),
                m.rank.to_string(),
                m.taxon.clone(),
                m.species.clone(),
                m.accession.clone(),
                format!("{:.2}%", m.identity * 100.0),
            ],
            None => [
                self.toi.clone(),
                String::new(),
                String::new(),
                String::new(),
                String::new(),
                String::new(),
            ],
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ToiOutcome {
    pub flag: FlagValue,
    pub rows: Vec<ToiRow>,
}

/// First lineage taxon among `species` (in order) named `name`
fn find_in_lineage(name: &str, species: &[CandidateSpecies]) -> Option<LineageMatch> {
    species.iter().find_map(|candidate| {
        let hit = &candidate.representative;
        let (rank, taxon) = hit.taxonomy.as_ref()?.find(name)?;
        Some(LineageMatch {
            rank,
            taxon: taxon.to_string(),
            species: candidate.species.clone(),
            accession: hit.accession.clone(),
            identity: hit.identity,
        })
    })
}

/// Cross-reference declared taxa of interest against the selected species.
pub fn detect_taxa_of_interest(taxa_of_interest: &[String], species: &[CandidateSpecies]) -> ToiOutcome {
    if taxa_of_interest.is_empty() {
        info!("No taxa of interest declared");
        return ToiOutcome {
            flag: FlagValue::NA,
            rows: Vec::new(),
        };
    }
    let rows: Vec<ToiRow> = taxa_of_interest
        .iter()
        .map(|toi| ToiRow {
            toi: toi.clone(),
            detected: find_in_lineage(toi, species),
        })
        .collect();
    let detected = rows.iter().filter(|r| r.detected.is_some()).count();
    info!(declared = rows.len(), detected, "Taxa of interest checked");
    ToiOutcome {
        flag: if detected > 0 { FlagValue::A } else { FlagValue::B },
        rows,
    }
}

/// Rank and taxon of the identified species' lineage matching the PMI
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PmiMatch {
    pub rank: Rank,
    pub taxon: String,
}

/// Flag 7. `identified` is the single strict candidate species, if any.
pub fn match_preliminary_id(
    preliminary_id: Option<&str>,
    identified: Option<&CandidateSpecies>,
) -> (FlagValue, Option<PmiMatch>) {
    let (Some(pmi), Some(identified)) = (preliminary_id, identified) else {
        info!("No taxonomic identification or preliminary ID, PMI not assessed");
        return (FlagValue::NA, None);
    };
    let found = identified
        .representative
        .taxonomy
        .as_ref()
        .and_then(|t| t.find(pmi))
        .map(|(rank, taxon)| PmiMatch {
            rank,
            taxon: taxon.to_string(),
        });
    info!(preliminary_id = %pmi, matched = found.is_some(), "Preliminary ID checked");
    match found {
        Some(m) => (FlagValue::A, Some(m)),
        None => (FlagValue::B, None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::IdentityClass;
    use serde_json::json;

    fn candidate(species: &str, genus: &str, family: &str) -> CandidateSpecies {
        let representative = serde_json::from_value(json!({
            "hit_id": format!("{}-1", genus),
            "accession": "MN000001.1",
            "species": species,
            "identity": 0.995,
            "taxonomy": {"family": family, "genus": genus, "species": species}
        }))
        .unwrap();
        CandidateSpecies {
            species: species.to_string(),
            representative,
            hit_count: 1,
            median_identity: 0.995,
            median_identity_class: IdentityClass::Success,
            independent_sources: None,
        }
    }

    #[test]
    fn test_no_taxa_of_interest_is_na() {
        let outcome = detect_taxa_of_interest(&[], &[candidate("Aedes aegypti", "Aedes", "Culicidae")]);
        assert_eq!(outcome.flag, FlagValue::NA);
        assert!(outcome.rows.is_empty());
    }

    #[test]
    fn test_toi_matches_any_rank() {
        let species = [
            candidate("Culex pipiens", "Culex", "Culicidae"),
            candidate("Aedes aegypti", "Aedes", "Culicidae"),
        ];
        let tois = vec!["aedes".to_string(), "Anopheles".to_string()];
        let outcome = detect_taxa_of_interest(&tois, &species);
        assert_eq!(outcome.flag, FlagValue::A);

        let first = outcome.rows[0].detected.as_ref().unwrap();
        assert_eq!(first.rank, Rank::Genus);
        assert_eq!(first.species, "Aedes aegypti");
        assert!(outcome.rows[1].detected.is_none());

        let record = outcome.rows[0].record();
        assert_eq!(record[1], "genus");
        assert_eq!(record[5], "99.50%");
        assert_eq!(outcome.rows[1].record()[1], "");
    }

    #[test]
    fn test_toi_not_detected_is_b() {
        let outcome = detect_taxa_of_interest(
            &["Anopheles".to_string()],
            &[candidate("Culex pipiens", "Culex", "Culicidae")],
        );
        assert_eq!(outcome.flag, FlagValue::B);
        assert_eq!(outcome.rows.len(), 1);
    }

    #[test]
    fn test_preliminary_id() {
        let identified = candidate("Culex pipiens", "Culex", "Culicidae");
        let (flag, found) = match_preliminary_id(Some("culicidae"), Some(&identified));
        assert_eq!(flag, FlagValue::A);
        assert_eq!(found.unwrap().rank, Rank::Family);

        assert_eq!(match_preliminary_id(Some("Aedes"), Some(&identified)).0, FlagValue::B);
        assert_eq!(match_preliminary_id(Some("Culex"), None).0, FlagValue::NA);
    }
}
