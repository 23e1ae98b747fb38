//! Candidate species selection
//!
//! Hits pass three gates:
//! 1. Relevance: `alignment_length >= min_nt` OR `query_coverage >= min_q_coverage`
//!    (skipped for BOLD results, which are pre-filtered by the ID engine)
//! 2. Candidacy: `identity >= min_identity`
//! 3. Strict candidacy: `identity >= min_identity_strict`
//!
//! When any strict candidate exists the strict set is used for every derived
//! output; otherwise the candidate set is. The two are never mixed.

use crate::flags::FlagValue;
use crate::models::{BandCount, CandidateArtifact, CandidateSpecies, Hit, HitCounts, IdentityClass};
use bcid_common::config::Criteria;
use std::collections::HashSet;
use tracing::{debug, info};

/// Result of candidate selection for one query
#[derive(Debug, Clone)]
pub struct CandidateSelection {
    pub artifact: CandidateArtifact,
    /// Distinct species among strict candidates
    pub strict_species: usize,
    /// Distinct species among all candidates
    pub candidate_species: usize,
    /// Whether the strict set was authoritative
    pub used_strict: bool,
}

impl CandidateSelection {
    /// Flag 1 value for this selection
    pub fn positive_id(&self) -> FlagValue {
        positive_id_flag(self.strict_species, self.candidate_species)
    }

    /// Exactly one strict candidate species: a taxonomic identification
    pub fn identified_species(&self) -> Option<&CandidateSpecies> {
        if self.strict_species == 1 && self.used_strict {
            self.artifact.species.first()
        } else {
            None
        }
    }
}

/// Positive-ID outcome from strict and candidate species counts
pub fn positive_id_flag(strict_species: usize, candidate_species: usize) -> FlagValue {
    match strict_species {
        1 => FlagValue::A,
        2..=3 => FlagValue::B,
        n if n >= 4 => FlagValue::C,
        _ if candidate_species > 0 => FlagValue::D,
        _ => FlagValue::E,
    }
}

/// Lower-middle element of the sorted values (`sorted[n / 2]`)
pub fn median_identity(identities: &[f64]) -> Option<f64> {
    if identities.is_empty() {
        return None;
    }
    let mut sorted = identities.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    Some(sorted[sorted.len() / 2])
}

pub struct CandidateFilter<'a> {
    criteria: &'a Criteria,
    bold: bool,
}

impl<'a> CandidateFilter<'a> {
    pub fn new(criteria: &'a Criteria, bold: bool) -> Self {
        Self { criteria, bold }
    }

    pub fn is_relevant(&self, hit: &Hit) -> bool {
        self.bold
            || hit.alignment_length >= self.criteria.min_nt
            || hit.query_coverage >= self.criteria.min_q_coverage
    }

    pub fn is_candidate(&self, hit: &Hit) -> bool {
        hit.identity >= self.criteria.min_identity
    }

    pub fn is_strict(&self, hit: &Hit) -> bool {
        hit.identity >= self.criteria.min_identity_strict
    }

    /// Relevant hits, in input order. BOLD hits take their identity from
    /// `similarity`.
    pub fn relevant_hits(&self, hits: Vec<Hit>) -> Vec<Hit> {
        hits.into_iter()
            .map(|mut hit| {
                if self.bold {
                    hit.adopt_similarity();
                }
                hit
            })
            .filter(|hit| self.is_relevant(hit))
            .collect()
    }

    /// Select candidate species from relevant hits (taxonomy attached).
    pub fn select(&self, relevant: Vec<Hit>) -> CandidateSelection {
        let candidates: Vec<&Hit> = relevant.iter().filter(|h| self.is_candidate(h)).collect();
        let strict: Vec<&Hit> = candidates.iter().copied().filter(|h| self.is_strict(h)).collect();

        let strict_species = distinct_species(&strict).len();
        let candidate_species = distinct_species(&candidates).len();
        let used_strict = !strict.is_empty();
        let threshold = if used_strict {
            self.criteria.min_identity_strict
        } else {
            self.criteria.min_identity
        };

        let species_order = distinct_species(if used_strict { &strict } else { &candidates });
        let species_set: HashSet<&str> = species_order.iter().copied().collect();

        // Every relevant hit of a selected species, marked by selection
        let hits: Vec<Hit> = relevant
            .iter()
            .filter(|hit| hit.species_name().is_some_and(|s| species_set.contains(s)))
            .map(|hit| {
                let mut hit = hit.clone();
                hit.is_candidate_hit = Some(hit.identity >= threshold);
                hit
            })
            .collect();

        let species: Vec<CandidateSpecies> = species_order
            .iter()
            .filter_map(|name| self.build_species(name, &relevant, &hits, threshold))
            .collect();

        let hit_counts = HitCounts {
            filtered: band_count(relevant.iter().filter(|h| !self.is_candidate(h))),
            moderate: band_count(candidates.iter().copied().filter(|h| !self.is_strict(h))),
            strong: band_count(strict.iter().copied()),
        };

        info!(
            relevant = relevant.len(),
            candidates = candidates.len(),
            strict = strict.len(),
            species = species.len(),
            used_strict,
            "Candidate selection complete"
        );

        CandidateSelection {
            artifact: CandidateArtifact {
                hits,
                species,
                hit_counts,
            },
            strict_species,
            candidate_species,
            used_strict,
        }
    }

    fn build_species(
        &self,
        name: &str,
        relevant: &[Hit],
        species_hits: &[Hit],
        threshold: f64,
    ) -> Option<CandidateSpecies> {
        let of_species = |hit: &&Hit| hit.species_name() == Some(name);

        // Highest identity wins; earliest on ties
        let representative = species_hits
            .iter()
            .filter(of_species)
            .filter(|h| h.identity >= threshold)
            .fold(None::<&Hit>, |best, hit| match best {
                Some(b) if b.identity >= hit.identity => Some(b),
                _ => Some(hit),
            })?
            .clone();

        let identities: Vec<f64> = species_hits.iter().filter(of_species).map(|h| h.identity).collect();
        let median = median_identity(&identities)?;
        let hit_count = relevant.iter().filter(of_species).count();
        let median_identity_class = self.classify_median(median, representative.identity);

        debug!(
            species = %name,
            hit_count,
            median_identity = median,
            class = ?median_identity_class,
            "Candidate species"
        );

        Some(CandidateSpecies {
            species: name.to_string(),
            representative,
            hit_count,
            median_identity: median,
            median_identity_class,
            independent_sources: None,
        })
    }

    /// Compare against the strict threshold when the species' top hit
    /// meets it, else the candidate threshold.
    pub fn classify_median(&self, median: f64, top_identity: f64) -> IdentityClass {
        let threshold = if top_identity >= self.criteria.min_identity_strict {
            self.criteria.min_identity_strict
        } else {
            self.criteria.min_identity
        };
        if median >= threshold {
            IdentityClass::Success
        } else if median >= threshold * self.criteria.median_identity_warning_factor {
            IdentityClass::Warning
        } else {
            IdentityClass::Danger
        }
    }
}

/// Species names in first-occurrence order; hits without a species skipped
fn distinct_species<'h>(hits: &[&'h Hit]) -> Vec<&'h str> {
    let mut seen = HashSet::new();
    hits.iter()
        .filter_map(|hit| hit.species_name())
        .filter(|name| seen.insert(*name))
        .collect()
}

fn band_count<'h>(hits: impl Iterator<Item = &'h Hit>) -> BandCount {
    let mut count = BandCount::default();
    let mut species = HashSet::new();
    for hit in hits {
        count.hits += 1;
        if let Some(name) = hit.species_name() {
            species.insert(name.to_lowercase());
        }
    }
    count.species = species.len();
    count
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn hit(id: &str, species: Option<&str>, identity: f64, length: u32, coverage: f64) -> Hit {
        serde_json::from_value(json!({
            "hit_id": id,
            "accession": format!("{}.1", id),
            "species": species,
            "identity": identity,
            "alignment_length": length,
            "query_coverage": coverage,
        }))
        .unwrap()
    }

    fn full(id: &str, species: &str, identity: f64) -> Hit {
        hit(id, Some(species), identity, 650, 1.0)
    }

    #[test]
    fn test_relevance_is_or() {
        let criteria = Criteria::default();
        let filter = CandidateFilter::new(&criteria, false);
        assert!(filter.is_relevant(&hit("A", None, 0.9, 300, 0.1)));
        assert!(filter.is_relevant(&hit("B", None, 0.9, 10, 0.85)));
        assert!(!filter.is_relevant(&hit("C", None, 0.9, 299, 0.84)));

        let bold = CandidateFilter::new(&criteria, true);
        assert!(bold.is_relevant(&hit("D", None, 0.9, 0, 0.0)));
    }

    #[test]
    fn test_single_strict_species() {
        let criteria = Criteria::default();
        let filter = CandidateFilter::new(&criteria, false);
        let hits = vec![
            full("H1", "Anneissia japonica", 0.99),
            full("H2", "Anneissia japonica", 0.96),
            full("H3", "Anneissia japonica", 0.94),
        ];
        let selection = filter.select(filter.relevant_hits(hits));

        assert_eq!(selection.positive_id(), FlagValue::A);
        assert!(selection.used_strict);
        let species = &selection.artifact.species[0];
        assert_eq!(species.representative.hit_id, "H1");
        assert_eq!(species.hit_count, 3);
        assert_eq!(species.median_identity, 0.96);
        assert_eq!(species.median_identity_class, IdentityClass::Warning);

        let marks: Vec<Option<bool>> = selection.artifact.hits.iter().map(|h| h.is_candidate_hit).collect();
        assert_eq!(marks, vec![Some(true), Some(false), Some(false)]);
        assert_eq!(selection.artifact.hit_counts.strong, BandCount { hits: 1, species: 1 });
        assert_eq!(selection.artifact.hit_counts.moderate, BandCount { hits: 2, species: 1 });
        assert_eq!(selection.identified_species().unwrap().species, "Anneissia japonica");
    }

    #[test]
    fn test_falls_back_to_candidates_without_strict() {
        let criteria = Criteria::default();
        let filter = CandidateFilter::new(&criteria, false);
        let hits = vec![
            full("H1", "Culex pipiens", 0.97),
            full("H2", "Culex quinquefasciatus", 0.95),
            full("H3", "Culex pipiens", 0.90),
        ];
        let selection = filter.select(filter.relevant_hits(hits));

        assert!(!selection.used_strict);
        assert_eq!(selection.positive_id(), FlagValue::D);
        assert_eq!(selection.artifact.species_names(), vec!["Culex pipiens", "Culex quinquefasciatus"]);
        assert!(selection.identified_species().is_none());
        assert_eq!(selection.artifact.hit_counts.filtered, BandCount { hits: 1, species: 1 });
    }

    #[test]
    fn test_strict_set_is_authoritative() {
        let criteria = Criteria::default();
        let filter = CandidateFilter::new(&criteria, false);
        let hits = vec![
            full("H1", "Aedes aegypti", 0.99),
            full("H2", "Aedes albopictus", 0.95),
            full("H3", "Aedes vexans", 0.99),
        ];
        let selection = filter.select(filter.relevant_hits(hits));
        assert_eq!(selection.positive_id(), FlagValue::B);
        assert_eq!(selection.artifact.species_names(), vec!["Aedes aegypti", "Aedes vexans"]);
        assert!(selection
            .artifact
            .hits
            .iter()
            .all(|h| h.species_name() != Some("Aedes albopictus")));
    }

    #[test]
    fn test_representative_tie_keeps_first() {
        let criteria = Criteria::default();
        let filter = CandidateFilter::new(&criteria, false);
        let hits = vec![
            full("H1", "Aedes aegypti", 0.99),
            full("H2", "Aedes aegypti", 0.995),
            full("H3", "Aedes aegypti", 0.995),
        ];
        let selection = filter.select(filter.relevant_hits(hits));
        assert_eq!(selection.artifact.species[0].representative.hit_id, "H2");
    }

    #[test]
    fn test_positive_id_is_total() {
        assert_eq!(positive_id_flag(1, 1), FlagValue::A);
        assert_eq!(positive_id_flag(2, 5), FlagValue::B);
        assert_eq!(positive_id_flag(3, 3), FlagValue::B);
        assert_eq!(positive_id_flag(4, 4), FlagValue::C);
        assert_eq!(positive_id_flag(0, 2), FlagValue::D);
        assert_eq!(positive_id_flag(0, 0), FlagValue::E);
    }

    #[test]
    fn test_median_is_lower_middle() {
        assert_eq!(median_identity(&[0.99, 0.94, 0.96]), Some(0.96));
        assert_eq!(median_identity(&[0.9, 0.8, 0.95, 0.85]), Some(0.9));
        assert_eq!(median_identity(&[]), None);
    }

    #[test]
    fn test_bold_uses_similarity() {
        let criteria = Criteria::default();
        let filter = CandidateFilter::new(&criteria, true);
        let hit: Hit = serde_json::from_value(json!({
            "hit_id": "BOLD:1",
            "species": "Aedes aegypti",
            "similarity": 0.99,
        }))
        .unwrap();
        let selection = filter.select(filter.relevant_hits(vec![hit]));
        assert_eq!(selection.positive_id(), FlagValue::A);
        assert_eq!(selection.artifact.species[0].median_identity, 0.99);
    }

    #[test]
    fn test_species_counted_case_insensitively() {
        let criteria = Criteria::default();
        let filter = CandidateFilter::new(&criteria, false);
        let hits = vec![
            full("H1", "Aedes aegypti", 0.99),
            full("H2", "aedes aegypti", 0.99),
            hit("H3", None, 0.99, 650, 1.0),
        ];
        let selection = filter.select(filter.relevant_hits(hits));
        assert_eq!(selection.artifact.hit_counts.strong, BandCount { hits: 3, species: 1 });
    }
}
