//! Candidate species and the per-query candidate artifact

use super::hit::Hit;
use serde::{Deserialize, Serialize};

/// Report styling class for a median identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdentityClass {
    Success,
    Warning,
    Danger,
}

/// One species among the selected candidate hits
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateSpecies {
    pub species: String,
    /// Highest-identity selected hit of this species
    pub representative: Hit,
    /// Relevant hits of this species, candidate or not
    pub hit_count: usize,
    pub median_identity: f64,
    #[serde(rename = "median_bs_class")]
    pub median_identity_class: IdentityClass,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub independent_sources: Option<usize>,
}

/// Hit and species tallies for one identity band
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BandCount {
    pub hits: usize,
    pub species: usize,
}

/// Tallies of relevant hits by identity band
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HitCounts {
    /// Relevant but below the candidate threshold
    pub filtered: BandCount,
    /// Candidate but below the strict threshold
    pub moderate: BandCount,
    pub strong: BandCount,
}

/// Contents of `candidates.json`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CandidateArtifact {
    /// Every relevant hit belonging to a selected species
    pub hits: Vec<Hit>,
    pub species: Vec<CandidateSpecies>,
    pub hit_counts: HitCounts,
}

impl CandidateArtifact {
    pub fn species_names(&self) -> Vec<&str> {
        self.species.iter().map(|s| s.species.as_str()).collect()
    }

    /// Hits of `species` that belong to the selected candidate hit set
    pub fn candidate_hits_for<'a>(&'a self, species: &'a str) -> impl Iterator<Item = &'a Hit> + 'a {
        self.hits.iter().filter(move |hit| {
            hit.is_candidate_hit == Some(true) && hit.species_name() == Some(species)
        })
    }
}
