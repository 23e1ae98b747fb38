//! Provenance of reference records and the "shares a source" relation
//!
//! Two records are judged to come from the same collection event when they
//! share a publication. Publication metadata is noisy across GenBank records,
//! so each publication is reduced to a single canonical key taken from the
//! first usable field in the order authors > title > journal, and records
//! match when any key is shared.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Short titles containing this phrase carry no information
const DIRECT_SUBMISSION: &str = "direct submission";
const DIRECT_SUBMISSION_MAX_LEN: usize = 20;

/// One REFERENCE block of a sequence record
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Publication {
    #[serde(default)]
    pub authors: Vec<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub journal: Option<String>,
}

impl Publication {
    /// Canonical matching key, or `None` when no field is usable.
    pub fn canonical_key(&self) -> Option<String> {
        let authors: Vec<String> = self
            .authors
            .iter()
            .map(|a| {
                a.chars()
                    .filter(|c| !matches!(c, '.' | ',' | ' '))
                    .collect::<String>()
                    .to_lowercase()
            })
            .filter(|a| !a.is_empty())
            .collect();
        if !authors.is_empty() {
            return Some(authors.join(", "));
        }

        if let Some(title) = self.title.as_deref().map(str::trim).filter(|t| !t.is_empty()) {
            let lower = title.to_lowercase();
            if title.len() > DIRECT_SUBMISSION_MAX_LEN || !lower.contains(DIRECT_SUBMISSION) {
                return Some(lower);
            }
        }

        self.journal
            .as_deref()
            .map(str::trim)
            .filter(|j| !j.is_empty())
            .map(str::to_lowercase)
    }
}

/// Literature provenance of a GenBank accession
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiteratureSource {
    pub accession: String,
    /// Produced by an automated genome annotation pipeline
    pub is_automated: bool,
    pub publications: Vec<Publication>,
}

impl LiteratureSource {
    pub fn new(accession: impl Into<String>) -> Self {
        Self {
            accession: accession.into(),
            ..Self::default()
        }
    }

    fn keys(&self) -> HashSet<String> {
        if self.is_automated {
            return HashSet::new();
        }
        self.publications
            .iter()
            .filter_map(Publication::canonical_key)
            .collect()
    }
}

/// Collector attribution of a specimen record with no publication
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectorSource {
    pub hit_id: String,
    #[serde(default)]
    pub url: Option<String>,
    /// Trimmed, lowercased collector string
    pub collectors: String,
}

impl CollectorSource {
    pub fn new(hit_id: impl Into<String>, url: Option<String>, collectors: &str) -> Self {
        Self {
            hit_id: hit_id.into(),
            url,
            collectors: collectors.trim().to_lowercase(),
        }
    }
}

/// Where a reference record came from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum EvidenceSource {
    Literature(LiteratureSource),
    Collector(CollectorSource),
}

impl EvidenceSource {
    /// No usable provenance: such sources are never clustered.
    ///
    /// Automated sources are not empty; each one stands alone.
    pub fn is_empty(&self) -> bool {
        match self {
            EvidenceSource::Literature(lit) => !lit.is_automated && lit.publications.is_empty(),
            EvidenceSource::Collector(col) => col.collectors.is_empty(),
        }
    }

    /// Whether both records plausibly share one origin. Symmetric; an
    /// automated or empty source matches nothing, not even itself.
    pub fn matches(&self, other: &EvidenceSource) -> bool {
        match (self, other) {
            (EvidenceSource::Literature(a), EvidenceSource::Literature(b)) => {
                let a_keys = a.keys();
                !a_keys.is_empty() && b.keys().iter().any(|k| a_keys.contains(k))
            }
            (EvidenceSource::Collector(a), EvidenceSource::Collector(b)) => {
                !a.collectors.is_empty() && a.collectors == b.collectors
            }
            _ => false,
        }
    }
}
