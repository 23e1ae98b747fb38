//! Independent-source clustering for candidate species
//!
//! Each candidate hit is resolved to an [`EvidenceSource`]: the GenBank
//! literature of its accession, or the collectors of a BOLD record without
//! one. Sources are clustered in hit order; a source joins the first cluster
//! holding a source it matches, else starts a new cluster. A species'
//! independent source count is its number of clusters.

use crate::clients::PublicationSource;
use crate::flags::FlagValue;
use crate::models::{CandidateArtifact, CollectorSource, EvidenceSource, Hit, LiteratureSource};
use bcid_common::config::EntrezSettings;
use bcid_common::{ErrorLocation, ErrorLog, ErrorRecord, Result};
use futures::stream::{self, StreamExt};
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::{debug, error, info, warn};

/// Species -> independent-source clusters
pub type AggregatedSources = BTreeMap<String, Vec<Vec<EvidenceSource>>>;

/// Flag 4 value for one species
pub fn sources_flag(independent_sources: usize, min_count: usize) -> FlagValue {
    if independent_sources > min_count {
        FlagValue::A
    } else {
        FlagValue::B
    }
}

/// Group sources into clusters of shared origin, preserving input order.
/// Empty sources are skipped.
pub fn cluster_sources(sources: impl IntoIterator<Item = EvidenceSource>) -> Vec<Vec<EvidenceSource>> {
    let mut clusters: Vec<Vec<EvidenceSource>> = Vec::new();
    for source in sources {
        if source.is_empty() {
            continue;
        }
        match clusters
            .iter_mut()
            .find(|cluster| cluster.iter().any(|member| source.matches(member)))
        {
            Some(cluster) => cluster.push(source),
            None => clusters.push(vec![source]),
        }
    }
    clusters
}

pub struct SourceDiversityAssessor<'a> {
    publications: &'a dyn PublicationSource,
    entrez: &'a EntrezSettings,
    errors: &'a ErrorLog,
}

impl<'a> SourceDiversityAssessor<'a> {
    pub fn new(publications: &'a dyn PublicationSource, entrez: &'a EntrezSettings, errors: &'a ErrorLog) -> Self {
        Self {
            publications,
            entrez,
            errors,
        }
    }

    /// Cluster each candidate species' sources and record its independent
    /// source count on the artifact.
    pub async fn assess(&self, artifact: &mut CandidateArtifact) -> Result<AggregatedSources> {
        let candidate_hits: Vec<&Hit> = artifact
            .hits
            .iter()
            .filter(|h| h.is_candidate_hit == Some(true))
            .collect();

        let mut seen = HashSet::new();
        let accessions: Vec<String> = candidate_hits
            .iter()
            .map(|h| h.accession_base().to_string())
            .filter(|a| !a.is_empty() && seen.insert(a.clone()))
            .collect();
        let literature = self.fetch_all(&accessions).await?;

        let mut aggregated = AggregatedSources::new();
        let mut counts = Vec::with_capacity(artifact.species.len());
        for species in &artifact.species {
            let sources: Vec<EvidenceSource> = candidate_hits
                .iter()
                .enumerate()
                .filter(|(_, hit)| hit.species_name() == Some(species.species.as_str()))
                .filter_map(|(index, hit)| self.resolve_source(index, hit, &species.species, &literature))
                .collect();
            let clusters = cluster_sources(sources);
            debug!(species = %species.species, clusters = clusters.len(), "Clustered sources");
            counts.push(clusters.len());
            aggregated.insert(species.species.clone(), clusters);
        }
        for (species, count) in artifact.species.iter_mut().zip(counts) {
            species.independent_sources = Some(count);
        }

        info!(species = aggregated.len(), accessions = accessions.len(), "Source diversity assessed");
        Ok(aggregated)
    }

    fn resolve_source(
        &self,
        index: usize,
        hit: &Hit,
        species: &str,
        literature: &HashMap<String, LiteratureSource>,
    ) -> Option<EvidenceSource> {
        let accession = hit.accession_base();
        if accession.is_empty() {
            if let Some(collectors) = &hit.collectors {
                let url = Some(hit.field_text("url")).filter(|u| !u.is_empty());
                return Some(EvidenceSource::Collector(CollectorSource::new(&hit.hit_id, url, collectors)));
            }
        } else if let Some(source) = literature.get(accession) {
            return Some(EvidenceSource::Literature(source.clone()));
        }

        let message = if accession.is_empty() {
            format!(
                "Publications cannot be retrieved for hit {} as no GenBank accession is provided for this record.",
                index
            )
        } else {
            format!("Accession {} not found in GenBank.", hit.accession)
        };
        warn!(hit_id = %hit.hit_id, species = %species, "{}", message);
        self.errors.record(
            ErrorRecord::new(ErrorLocation::SourceDiversityAccession, message)
                .with_context("index", index)
                .with_context("hit_id", hit.hit_id.as_str())
                .with_context("species", species)
                .with_context("accession", hit.accession.as_str()),
        );
        None
    }

    /// Fetch literature for every accession in bounded batches. A failed
    /// batch leaves its accessions unresolved unless the failure is fatal.
    async fn fetch_all(&self, accessions: &[String]) -> Result<HashMap<String, LiteratureSource>> {
        let batch_size = self.entrez.fetch_batch_size.max(1);
        let mut pending = stream::iter(accessions.chunks(batch_size))
            .map(|batch| async move { (batch, self.publications.fetch_sources(batch).await) })
            .buffer_unordered(self.entrez.workers.max(1));

        let mut literature = HashMap::new();
        while let Some((batch, result)) = pending.next().await {
            match result {
                Ok(sources) => literature.extend(sources),
                Err(e) if e.is_fatal() => {
                    error!(error = %e, "Fatal error fetching GenBank metadata");
                    return Err(e);
                }
                Err(e) => {
                    warn!(accessions = ?batch, error = %e, "GenBank metadata batch failed");
                }
            }
        }
        Ok(literature)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Publication;

    fn literature(accession: &str, author: &str) -> EvidenceSource {
        EvidenceSource::Literature(LiteratureSource {
            accession: accession.to_string(),
            is_automated: false,
            publications: vec![Publication {
                authors: vec![author.to_string()],
                ..Publication::default()
            }],
        })
    }

    #[test]
    fn test_first_match_wins_and_no_retroactive_merge() {
        let sources = vec![
            literature("A", "Smith,J."),
            literature("B", "Jones,P."),
            literature("C", "Smith,J."),
            literature("D", "Brown,K."),
        ];
        let clusters = cluster_sources(sources);
        assert_eq!(clusters.len(), 3);
        assert_eq!(clusters[0].len(), 2);
    }

    #[test]
    fn test_empty_and_automated_sources() {
        let sources = vec![
            EvidenceSource::Literature(LiteratureSource::new("E")),
            EvidenceSource::Literature(LiteratureSource {
                accession: "N1".to_string(),
                is_automated: true,
                publications: vec![],
            }),
            EvidenceSource::Literature(LiteratureSource {
                accession: "N2".to_string(),
                is_automated: true,
                publications: vec![],
            }),
        ];
        let clusters = cluster_sources(sources);
        assert_eq!(clusters.len(), 2);
    }

    struct FixedSources(HashMap<String, LiteratureSource>);

    #[async_trait::async_trait]
    impl PublicationSource for FixedSources {
        async fn fetch_sources(&self, accessions: &[String]) -> Result<HashMap<String, LiteratureSource>> {
            Ok(accessions
                .iter()
                .filter_map(|a| self.0.get(a).map(|s| (a.clone(), s.clone())))
                .collect())
        }
    }

    fn candidate_hit(id: &str, accession: &str, collectors: Option<&str>) -> Hit {
        serde_json::from_value(serde_json::json!({
            "hit_id": id,
            "accession": accession,
            "species": "Culex pipiens",
            "identity": 0.99,
            "collectors": collectors,
            "is_candidate_hit": true,
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn test_assess_counts_clusters_and_logs_missing_accessions() {
        let dir = tempfile::tempdir().unwrap();
        let errors = ErrorLog::for_dir(dir.path());
        let mut known = HashMap::new();
        for (acc, author) in [("MN1", "Smith,J."), ("MN2", "Smith,J."), ("MN3", "Jones,P.")] {
            if let EvidenceSource::Literature(source) = literature(acc, author) {
                known.insert(acc.to_string(), source);
            }
        }
        let publications = FixedSources(known);

        let hits = vec![
            candidate_hit("h1", "MN1.1", None),
            candidate_hit("h2", "MN2.1", None),
            candidate_hit("h3", "MN3.1", None),
            candidate_hit("h4", "MN9.1", None),
            candidate_hit("h5", "", Some("R. Brown")),
        ];
        let representative = hits[0].clone();
        let mut artifact = CandidateArtifact {
            hits,
            species: vec![crate::models::CandidateSpecies {
                species: "Culex pipiens".to_string(),
                representative,
                hit_count: 5,
                median_identity: 0.99,
                median_identity_class: crate::models::IdentityClass::Success,
                independent_sources: None,
            }],
            hit_counts: Default::default(),
        };

        let settings = EntrezSettings {
            fetch_batch_size: 2,
            ..EntrezSettings::default()
        };
        let assessor = SourceDiversityAssessor::new(&publications, &settings, &errors);
        let aggregated = assessor.assess(&mut artifact).await.unwrap();

        assert_eq!(aggregated["Culex pipiens"].len(), 3);
        assert_eq!(artifact.species[0].independent_sources, Some(3));

        let logged = errors.read_all().unwrap();
        assert_eq!(logged.len(), 1);
        assert_eq!(logged[0].context_str("accession"), Some("MN9.1"));
    }

    #[test]
    fn test_sources_flag_threshold_is_exclusive() {
        assert_eq!(sources_flag(6, 5), FlagValue::A);
        assert_eq!(sources_flag(5, 5), FlagValue::B);
        assert_eq!(sources_flag(0, 5), FlagValue::B);
    }
}
