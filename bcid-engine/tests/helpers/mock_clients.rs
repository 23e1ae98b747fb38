//! In-memory External Services
//!
//! Stand-ins for GenBank, GBIF and taxonkit with canned answers. Each mock
//! records how often it was called so tests can check batching.

use async_trait::async_trait;
use bcid_common::{Error, RequestError, Result};
use bcid_engine::clients::{
    PublicationSource, RecordCounter, RelativesLookup, TaxonQuery, TaxonRecord, TaxonomyLookup,
};
use bcid_engine::models::{LiteratureSource, Locus, Publication, Rank};
use bcid_engine::workflow::Clients;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

fn exhausted(endpoint: &str) -> Error {
    Error::ApiExhausted {
        endpoint: endpoint.to_string(),
        attempts: 3,
        last: RequestError::Network("connection refused".to_string()),
    }
}

#[derive(Default)]
pub struct MockPublications {
    pub sources: HashMap<String, LiteratureSource>,
    pub calls: Arc<AtomicUsize>,
}

impl MockPublications {
    /// One publication per accession, by first author
    pub fn by_author(entries: &[(&str, &str)]) -> Self {
        let sources = entries
            .iter()
            .map(|(accession, author)| {
                let source = LiteratureSource {
                    accession: accession.to_string(),
                    is_automated: false,
                    publications: vec![Publication {
                        authors: vec![author.to_string()],
                        title: Some("Barcoding the mosquitoes of the region".to_string()),
                        journal: None,
                    }],
                };
                (accession.to_string(), source)
            })
            .collect();
        Self {
            sources,
            calls: Arc::default(),
        }
    }
}

#[async_trait]
impl PublicationSource for MockPublications {
    async fn fetch_sources(&self, accessions: &[String]) -> Result<HashMap<String, LiteratureSource>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(accessions
            .iter()
            .filter_map(|a| self.sources.get(a).map(|s| (a.clone(), s.clone())))
            .collect())
    }
}

/// Record counts by taxon name
#[derive(Default)]
pub struct MockCounter {
    pub counts: HashMap<String, u64>,
    /// Taxa whose count fails with a non-fatal error
    pub failing: HashSet<String>,
    /// Taxa whose count exhausts the retry budget
    pub fatal: HashSet<String>,
    pub calls: Arc<AtomicUsize>,
}

impl MockCounter {
    pub fn with_counts(counts: &[(&str, u64)]) -> Self {
        Self {
            counts: counts.iter().map(|(t, c)| (t.to_string(), *c)).collect(),
            ..Self::default()
        }
    }
}

#[async_trait]
impl RecordCounter for MockCounter {
    fn database(&self) -> &'static str {
        "mock"
    }

    async fn count_records(&self, taxon: TaxonQuery<'_>, _locus: Option<&Locus>) -> Result<u64> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fatal.contains(taxon.name) {
            return Err(exhausted("mock counts"));
        }
        if self.failing.contains(taxon.name) {
            return Err(Error::Request(RequestError::Status {
                status: 500,
                body: "internal error".to_string(),
            }));
        }
        Ok(self.counts.get(taxon.name).copied().unwrap_or(0))
    }
}

/// A fixed taxonomy: known taxa with ranks, genus members and per-country
/// occurrences
#[derive(Default)]
pub struct MockRelatives {
    pub ranks: HashMap<String, Rank>,
    pub genera: HashMap<String, Vec<String>>,
    pub by_country: HashMap<(String, String), Vec<String>>,
}

impl MockRelatives {
    pub fn species(mut self, name: &str) -> Self {
        self.ranks.insert(name.to_string(), Rank::Species);
        let genus = name.split_whitespace().next().unwrap_or_default().to_string();
        self.genera.entry(genus).or_default().push(name.to_string());
        self
    }

    pub fn taxon(mut self, name: &str, rank: Rank) -> Self {
        self.ranks.insert(name.to_string(), rank);
        self
    }

    pub fn in_country(mut self, country: &str, species: &str) -> Self {
        let genus = species.split_whitespace().next().unwrap_or_default().to_string();
        self.by_country
            .entry((genus, country.to_string()))
            .or_default()
            .push(species.to_string());
        self
    }

    fn genus_of(taxon: &TaxonRecord) -> String {
        taxon.name.split_whitespace().next().unwrap_or_default().to_string()
    }
}

#[async_trait]
impl RelativesLookup for MockRelatives {
    async fn resolve(&self, taxon: &str) -> Result<TaxonRecord> {
        let rank = self
            .ranks
            .get(taxon)
            .copied()
            .ok_or_else(|| Error::NotFound(format!("No taxon record for {}", taxon)))?;
        Ok(TaxonRecord {
            name: taxon.to_string(),
            key: Some(1),
            genus_key: (!rank.is_above_genus()).then_some(2),
            rank: Some(rank),
        })
    }

    async fn relatives(&self, taxon: &TaxonRecord) -> Result<Vec<String>> {
        Ok(self.genera.get(&Self::genus_of(taxon)).cloned().unwrap_or_default())
    }

    async fn relatives_in_country(&self, taxon: &TaxonRecord, country_code: &str) -> Result<Vec<String>> {
        Ok(self
            .by_country
            .get(&(Self::genus_of(taxon), country_code.to_string()))
            .cloned()
            .unwrap_or_default())
    }
}

/// Every name resolves to a fixed taxid except those listed as unknown
#[derive(Default)]
pub struct MockTaxonomy {
    pub unknown: HashSet<String>,
}

#[async_trait]
impl TaxonomyLookup for MockTaxonomy {
    async fn taxids(&self, names: &[String]) -> Result<HashMap<String, Option<String>>> {
        Ok(names
            .iter()
            .enumerate()
            .map(|(i, name)| {
                let taxid = (!self.unknown.contains(name)).then(|| (7000 + i).to_string());
                (name.clone(), taxid)
            })
            .collect())
    }
}

pub fn mock_clients(publications: MockPublications, counter: MockCounter, relatives: MockRelatives) -> Clients {
    Clients {
        publications: Box::new(publications),
        counter: Box::new(counter),
        taxonomy: Box::new(MockTaxonomy::default()),
        relatives: Box::new(relatives),
    }
}
