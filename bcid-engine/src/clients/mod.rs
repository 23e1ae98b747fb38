//! External collaborators
//!
//! Every lookup the engine makes goes through one of the traits below so
//! stages can be driven by in-memory implementations in tests. The HTTP
//! clients route each call through their endpoint [`Throttle`] and its
//! retry policy.
//!
//! [`Throttle`]: bcid_common::Throttle

use crate::models::{LiteratureSource, Locus, Rank};
use async_trait::async_trait;
use bcid_common::{RequestError, Result};
use std::collections::HashMap;

pub mod bold_client;
pub mod entrez_client;
pub mod gbif_client;
pub mod taxonkit;

pub use bold_client::BoldClient;
pub use entrez_client::EntrezClient;
pub use gbif_client::GbifClient;
pub use taxonkit::Taxonkit;

/// Literature metadata for sequence accessions
#[async_trait]
pub trait PublicationSource: Send + Sync {
    /// Sources keyed by accession without version. Accessions missing from
    /// the result were not found.
    async fn fetch_sources(&self, accessions: &[String]) -> Result<HashMap<String, LiteratureSource>>;
}

/// A taxon whose reference records are being counted
#[derive(Debug, Clone, Copy)]
pub struct TaxonQuery<'a> {
    pub name: &'a str,
    pub taxid: Option<&'a str>,
    pub rank: Option<Rank>,
}

impl<'a> TaxonQuery<'a> {
    pub fn named(name: &'a str) -> Self {
        Self {
            name,
            taxid: None,
            rank: None,
        }
    }
}

/// Reference-database record counts
#[async_trait]
pub trait RecordCounter: Send + Sync {
    /// Database label for log messages
    fn database(&self) -> &'static str;

    /// Whether relatives are counted through taxids (name lookup first)
    fn counts_by_taxid(&self) -> bool {
        false
    }

    /// Records for `taxon`, restricted to `locus` where the database
    /// supports it.
    async fn count_records(&self, taxon: TaxonQuery<'_>, locus: Option<&Locus>) -> Result<u64>;
}

/// A taxon as known to the occurrence/taxonomy service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaxonRecord {
    pub name: String,
    pub key: Option<u64>,
    pub genus_key: Option<u64>,
    pub rank: Option<Rank>,
}

impl TaxonRecord {
    /// Family or above
    pub fn is_higher_taxon(&self) -> bool {
        self.rank.is_some_and(|rank| rank.is_above_genus())
    }
}

/// Congeneric species lookups
#[async_trait]
pub trait RelativesLookup: Send + Sync {
    /// Accepted record for a taxon name. `Error::NotFound` when there is none.
    async fn resolve(&self, taxon: &str) -> Result<TaxonRecord>;

    /// Distinct names of accepted species in the taxon's genus
    async fn relatives(&self, taxon: &TaxonRecord) -> Result<Vec<String>>;

    /// Relatives with occurrence records in a country (ISO 3166 alpha-2)
    async fn relatives_in_country(&self, taxon: &TaxonRecord, country_code: &str) -> Result<Vec<String>>;
}

/// Name to NCBI taxid resolution
#[async_trait]
pub trait TaxonomyLookup: Send + Sync {
    /// Every requested name is a key; `None` means not in the reference
    /// taxonomy.
    async fn taxids(&self, names: &[String]) -> Result<HashMap<String, Option<String>>>;
}

/// Map a reqwest failure onto the retry classification.
pub(crate) fn classify_reqwest(error: reqwest::Error) -> RequestError {
    if let Some(status) = error.status() {
        return RequestError::from_status(status.as_u16(), error.to_string());
    }
    if error.is_decode() {
        return RequestError::Decode(error.to_string());
    }
    RequestError::Network(error.to_string())
}

/// Send a request and return the body of a successful response.
pub(crate) async fn fetch_text(request: reqwest::RequestBuilder) -> std::result::Result<String, RequestError> {
    let response = request.send().await.map_err(classify_reqwest)?;
    let status = response.status();
    let body = response.text().await.map_err(classify_reqwest)?;
    if !status.is_success() {
        return Err(RequestError::from_status(status.as_u16(), body));
    }
    Ok(body)
}

/// Shared HTTP client with the crate's user agent
pub(crate) fn http_client() -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent(concat!("bcid/", env!("CARGO_PKG_VERSION")))
        .timeout(std::time::Duration::from_secs(60))
        .build()
        .map_err(|e| bcid_common::Error::Internal(format!("Failed to build HTTP client: {}", e)))
}
