//! GBIF species and occurrence APIs: taxon resolution and congeneric species
//!
//! Relatives are fetched once per genus and shared by every target in that
//! genus for the life of the client.

use super::{fetch_text, http_client, RelativesLookup, TaxonRecord};
use crate::models::Rank;
use async_trait::async_trait;
use bcid_common::config::GbifSettings;
use bcid_common::{Error, RequestError, Result, Throttle};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

const SUGGEST_LIMIT: u32 = 20;

/// Common names that GBIF's suggest endpoint resolves poorly
const CANONICAL_KINGDOMS: [(&str, &str); 25] = [
    ("fungi", "Fungi"),
    ("fungus", "Fungi"),
    ("mycota", "Fungi"),
    ("plant", "Plantae"),
    ("plants", "Plantae"),
    ("plantae", "Plantae"),
    ("chlorophyta", "Plantae"),
    ("animal", "Animalia"),
    ("animals", "Animalia"),
    ("animalia", "Animalia"),
    ("metazoa", "Animalia"),
    ("bacteria", "Bacteria"),
    ("bacterium", "Bacteria"),
    ("archaea", "Archaea"),
    ("archaeabacteria", "Archaea"),
    ("virus", "Viruses"),
    ("viruses", "Viruses"),
    ("viroid", "Viruses"),
    ("viral", "Viruses"),
    ("protozoa", "Protista"),
    ("protozoan", "Protista"),
    ("protist", "Protista"),
    ("protists", "Protista"),
    ("protista", "Protista"),
    ("chromista", "Chromista"),
];

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SpeciesRecord {
    key: Option<u64>,
    species_key: Option<u64>,
    genus_key: Option<u64>,
    canonical_name: Option<String>,
    rank: Option<String>,
    status: Option<String>,
    taxonomic_status: Option<String>,
    #[serde(alias = "extinct")]
    is_extinct: Option<bool>,
}

impl SpeciesRecord {
    fn status(&self) -> Option<&str> {
        self.status.as_deref().or(self.taxonomic_status.as_deref())
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchPage {
    #[serde(default)]
    results: Vec<SpeciesRecord>,
    #[serde(default = "default_true")]
    end_of_records: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize)]
struct OccurrencePage {
    #[serde(default)]
    facets: Vec<Facet>,
}

#[derive(Debug, Deserialize)]
struct Facet {
    #[serde(default)]
    counts: Vec<FacetCount>,
}

#[derive(Debug, Deserialize)]
struct FacetCount {
    name: String,
}

/// One accepted species in a genus
#[derive(Debug, Clone, PartialEq, Eq)]
struct GenusMember {
    name: String,
    species_key: Option<u64>,
}

type GenusCache = Mutex<HashMap<u64, Arc<OnceCell<Vec<GenusMember>>>>>;

pub struct GbifClient {
    http: reqwest::Client,
    settings: GbifSettings,
    /// Suggest and occurrence endpoints
    fast: Throttle,
    /// Paged species search
    slow: Throttle,
    genus_cache: GenusCache,
}

impl GbifClient {
    pub fn new(settings: &GbifSettings, fast: Throttle, slow: Throttle) -> Result<Self> {
        Ok(Self {
            http: http_client()?,
            settings: settings.clone(),
            fast,
            slow,
            genus_cache: Mutex::new(HashMap::new()),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.settings.base_url.trim_end_matches('/'), path)
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        throttle: &Throttle,
        path: &str,
        params: &[(&str, String)],
    ) -> Result<T> {
        let url = self.url(path);
        let body = throttle
            .with_retry(|| fetch_text(self.http.get(&url).query(params)))
            .await?;
        serde_json::from_str(&body)
            .map_err(|e| Error::Request(RequestError::Decode(format!("GBIF {}: {}", path, e))))
    }

    fn is_accepted(&self, record: &SpeciesRecord) -> bool {
        let accepted = record
            .status()
            .is_some_and(|s| self.settings.accepted_status.iter().any(|a| a == s));
        accepted && record.is_extinct != Some(true)
    }

    async fn genus_members(&self, genus_key: u64) -> Result<Vec<GenusMember>> {
        let cell = {
            let mut cache = self
                .genus_cache
                .lock()
                .map_err(|_| Error::Internal("GBIF genus cache poisoned".to_string()))?;
            cache.entry(genus_key).or_default().clone()
        };
        cell.get_or_try_init(|| self.fetch_genus_members(genus_key))
            .await
            .cloned()
    }

    async fn fetch_genus_members(&self, genus_key: u64) -> Result<Vec<GenusMember>> {
        let limit = self.settings.limit_records;
        let mut members = Vec::new();
        let mut seen = HashSet::new();

        for page in 0..self.settings.max_pages {
            let params = [
                ("rank", "SPECIES".to_string()),
                ("highertaxon_key", genus_key.to_string()),
                ("limit", limit.to_string()),
                ("offset", (page * limit).to_string()),
            ];
            let result: SearchPage = self.get_json(&self.slow, "species/search", &params).await?;
            let before = members.len();
            for record in result.results.iter().filter(|r| self.is_accepted(r)) {
                if let Some(name) = &record.canonical_name {
                    if seen.insert(name.clone()) {
                        members.push(GenusMember {
                            name: name.clone(),
                            species_key: record.species_key.or(record.key),
                        });
                    }
                }
            }
            if result.end_of_records {
                break;
            }
            if page > 5 && members.len() == before {
                warn!(
                    genus_key,
                    fetched = members.len(),
                    "GBIF keeps paging without new species, stopping early"
                );
                break;
            }
        }
        debug!(genus_key, species = members.len(), "Fetched GBIF genus members");
        Ok(members)
    }

    async fn country_species_keys(&self, genus_key: u64, country_code: &str) -> Result<HashSet<u64>> {
        let limit = self.settings.limit_records;
        let mut keys = HashSet::new();
        for page in 0..self.settings.max_pages {
            let params = [
                ("genusKey", genus_key.to_string()),
                ("country", country_code.to_string()),
                ("facet", "speciesKey".to_string()),
                ("facetLimit", limit.to_string()),
                ("facetOffset", (page * limit).to_string()),
                ("limit", "0".to_string()),
            ];
            let result: OccurrencePage = self.get_json(&self.fast, "occurrence/search", &params).await?;
            let counts = result.facets.into_iter().next().map(|f| f.counts).unwrap_or_default();
            let page_len = counts.len();
            keys.extend(counts.iter().filter_map(|c| c.name.parse::<u64>().ok()));
            if page_len < limit {
                break;
            }
        }
        Ok(keys)
    }
}

#[async_trait]
impl RelativesLookup for GbifClient {
    async fn resolve(&self, taxon: &str) -> Result<TaxonRecord> {
        let mut params = vec![("limit", SUGGEST_LIMIT.to_string())];
        let canonical = CANONICAL_KINGDOMS
            .iter()
            .find(|(alias, _)| *alias == taxon.trim().to_lowercase());
        match canonical {
            Some((_, kingdom)) => {
                params.push(("q", kingdom.to_string()));
                params.push(("rank", "KINGDOM".to_string()));
            }
            None => params.push(("q", taxon.to_string())),
        }

        let records: Vec<SpeciesRecord> = self.get_json(&self.fast, "species/suggest", &params).await?;
        let record = records
            .into_iter()
            .find(|r| self.is_accepted(r))
            .ok_or_else(|| {
                Error::NotFound(format!(
                    "No GBIF record found for '{}'. Taxonomic records cannot be retrieved for this \
                     name - please check that it is correct.",
                    taxon
                ))
            })?;

        let rank = record.rank.as_deref().and_then(|r| r.parse::<Rank>().ok());
        info!(
            taxon = %taxon,
            rank = ?rank,
            genus_key = ?record.genus_key,
            "GBIF record found"
        );
        Ok(TaxonRecord {
            name: taxon.to_string(),
            key: record.key,
            genus_key: record.genus_key,
            rank,
        })
    }

    async fn relatives(&self, taxon: &TaxonRecord) -> Result<Vec<String>> {
        let Some(genus_key) = taxon.genus_key else {
            return Ok(Vec::new());
        };
        Ok(self
            .genus_members(genus_key)
            .await?
            .into_iter()
            .map(|m| m.name)
            .collect())
    }

    async fn relatives_in_country(&self, taxon: &TaxonRecord, country_code: &str) -> Result<Vec<String>> {
        let Some(genus_key) = taxon.genus_key else {
            return Ok(Vec::new());
        };
        let keys = self.country_species_keys(genus_key, country_code).await?;
        Ok(self
            .genus_members(genus_key)
            .await?
            .into_iter()
            .filter(|m| m.species_key.is_some_and(|k| keys.contains(&k)))
            .map(|m| m.name)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(json: serde_json::Value) -> SpeciesRecord {
        serde_json::from_value(json).unwrap()
    }

    #[test]
    fn test_suggest_record_fields() {
        let r = record(serde_json::json!({
            "key": 1650098,
            "canonicalName": "Culex pipiens",
            "rank": "SPECIES",
            "status": "ACCEPTED",
            "genusKey": 1650096
        }));
        assert_eq!(r.status(), Some("ACCEPTED"));
        assert_eq!(r.genus_key, Some(1650096));
        assert_eq!(r.rank.as_deref().and_then(|s| s.parse::<Rank>().ok()), Some(Rank::Species));
    }

    #[test]
    fn test_search_record_uses_taxonomic_status() {
        let r = record(serde_json::json!({
            "key": 5,
            "speciesKey": 5,
            "canonicalName": "Culex torrentium",
            "taxonomicStatus": "DOUBTFUL",
            "extinct": false
        }));
        assert_eq!(r.status(), Some("DOUBTFUL"));
        assert_eq!(r.is_extinct, Some(false));
    }

    #[test]
    fn test_occurrence_facets_parse() {
        let page: OccurrencePage = serde_json::from_str(
            r#"{"count": 10, "results": [], "facets": [{"field": "SPECIES_KEY", "counts": [{"name": "5", "count": 9}]}]}"#,
        )
        .unwrap();
        assert_eq!(page.facets[0].counts[0].name, "5");
    }
}
