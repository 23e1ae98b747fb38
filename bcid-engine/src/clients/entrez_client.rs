//! NCBI E-utilities client: nuccore record counts and GenBank references

use super::{fetch_text, http_client, PublicationSource, RecordCounter, TaxonQuery};
use crate::models::{LiteratureSource, Locus, Publication};
use async_trait::async_trait;
use bcid_common::config::EntrezSettings;
use bcid_common::{Error, RequestError, Result, Throttle};
use serde::Deserialize;
use std::collections::HashMap;
use tracing::{debug, info, warn};

const DATABASE: &str = "nuccore";
const TOOL: &str = "bcid";

/// COMMENT tag present on records from automated genome annotation
pub const AUTOMATED_ANNOTATION_TAG: &str = "##Genome-Annotation-Data-START##";

#[derive(Debug, Deserialize)]
struct SearchResponse {
    esearchresult: SearchResult,
}

#[derive(Debug, Deserialize)]
struct SearchResult {
    count: Option<String>,
    #[serde(rename = "ERROR")]
    error: Option<String>,
}

pub struct EntrezClient {
    http: reqwest::Client,
    settings: EntrezSettings,
    throttle: Throttle,
}

impl EntrezClient {
    pub fn new(settings: &EntrezSettings, throttle: Throttle) -> Result<Self> {
        if let Some(key) = settings.api_key.as_deref() {
            let shown: String = key.chars().take(5).collect();
            info!(api_key = %format!("{}*********", shown), "Using NCBI API key");
        }
        Ok(Self {
            http: http_client()?,
            settings: settings.clone(),
            throttle,
        })
    }

    fn url(&self, utility: &str) -> String {
        format!("{}/{}.fcgi", self.settings.base_url.trim_end_matches('/'), utility)
    }

    fn common_params(&self) -> Vec<(&'static str, String)> {
        let mut params = vec![("db", DATABASE.to_string()), ("tool", TOOL.to_string())];
        if let Some(email) = &self.settings.email {
            params.push(("email", email.clone()));
        }
        if let Some(key) = &self.settings.api_key {
            params.push(("api_key", key.clone()));
        }
        params
    }

    async fn get(&self, utility: &str, params: Vec<(&'static str, String)>) -> Result<String> {
        let url = self.url(utility);
        self.throttle
            .with_retry(|| fetch_text(self.http.get(&url).query(&params)))
            .await
    }
}

/// esearch term for a taxon, optionally restricted to a locus
pub fn search_term(taxon: TaxonQuery<'_>, locus: Option<&Locus>) -> String {
    let organism = match taxon.taxid {
        Some(taxid) => format!("txid{}[Organism]", taxid),
        None => format!("\"{}\"[Organism]", taxon.name),
    };
    match locus {
        Some(locus) => format!("{} AND ({})", organism, locus.genbank_query()),
        None => organism,
    }
}

/// Extract the hit count from an esearch JSON body.
///
/// A missing or non-integer count is a logic error, not a lookup failure.
pub fn parse_search_count(body: &str) -> Result<u64> {
    let response: SearchResponse = serde_json::from_str(body)
        .map_err(|e| Error::Request(RequestError::Decode(format!("esearch response: {}", e))))?;
    if let Some(message) = response.esearchresult.error {
        return Err(Error::Request(RequestError::Status {
            status: 200,
            body: message,
        }));
    }
    let raw = response
        .esearchresult
        .count
        .ok_or_else(|| Error::Invariant("esearch response has no count".to_string()))?;
    raw.trim()
        .parse::<u64>()
        .map_err(|_| Error::Invariant(format!("Unexpected non-integer esearch count '{}'", raw)))
}

#[async_trait]
impl RecordCounter for EntrezClient {
    fn database(&self) -> &'static str {
        "GenBank"
    }

    fn counts_by_taxid(&self) -> bool {
        true
    }

    async fn count_records(&self, taxon: TaxonQuery<'_>, locus: Option<&Locus>) -> Result<u64> {
        let term = search_term(taxon, locus);
        debug!(term = %term, "Submitting Entrez query");
        let mut params = self.common_params();
        params.push(("term", term));
        params.push(("retmax", "1".to_string()));
        params.push(("retmode", "json".to_string()));
        let body = self.get("esearch", params).await?;
        parse_search_count(&body)
    }
}

#[async_trait]
impl PublicationSource for EntrezClient {
    async fn fetch_sources(&self, accessions: &[String]) -> Result<HashMap<String, LiteratureSource>> {
        if accessions.is_empty() {
            return Ok(HashMap::new());
        }
        debug!(count = accessions.len(), "Fetching GenBank metadata");
        let mut params = self.common_params();
        params.push(("id", accessions.join(",")));
        params.push(("rettype", "gb".to_string()));
        params.push(("retmode", "text".to_string()));
        let body = self.get("efetch", params).await?;

        let sources = parse_genbank_references(&body);
        let missing: Vec<&str> = accessions
            .iter()
            .map(String::as_str)
            .filter(|acc| !sources.contains_key(*acc))
            .collect();
        if !missing.is_empty() {
            warn!(missing = ?missing, "No GenBank data returned for some accessions");
        }
        Ok(sources)
    }
}

#[derive(Clone, Copy, PartialEq)]
enum RefField {
    Authors,
    Title,
    Journal,
    Other,
}

/// Parse GenBank flat-file records into literature sources keyed by
/// accession (without version).
pub fn parse_genbank_references(text: &str) -> HashMap<String, LiteratureSource> {
    let mut sources = HashMap::new();
    for record in text.split("\n//") {
        if let Some(source) = parse_record(record) {
            sources.insert(source.accession.clone(), source);
        }
    }
    sources
}

fn parse_record(record: &str) -> Option<LiteratureSource> {
    let mut accession: Option<String> = None;
    let mut publications: Vec<Publication> = Vec::new();
    let mut authors_text: Vec<String> = Vec::new();
    let mut field = RefField::Other;
    let mut in_reference = false;
    let is_automated = record.contains(AUTOMATED_ANNOTATION_TAG);

    let flush_authors = |publications: &mut Vec<Publication>, authors_text: &mut Vec<String>| {
        if let Some(publication) = publications.last_mut() {
            if !authors_text.is_empty() {
                publication.authors = split_authors(&authors_text.join(" "));
                authors_text.clear();
            }
        }
    };

    for line in record.lines() {
        if line.starts_with("FEATURES") || line.starts_with("ORIGIN") {
            break;
        }
        let (key, value) = split_line(line);

        if !line.starts_with(' ') && !line.is_empty() {
            if in_reference {
                flush_authors(&mut publications, &mut authors_text);
            }
            in_reference = key == "REFERENCE";
            field = RefField::Other;
            if key == "ACCESSION" {
                accession = value.split_whitespace().next().map(str::to_string);
            }
            if in_reference {
                publications.push(Publication::default());
            }
            continue;
        }
        if !in_reference {
            continue;
        }

        if !key.is_empty() {
            if field == RefField::Authors {
                flush_authors(&mut publications, &mut authors_text);
            }
            field = match key {
                "AUTHORS" | "CONSRTM" => RefField::Authors,
                "TITLE" => RefField::Title,
                "JOURNAL" => RefField::Journal,
                _ => RefField::Other,
            };
        }

        let Some(publication) = publications.last_mut() else {
            continue;
        };
        match field {
            RefField::Authors => authors_text.push(value.to_string()),
            RefField::Title => append(&mut publication.title, value),
            RefField::Journal => append(&mut publication.journal, value),
            RefField::Other => {}
        }
    }
    if in_reference {
        flush_authors(&mut publications, &mut authors_text);
    }

    let accession = accession?;
    Some(LiteratureSource {
        accession: accession.split('.').next().unwrap_or_default().to_string(),
        is_automated,
        publications,
    })
}

/// Keyword (columns 0-11) and value (column 12 on) of a flat-file line
fn split_line(line: &str) -> (&str, &str) {
    match line.char_indices().nth(12) {
        Some((idx, _)) => (line[..idx].trim(), line[idx..].trim()),
        None => (line.trim(), ""),
    }
}

fn append(slot: &mut Option<String>, text: &str) {
    if text.is_empty() {
        return;
    }
    match slot {
        Some(existing) => {
            existing.push(' ');
            existing.push_str(text);
        }
        None => *slot = Some(text.to_string()),
    }
}

/// `Smith,J., Doe,K. and Lee,M.` -> `["Smith,J.", "Doe,K.", "Lee,M."]`
fn split_authors(text: &str) -> Vec<String> {
    text.replace(" and ", ", ")
        .split(", ")
        .map(str::trim)
        .filter(|a| !a.is_empty() && *a != ".")
        .map(str::to_string)
        .collect()
}
