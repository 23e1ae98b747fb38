//! Per-sample metadata declared by the submitter

use serde::{Deserialize, Deserializer, Serialize};
use tracing::warn;

/// Contents of a query directory's `metadata.json`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryMetadata {
    pub sample_id: String,
    #[serde(default)]
    pub locus: Option<String>,
    #[serde(default)]
    pub preliminary_id: Option<String>,
    /// Accepts a list or a `|`-separated string
    #[serde(default, deserialize_with = "de_taxa_list")]
    pub taxa_of_interest: Vec<String>,
    #[serde(default)]
    pub country: Option<String>,
    /// ISO 3166-1 alpha-2 code
    #[serde(default)]
    pub country_code: Option<String>,
}

impl QueryMetadata {
    pub fn preliminary_id(&self) -> Option<&str> {
        self.preliminary_id
            .as_deref()
            .map(str::trim)
            .filter(|p| !p.is_empty() && !p.eq_ignore_ascii_case("na"))
    }

    /// Two-letter country code used for occurrence searches. A bare
    /// two-letter `country` is accepted as a code; other country names
    /// without an explicit code cannot be resolved.
    pub fn country_code(&self) -> Option<String> {
        let explicit = self
            .country_code
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty());
        if let Some(code) = explicit {
            return Some(code.to_ascii_uppercase());
        }
        let country = self.country.as_deref().map(str::trim).filter(|c| !c.is_empty())?;
        if country.len() == 2 && country.chars().all(|c| c.is_ascii_alphabetic()) {
            return Some(country.to_ascii_uppercase());
        }
        warn!(
            sample_id = %self.sample_id,
            country = %country,
            "No country code declared; country coverage will not be assessed"
        );
        None
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum TaxaList {
    List(Vec<String>),
    Joined(String),
}

fn de_taxa_list<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<String>, D::Error> {
    let raw: Option<TaxaList> = Option::deserialize(deserializer)?;
    let items = match raw {
        None => Vec::new(),
        Some(TaxaList::List(items)) => items,
        Some(TaxaList::Joined(joined)) => joined.split('|').map(str::to_string).collect(),
    };
    Ok(items
        .into_iter()
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .collect())
}
