//! BOLD public stats API: specimen record counts per taxon

use super::{fetch_text, http_client, RecordCounter, TaxonQuery};
use crate::models::{Locus, Rank};
use async_trait::async_trait;
use bcid_common::config::BoldSettings;
use bcid_common::{Error, RequestError, Result, Throttle};
use serde_json::Value;
use tracing::{debug, warn};

/// Ranks the stats endpoint drills down to
const COUNTABLE_RANKS: [Rank; 4] = [Rank::Species, Rank::Genus, Rank::Family, Rank::Order];

pub struct BoldClient {
    http: reqwest::Client,
    settings: BoldSettings,
    throttle: Throttle,
}

impl BoldClient {
    pub fn new(settings: &BoldSettings, throttle: Throttle) -> Result<Self> {
        Ok(Self {
            http: http_client()?,
            settings: settings.clone(),
            throttle,
        })
    }
}

/// Record count for `taxon` from a stats response. With a rank, the count
/// is taken from that rank's drill-down entry (0 when absent).
pub fn parse_stats_count(body: &str, taxon: &str, rank: Option<Rank>) -> Result<u64> {
    let data: Value = serde_json::from_str(body)
        .map_err(|e| Error::Request(RequestError::Decode(format!("BOLD stats response: {}", e))))?;

    let with_names = as_count(data.get("records_with_species_name"))
        .ok_or_else(|| Error::Invariant(format!("BOLD stats for '{}' has no record count", taxon)))?;
    if with_names == 0 {
        return Ok(0);
    }
    let Some(rank) = rank else {
        return Ok(with_names);
    };

    let entities = data
        .get(rank.as_str())
        .and_then(|r| r.get("drill_down"))
        .and_then(|d| d.get("entity"))
        .and_then(Value::as_array);
    let found = entities.into_iter().flatten().find(|entity| {
        entity
            .get("name")
            .and_then(Value::as_str)
            .is_some_and(|name| name.eq_ignore_ascii_case(taxon))
    });
    match found {
        Some(entity) => as_count(entity.get("records")).ok_or_else(|| {
            Error::Invariant(format!("Unexpected BOLD record count for '{}': {:?}", taxon, entity.get("records")))
        }),
        None => {
            warn!(taxon = %taxon, rank = %rank, "No rank-level BOLD record count found, using 0");
            Ok(0)
        }
    }
}

fn as_count(value: Option<&Value>) -> Option<u64> {
    match value? {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

#[async_trait]
impl RecordCounter for BoldClient {
    fn database(&self) -> &'static str {
        "BOLD"
    }

    /// BOLD is always searched for the COI barcode, so `locus` is unused.
    async fn count_records(&self, taxon: TaxonQuery<'_>, _locus: Option<&Locus>) -> Result<u64> {
        if let Some(rank) = taxon.rank {
            if !COUNTABLE_RANKS.contains(&rank) {
                return Err(Error::InvalidInput(format!(
                    "Cannot retrieve BOLD record count for '{}' at rank {}: rank must be order or lower",
                    taxon.name, rank
                )));
            }
        }
        debug!(taxon = %taxon.name, rank = ?taxon.rank, "Fetching BOLD record count");
        let params = [("taxon", taxon.name.to_string()), ("format", "json".to_string())];
        let url = self.settings.stats_url.clone();
        let body = self
            .throttle
            .with_retry(|| fetch_text(self.http.get(&url).query(&params)))
            .await?;
        parse_stats_count(&body, taxon.name, taxon.rank)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const STATS: &str = r#"{
        "total_records": 120,
        "records_with_species_name": 110,
        "species": {
            "count": 2,
            "drill_down": {"entity": [
                {"name": "Culex pipiens", "records": 80},
                {"name": "Culex torrentium", "records": "30"}
            ]}
        }
    }"#;

    #[test]
    fn test_rank_level_count() {
        assert_eq!(parse_stats_count(STATS, "culex torrentium", Some(Rank::Species)).unwrap(), 30);
        assert_eq!(parse_stats_count(STATS, "Culex vishnui", Some(Rank::Species)).unwrap(), 0);
        assert_eq!(parse_stats_count(STATS, "Culex", Some(Rank::Genus)).unwrap(), 0);
    }

    #[test]
    fn test_generic_count() {
        assert_eq!(parse_stats_count(STATS, "Culex", None).unwrap(), 110);
        assert_eq!(
            parse_stats_count(r#"{"records_with_species_name": 0}"#, "X", Some(Rank::Species)).unwrap(),
            0
        );
    }

    #[test]
    fn test_missing_count_is_invariant() {
        assert!(matches!(parse_stats_count("{}", "X", None), Err(Error::Invariant(_))));
    }
}
