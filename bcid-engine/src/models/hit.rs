//! Homology-search hits and their taxonomic lineage

use serde::de::Deserializer;
use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;

/// Taxonomic ranks, ordered from most to least inclusive
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Rank {
    Domain,
    Superkingdom,
    Kingdom,
    Phylum,
    Class,
    Order,
    Family,
    Genus,
    Species,
}

impl Rank {
    pub const ALL: [Rank; 9] = [
        Rank::Domain,
        Rank::Superkingdom,
        Rank::Kingdom,
        Rank::Phylum,
        Rank::Class,
        Rank::Order,
        Rank::Family,
        Rank::Genus,
        Rank::Species,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Rank::Domain => "domain",
            Rank::Superkingdom => "superkingdom",
            Rank::Kingdom => "kingdom",
            Rank::Phylum => "phylum",
            Rank::Class => "class",
            Rank::Order => "order",
            Rank::Family => "family",
            Rank::Genus => "genus",
            Rank::Species => "species",
        }
    }

    /// Family and above: no genus context for related-species checks
    pub fn is_above_genus(&self) -> bool {
        *self < Rank::Genus
    }
}

impl fmt::Display for Rank {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Rank {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_ascii_lowercase();
        Rank::ALL
            .iter()
            .find(|r| r.as_str() == lower)
            .copied()
            .ok_or_else(|| format!("unknown rank '{}'", s))
    }
}

/// Rank -> taxon name lineage, iterated from domain down to species.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Taxonomy(BTreeMap<Rank, String>);

impl Taxonomy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, rank: Rank, name: impl Into<String>) {
        let name = name.into();
        if !name.trim().is_empty() {
            self.0.insert(rank, name.trim().to_string());
        }
    }

    pub fn get(&self, rank: Rank) -> Option<&str> {
        self.0.get(&rank).map(String::as_str)
    }

    pub fn species(&self) -> Option<&str> {
        self.get(Rank::Species)
    }

    pub fn iter(&self) -> impl Iterator<Item = (Rank, &str)> {
        self.0.iter().map(|(rank, name)| (*rank, name.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// First lineage entry whose name equals `taxon`, ignoring case
    pub fn find(&self, taxon: &str) -> Option<(Rank, &str)> {
        let wanted = taxon.trim().to_lowercase();
        self.iter().find(|(_, name)| name.to_lowercase() == wanted)
    }

    /// Build from a string map, ignoring keys that are not ranks.
    pub fn from_fields<'a>(fields: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        let mut taxonomy = Taxonomy::new();
        for (key, value) in fields {
            if let Ok(rank) = key.parse::<Rank>() {
                taxonomy.insert(rank, value);
            }
        }
        taxonomy
    }
}

impl Serialize for Taxonomy {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (rank, name) in &self.0 {
            map.serialize_entry(rank.as_str(), name)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for Taxonomy {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        // Upstream lineage records mix ranks with ids and nulls
        let raw: HashMap<String, Value> = HashMap::deserialize(deserializer)?;
        Ok(Taxonomy::from_fields(
            raw.iter()
                .filter_map(|(k, v)| v.as_str().map(|s| (k.as_str(), s))),
        ))
    }
}

/// One homology-search result.
///
/// Fields the engine does not interpret (hit descriptions, BIN URIs, ...)
/// are carried through untouched in `extra`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hit {
    pub hit_id: String,
    #[serde(default)]
    pub species: Option<String>,
    #[serde(default)]
    pub taxonomy: Option<Taxonomy>,
    #[serde(default, deserialize_with = "de_opt_string_or_number")]
    pub taxid: Option<String>,
    /// Fraction identical over the alignment, 0-1
    #[serde(default)]
    pub identity: f64,
    /// BOLD similarity score, 0-1 (replaces identity in BOLD mode)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub similarity: Option<f64>,
    #[serde(default)]
    pub alignment_length: u32,
    #[serde(default)]
    pub query_coverage: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub e_value: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bitscore: Option<f64>,
    #[serde(default)]
    pub accession: String,
    /// Specimen collectors (BOLD records without a publication)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collectors: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_candidate_hit: Option<bool>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Hit {
    /// Accession without its version suffix (`MN123456.1` -> `MN123456`)
    pub fn accession_base(&self) -> &str {
        self.accession.split('.').next().unwrap_or_default()
    }

    pub fn species_name(&self) -> Option<&str> {
        self.species.as_deref().filter(|s| !s.trim().is_empty())
    }

    /// Render one named field for tabular output; absent values are empty.
    pub fn field_text(&self, name: &str) -> String {
        let value = match serde_json::to_value(self) {
            Ok(Value::Object(map)) => map.get(name).cloned(),
            _ => None,
        };
        match value {
            None | Some(Value::Null) => String::new(),
            Some(Value::String(s)) => s,
            Some(other) => other.to_string(),
        }
    }

    /// Use `similarity` as the identity score (BOLD results).
    pub(crate) fn adopt_similarity(&mut self) {
        if let Some(similarity) = self.similarity {
            self.identity = similarity;
        }
    }
}

fn de_opt_string_or_number<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<String>, D::Error> {
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::String(s)) if !s.trim().is_empty() => Some(s),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

/// One row of the accession taxonomy table
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaxonomyRecord {
    pub taxid: Option<String>,
    pub taxonomy: Taxonomy,
}

/// Accession (without version) -> lineage
pub type TaxonomyTable = HashMap<String, TaxonomyRecord>;

impl Hit {
    /// Attach lineage from the taxonomy table, or clear it when the
    /// accession has no row.
    pub fn attach_taxonomy(&mut self, record: Option<&TaxonomyRecord>) {
        match record {
            Some(record) => {
                self.species = record.taxonomy.species().map(str::to_string);
                self.taxid = record.taxid.clone();
                self.taxonomy = Some(record.taxonomy.clone());
            }
            None => {
                self.species = None;
                self.taxid = None;
                self.taxonomy = None;
            }
        }
    }
}

/// Parsed `hits.json`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HitsFile {
    pub hits: Vec<Hit>,
}
