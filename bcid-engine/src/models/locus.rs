//! Barcoding loci and their GenBank search terms

use bcid_common::{Error, Result};
use serde::Deserialize;

const BUILTIN_LOCI: &str = include_str!("../../config/loci.toml");

/// GenBank fields searched for ambiguous synonyms
const RESTRICTED_FIELDS: [&str; 2] = ["Title", "GENE"];

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Locus {
    pub name: String,
    #[serde(default)]
    pub ambiguous_synonyms: Vec<String>,
    #[serde(default)]
    pub non_ambiguous_synonyms: Vec<String>,
}

impl Locus {
    fn answers_to(&self, wanted: &str) -> bool {
        self.name.to_lowercase() == wanted
            || self
                .ambiguous_synonyms
                .iter()
                .chain(&self.non_ambiguous_synonyms)
                .any(|s| s.to_lowercase() == wanted)
    }

    /// Entrez term restricting results to this locus, e.g.
    /// `(coi[Title]) OR (coi[GENE]) OR (cytochrome c oxidase subunit 1)`
    pub fn genbank_query(&self) -> String {
        let mut terms: Vec<String> = self
            .ambiguous_synonyms
            .iter()
            .flat_map(|syn| RESTRICTED_FIELDS.iter().map(move |field| format!("({}[{}])", syn, field)))
            .collect();
        terms.extend(self.non_ambiguous_synonyms.iter().map(|syn| format!("({})", syn)));
        terms.join(" OR ")
    }
}

#[derive(Debug, Deserialize)]
struct LociFile {
    locus: Vec<Locus>,
}

/// Known loci
#[derive(Debug, Clone)]
pub struct LocusCatalog {
    loci: Vec<Locus>,
}

impl LocusCatalog {
    pub fn builtin() -> Result<Self> {
        Self::from_toml_str(BUILTIN_LOCI)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let file: LociFile = toml::from_str(content)
            .map_err(|e| Error::Config(format!("Invalid loci catalogue: {}", e)))?;
        Ok(Self { loci: file.locus })
    }

    /// Resolve a sample's declared locus. Blank or "NA" means no locus was
    /// provided; an unrecognised name is an input error.
    pub fn resolve(&self, declared: Option<&str>) -> Result<Option<Locus>> {
        let Some(raw) = declared else {
            return Ok(None);
        };
        let mut wanted = raw.trim().to_lowercase();
        if let Some(stripped) = wanted.strip_suffix(" gene") {
            wanted = stripped.trim().to_string();
        }
        if wanted.is_empty() || wanted == "na" {
            return Ok(None);
        }
        self.loci
            .iter()
            .find(|locus| locus.answers_to(&wanted))
            .cloned()
            .map(Some)
            .ok_or_else(|| {
                let allowed: Vec<&str> = self.loci.iter().map(|l| l.name.as_str()).collect();
                Error::InvalidInput(format!(
                    "Unrecognized locus '{}'. Allowed loci: {}",
                    raw.trim(),
                    allowed.join(", ")
                ))
            })
    }

    /// BOLD searches are always against the COI barcode region
    pub fn bold_locus(&self) -> Result<Locus> {
        self.resolve(Some("COI"))?
            .ok_or_else(|| Error::Config("Loci catalogue has no COI entry".to_string()))
    }
}
