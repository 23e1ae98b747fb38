//! Static level and text for every flag value

use super::{FlagId, FlagValue};
use bcid_common::{Error, Result};
use serde::Deserialize;
use std::collections::BTreeMap;

const BUILTIN_FLAGS: &str = include_str!("../../config/flags.toml");

/// Level and wording of one flag value
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct FlagText {
    pub level: u8,
    pub outcome: String,
    pub explanation: String,
}

#[derive(Debug, Deserialize)]
struct FlagSpec {
    id: FlagId,
    name: String,
    values: BTreeMap<FlagValue, FlagText>,
}

#[derive(Debug, Deserialize)]
struct FlagsFile {
    flag: Vec<FlagSpec>,
}

#[derive(Debug, Clone)]
pub struct FlagCatalog {
    names: BTreeMap<FlagId, String>,
    texts: BTreeMap<(FlagId, FlagValue), FlagText>,
}

impl FlagCatalog {
    pub fn builtin() -> Result<Self> {
        Self::from_toml_str(BUILTIN_FLAGS)
    }

    /// Parse and validate a catalogue: every value of every flag must be
    /// described, and the coverage summary's no-locus override must be a
    /// warning.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let file: FlagsFile = toml::from_str(content)
            .map_err(|e| Error::Config(format!("Invalid flag catalogue: {}", e)))?;

        let mut names = BTreeMap::new();
        let mut texts = BTreeMap::new();
        for entry in file.flag {
            names.insert(entry.id, entry.name);
            for (value, text) in entry.values {
                texts.insert((entry.id, value), text);
            }
        }

        for id in FlagId::ALL {
            if !names.contains_key(&id) {
                return Err(Error::Config(format!("Flag catalogue is missing flag {}", id)));
            }
            for value in id.values() {
                if !texts.contains_key(&(id, *value)) {
                    return Err(Error::Config(format!(
                        "Flag catalogue is missing value {} for flag {}",
                        value, id
                    )));
                }
            }
        }

        let catalog = Self { names, texts };
        let override_level = catalog.text(FlagId::DbCoverage, FlagValue::B)?.level;
        if override_level != 2 {
            return Err(Error::Config(format!(
                "Flag 5B must have level 2 (warning), found {}",
                override_level
            )));
        }
        Ok(catalog)
    }

    pub fn name(&self, id: FlagId) -> &str {
        self.names.get(&id).map(String::as_str).unwrap_or_default()
    }

    pub fn text(&self, id: FlagId, value: FlagValue) -> Result<&FlagText> {
        self.texts.get(&(id, value)).ok_or_else(|| {
            Error::Invariant(format!("Flag {}{} is not in the catalogue", id, value))
        })
    }

    pub fn level(&self, id: FlagId, value: FlagValue) -> Result<u8> {
        Ok(self.text(id, value)?.level)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_catalogue_is_complete() {
        let catalog = FlagCatalog::builtin().unwrap();
        assert_eq!(catalog.level(FlagId::PositiveId, FlagValue::A).unwrap(), 1);
        assert_eq!(catalog.level(FlagId::DbCoverageTarget, FlagValue::NA).unwrap(), 0);
        assert_eq!(catalog.level(FlagId::DbCoverage, FlagValue::B).unwrap(), 2);
        assert_eq!(catalog.name(FlagId::Sources), "Reference sequence source diversity");
    }

    #[test]
    fn test_missing_value_rejected() {
        let content = BUILTIN_FLAGS.replace("[flag.values.E]", "[flag.values.NA]");
        let err = FlagCatalog::from_toml_str(&content).unwrap_err();
        assert!(matches!(err, Error::Config(msg) if msg.contains("value E")));
    }

    #[test]
    fn test_override_must_be_warning() {
        let content = BUILTIN_FLAGS.replacen(
            "[flag.values.B]\nlevel = 2\noutcome = \"Coverage uncertain\"",
            "[flag.values.B]\nlevel = 1\noutcome = \"Coverage uncertain\"",
            1,
        );
        assert_ne!(content, BUILTIN_FLAGS);
        assert!(FlagCatalog::from_toml_str(&content).is_err());
    }
}
