//! Durable per-query flag records (`<flag_id>.flag` JSON lists)

use super::Flag;
use bcid_common::Result;
use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

const FLAG_EXTENSION: &str = "flag";

#[derive(Debug, Clone)]
pub struct FlagStore {
    dir: PathBuf,
}

impl FlagStore {
    pub fn new(query_dir: &Path) -> Self {
        Self {
            dir: query_dir.to_path_buf(),
        }
    }

    fn path_for(&self, flag: &Flag) -> PathBuf {
        self.dir.join(format!("{}.{}", flag.flag_id, FLAG_EXTENSION))
    }

    /// Write a flag, replacing any stored flag with the same
    /// `(flag_id, target, target_type)`.
    pub fn write(&self, flag: Flag) -> Result<()> {
        let path = self.path_for(&flag);
        let mut flags = if path.exists() {
            read_flag_file(&path).unwrap_or_else(|e| {
                warn!(path = %path.display(), error = %e, "Discarding unreadable flag file");
                Vec::new()
            })
        } else {
            Vec::new()
        };

        match flags.iter_mut().find(|existing| existing.same_key(&flag)) {
            Some(existing) => *existing = flag.clone(),
            None => flags.push(flag.clone()),
        }

        std::fs::write(&path, serde_json::to_vec_pretty(&flags)?)?;
        info!(flag = %flag, target = ?flag.target, target_type = ?flag.target_type, "Flag written");
        Ok(())
    }

    /// Load every stored flag. Unreadable files are skipped with a warning.
    pub fn read_all(&self) -> Result<Vec<Flag>> {
        let mut paths: Vec<PathBuf> = std::fs::read_dir(&self.dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.is_file() && p.extension().and_then(|e| e.to_str()) == Some(FLAG_EXTENSION))
            .collect();
        paths.sort();

        let mut flags = Vec::new();
        for path in paths {
            match read_flag_file(&path) {
                Ok(mut file_flags) => flags.append(&mut file_flags),
                Err(e) => warn!(path = %path.display(), error = %e, "Error reading flag file"),
            }
        }
        Ok(flags)
    }
}

/// A flag file holds a list of records; a bare record is also accepted.
fn read_flag_file(path: &Path) -> Result<Vec<Flag>> {
    let value: Value = serde_json::from_str(&std::fs::read_to_string(path)?)?;
    Ok(match value {
        Value::Array(_) => serde_json::from_value(value)?,
        single => vec![serde_json::from_value(single)?],
    })
}
