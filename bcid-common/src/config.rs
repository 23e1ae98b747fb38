//! Configuration loading and config file resolution
//!
//! A single [`Config`] is built at process start (TOML file, then
//! environment overrides, then validation) and handed to every stage by
//! reference. Nothing below the binary's `main` reads the environment.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

/// Environment variable naming an explicit config file
pub const CONFIG_ENV_VAR: &str = "BCID_CONFIG";

/// Identity, coverage and source thresholds that drive flag outcomes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Criteria {
    /// Minimum alignment length (nt) for a hit to be relevant
    pub min_nt: u32,
    /// Minimum query coverage (0-1) for a hit to be relevant
    pub min_q_coverage: f64,
    pub min_identity: f64,
    pub min_identity_strict: f64,
    /// Median identity below `threshold * factor` is classed as danger
    pub median_identity_warning_factor: f64,
    pub max_candidates_for_analysis: usize,
    /// Independent sources must exceed this count for flag 4A
    pub sources_min_count: usize,
    pub db_cov_target_min_a: u64,
    pub db_cov_target_min_b: u64,
    /// Percent of related species represented, for flag 5.2
    pub db_cov_related_min_a: f64,
    pub db_cov_related_min_b: f64,
    pub phylogeny_max_hits_per_species: usize,
}

impl Default for Criteria {
    fn default() -> Self {
        Self {
            min_nt: 300,
            min_q_coverage: 0.85,
            min_identity: 0.935,
            min_identity_strict: 0.985,
            median_identity_warning_factor: 0.95,
            max_candidates_for_analysis: 3,
            sources_min_count: 5,
            db_cov_target_min_a: 5,
            db_cov_target_min_b: 1,
            db_cov_related_min_a: 90.0,
            db_cov_related_min_b: 10.0,
            phylogeny_max_hits_per_species: 30,
        }
    }
}

/// Database coverage stage limits
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoverageSettings {
    /// Candidates are skipped entirely when there are more than this
    pub max_candidates: usize,
    /// Taxa of interest beyond this many are not assessed
    pub toi_limit: usize,
    /// Concurrent coverage tasks
    pub workers: usize,
}

impl Default for CoverageSettings {
    fn default() -> Self {
        Self {
            max_candidates: 3,
            toi_limit: 10,
            workers: 15,
        }
    }
}

/// Cross-process throttle and retry policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThrottleSettings {
    /// SQLite file shared by every process on this host.
    /// Defaults to `<tmp>/bcid/<user email>/throttle.sqlite`.
    pub database: Option<PathBuf>,
    pub max_attempts: u32,
    pub retry_backoff_ms: u64,
    pub rate_limit_backoff_secs: u64,
    pub jitter_min_ms: u64,
    pub jitter_max_ms: u64,
    pub progress_interval_secs: u64,
}

impl Default for ThrottleSettings {
    fn default() -> Self {
        Self {
            database: None,
            max_attempts: 3,
            retry_backoff_ms: 1000,
            rate_limit_backoff_secs: 600,
            jitter_min_ms: 100,
            jitter_max_ms: 2000,
            progress_interval_secs: 15,
        }
    }
}

impl ThrottleSettings {
    /// Resolve the throttle database path, scoping the default by user so
    /// that separate users on one host do not share quotas.
    pub fn database_path(&self, user_email: Option<&str>) -> PathBuf {
        if let Some(path) = &self.database {
            return path.clone();
        }
        let user = user_email
            .filter(|e| !e.trim().is_empty())
            .map(|e| e.trim().replace(['/', '\\'], "_"))
            .unwrap_or_else(|| "anonymous".to_string());
        std::env::temp_dir()
            .join("bcid")
            .join(user)
            .join("throttle.sqlite")
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    pub fn rate_limit_backoff(&self) -> Duration {
        Duration::from_secs(self.rate_limit_backoff_secs)
    }

    pub fn progress_interval(&self) -> Duration {
        Duration::from_secs(self.progress_interval_secs)
    }
}

/// NCBI E-utilities
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EntrezSettings {
    pub base_url: String,
    /// Contact address sent with every request (also scopes the throttle)
    pub email: Option<String>,
    pub api_key: Option<String>,
    pub requests_per_second: u32,
    /// Accessions per efetch request
    pub fetch_batch_size: usize,
    /// Concurrent efetch batches
    pub workers: usize,
}

impl Default for EntrezSettings {
    fn default() -> Self {
        Self {
            base_url: "https://eutils.ncbi.nlm.nih.gov/entrez/eutils".to_string(),
            email: None,
            api_key: None,
            requests_per_second: 10,
            fetch_batch_size: 10,
            workers: 15,
        }
    }
}

/// GBIF species and occurrence APIs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GbifSettings {
    pub base_url: String,
    /// Page size for species and facet searches
    pub limit_records: usize,
    pub accepted_status: Vec<String>,
    /// Hard stop for paged searches
    pub max_pages: usize,
}

impl Default for GbifSettings {
    fn default() -> Self {
        Self {
            base_url: "https://api.gbif.org/v1".to_string(),
            limit_records: 500,
            accepted_status: vec!["ACCEPTED".to_string(), "DOUBTFUL".to_string()],
            max_pages: 50,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BoldSettings {
    pub stats_url: String,
}

impl Default for BoldSettings {
    fn default() -> Self {
        Self {
            stats_url: "https://v4.boldsystems.org/index.php/API_Public/stats".to_string(),
        }
    }
}

/// Local taxonkit installation used for name -> taxid resolution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TaxonkitSettings {
    pub binary: String,
    pub data_dir: Option<PathBuf>,
}

impl Default for TaxonkitSettings {
    fn default() -> Self {
        Self {
            binary: "taxonkit".to_string(),
            data_dir: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Default filter when RUST_LOG is unset
    pub level: String,
    /// File name (inside the output directory) that receives a copy of the log
    pub file: Option<String>,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: Some("bcid.log".to_string()),
        }
    }
}

/// Complete pipeline configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub criteria: Criteria,
    pub coverage: CoverageSettings,
    pub throttle: ThrottleSettings,
    pub entrez: EntrezSettings,
    pub gbif: GbifSettings,
    pub bold: BoldSettings,
    pub taxonkit: TaxonkitSettings,
    pub logging: LoggingSettings,
}

impl Config {
    /// Load configuration following the priority order:
    /// 1. Command-line `--config` path (highest priority)
    /// 2. `BCID_CONFIG` environment variable
    /// 3. `<config dir>/bcid/config.toml`, if present
    /// 4. Compiled defaults (fallback)
    ///
    /// Environment overrides are applied on top, then the result is validated.
    pub fn load(cli_arg: Option<&Path>) -> Result<Self> {
        let mut config = match resolve_config_path(cli_arg, CONFIG_ENV_VAR) {
            Some(path) => {
                info!(path = %path.display(), "Loading configuration file");
                Self::from_file(&path)?
            }
            None => {
                debug!("No configuration file found, using compiled defaults");
                Self::default()
            }
        };
        config.apply_overrides(|name| std::env::var(name).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("Cannot read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::Config(format!("Invalid TOML: {}", e)))
    }

    /// Apply operator overrides. `lookup` returns the raw value of a
    /// variable, if set; `load` passes the process environment.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let c = &mut self.criteria;
        override_parsed(&lookup, "MIN_NT", &mut c.min_nt)?;
        override_parsed(&lookup, "MIN_Q_COVERAGE", &mut c.min_q_coverage)?;
        override_parsed(&lookup, "MIN_IDENTITY", &mut c.min_identity)?;
        override_parsed(&lookup, "MIN_IDENTITY_STRICT", &mut c.min_identity_strict)?;
        override_parsed(
            &lookup,
            "MEDIAN_IDENTITY_WARNING_FACTOR",
            &mut c.median_identity_warning_factor,
        )?;
        override_parsed(
            &lookup,
            "MAX_CANDIDATES_FOR_ANALYSIS",
            &mut c.max_candidates_for_analysis,
        )?;
        override_parsed(&lookup, "MIN_SOURCE_COUNT", &mut c.sources_min_count)?;
        override_parsed(&lookup, "DB_COV_MIN_A", &mut c.db_cov_target_min_a)?;
        override_parsed(&lookup, "DB_COV_MIN_B", &mut c.db_cov_target_min_b)?;
        override_parsed(&lookup, "DB_COV_RELATED_MIN_A", &mut c.db_cov_related_min_a)?;
        override_parsed(&lookup, "DB_COV_RELATED_MIN_B", &mut c.db_cov_related_min_b)?;
        override_parsed(
            &lookup,
            "PHYLOGENY_MAX_HITS_PER_SPECIES",
            &mut c.phylogeny_max_hits_per_species,
        )?;
        override_parsed(&lookup, "DB_COVERAGE_TOI_LIMIT", &mut self.coverage.toi_limit)?;
        override_parsed(&lookup, "GBIF_LIMIT_RECORDS", &mut self.gbif.limit_records)?;

        if let Some(email) = lookup("USER_EMAIL").filter(|v| !v.trim().is_empty()) {
            self.entrez.email = Some(email.trim().to_string());
        }
        if let Some(key) = lookup("NCBI_API_KEY").filter(|v| !v.trim().is_empty()) {
            self.entrez.api_key = Some(key.trim().to_string());
        }
        if let Some(dir) = lookup("TAXONKIT_DATA").filter(|v| !v.trim().is_empty()) {
            self.taxonkit.data_dir = Some(PathBuf::from(dir.trim()));
        }
        Ok(())
    }

    /// Reject threshold combinations that would make candidate sets
    /// inconsistent (strict must be a subset of candidate).
    pub fn validate(&self) -> Result<()> {
        let c = &self.criteria;
        for (name, value) in [
            ("min_q_coverage", c.min_q_coverage),
            ("min_identity", c.min_identity),
            ("min_identity_strict", c.min_identity_strict),
            ("median_identity_warning_factor", c.median_identity_warning_factor),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(Error::Config(format!(
                    "criteria.{} must be within [0, 1], got {}",
                    name, value
                )));
            }
        }
        if c.min_identity_strict < c.min_identity {
            return Err(Error::Config(format!(
                "criteria.min_identity_strict ({}) must be >= min_identity ({})",
                c.min_identity_strict, c.min_identity
            )));
        }
        if c.db_cov_target_min_a < c.db_cov_target_min_b {
            return Err(Error::Config(
                "criteria.db_cov_target_min_a must be >= db_cov_target_min_b".to_string(),
            ));
        }
        if c.db_cov_related_min_a < c.db_cov_related_min_b {
            return Err(Error::Config(
                "criteria.db_cov_related_min_a must be >= db_cov_related_min_b".to_string(),
            ));
        }
        if self.throttle.jitter_min_ms > self.throttle.jitter_max_ms {
            return Err(Error::Config(
                "throttle.jitter_min_ms must be <= jitter_max_ms".to_string(),
            ));
        }
        if self.throttle.max_attempts == 0 {
            return Err(Error::Config("throttle.max_attempts must be >= 1".to_string()));
        }
        if self.entrez.fetch_batch_size == 0 || self.entrez.workers == 0 {
            return Err(Error::Config(
                "entrez.fetch_batch_size and entrez.workers must be >= 1".to_string(),
            ));
        }
        if self.coverage.workers == 0 {
            return Err(Error::Config("coverage.workers must be >= 1".to_string()));
        }
        Ok(())
    }
}

fn override_parsed<F, T>(lookup: &F, name: &str, target: &mut T) -> Result<()>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    if let Some(raw) = lookup(name) {
        *target = raw.trim().parse::<T>().map_err(|e| {
            Error::Config(format!("Environment variable {}={:?}: {}", name, raw, e))
        })?;
        debug!(variable = name, value = %raw.trim(), "Applied environment override");
    }
    Ok(())
}

/// Config file resolution: CLI argument, then environment variable, then
/// the per-user config directory. `None` means use compiled defaults.
pub fn resolve_config_path(cli_arg: Option<&Path>, env_var_name: &str) -> Option<PathBuf> {
    // Priority 1: Command-line argument
    if let Some(path) = cli_arg {
        return Some(path.to_path_buf());
    }

    // Priority 2: Environment variable
    if let Ok(path) = std::env::var(env_var_name) {
        if !path.trim().is_empty() {
            return Some(PathBuf::from(path));
        }
    }

    // Priority 3: user config directory
    dirs::config_dir()
        .map(|d| d.join("bcid").join("config.toml"))
        .filter(|p| p.exists())
}
