//! Pipeline stage runners
//!
//! Each stage reads the artifacts of earlier stages from a query directory,
//! runs one service and writes its own artifacts and flags back:
//!
//! 1. `assign-taxonomy`: candidate selection, flags 1, 2 and 7
//! 2. `source-diversity`: independent sources per species, flag 4
//! 3. `db-coverage`: reference-database coverage, flags 5.1-5.3
//! 4. `report-context`: aggregated flags and conclusions for reporting
//!
//! Stages are idempotent; rerunning one overwrites its artifacts and flags.

pub mod assign_taxonomy;
pub mod db_coverage;
pub mod query_dir;
pub mod report_context;
pub mod source_diversity;

pub use query_dir::QueryDir;

use crate::clients::{PublicationSource, RecordCounter, RelativesLookup, TaxonomyLookup};
use crate::flags::{FlagCatalog, FlagStore};
use crate::models::{Locus, LocusCatalog, QueryMetadata};
use bcid_common::{Config, ErrorLog, Result};
use std::fmt;
use std::str::FromStr;

/// A pipeline stage the binary can run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    AssignTaxonomy,
    SourceDiversity,
    DbCoverage,
    ReportContext,
}

impl Stage {
    pub const ALL: [Stage; 4] = [
        Stage::AssignTaxonomy,
        Stage::SourceDiversity,
        Stage::DbCoverage,
        Stage::ReportContext,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::AssignTaxonomy => "assign-taxonomy",
            Stage::SourceDiversity => "source-diversity",
            Stage::DbCoverage => "db-coverage",
            Stage::ReportContext => "report-context",
        }
    }

    /// Whether the stage calls external services
    pub fn needs_clients(&self) -> bool {
        matches!(self, Stage::SourceDiversity | Stage::DbCoverage)
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Stage {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Stage::ALL
            .into_iter()
            .find(|stage| stage.as_str() == s)
            .ok_or_else(|| format!("unknown stage '{}'", s))
    }
}

/// External collaborators used by the networked stages
pub struct Clients {
    pub publications: Box<dyn PublicationSource>,
    pub counter: Box<dyn RecordCounter>,
    pub taxonomy: Box<dyn TaxonomyLookup>,
    pub relatives: Box<dyn RelativesLookup>,
}

/// Everything a stage needs for one query
pub struct StageContext {
    pub config: Config,
    pub query: QueryDir,
    pub errors: ErrorLog,
    pub flags: FlagStore,
    pub loci: LocusCatalog,
    pub catalog: FlagCatalog,
    /// Hits come from BOLD rather than BLAST
    pub bold: bool,
}

impl StageContext {
    pub fn new(config: Config, query: QueryDir, bold: bool) -> Result<Self> {
        Ok(Self {
            errors: ErrorLog::for_dir(query.path()),
            flags: FlagStore::new(query.path()),
            loci: LocusCatalog::builtin()?,
            catalog: FlagCatalog::builtin()?,
            config,
            query,
            bold,
        })
    }

    /// The locus records are counted at. BOLD results are always COI.
    pub fn locus(&self, metadata: &QueryMetadata) -> Result<Option<Locus>> {
        if self.bold {
            return self.loci.bold_locus().map(Some);
        }
        self.loci.resolve(metadata.locus.as_deref())
    }
}
