//! Data model for the identification engine
//!
//! - Hits and lineages produced by the upstream search and taxonomy steps
//! - Candidate species selected from them
//! - Evidence sources used to judge independence of reference records
//! - Coverage results for target taxa
//! - Sample metadata and barcoding loci

pub mod candidate;
pub mod coverage;
pub mod evidence;
pub mod hit;
pub mod locus;
pub mod query;

pub use candidate::{BandCount, CandidateArtifact, CandidateSpecies, HitCounts, IdentityClass};
pub use coverage::{CountryCoverage, CoverageReport, CoverageResult, SpeciesCounts, TargetType};
pub use evidence::{CollectorSource, EvidenceSource, LiteratureSource, Publication};
pub use hit::{Hit, HitsFile, Rank, Taxonomy, TaxonomyRecord, TaxonomyTable};
pub use locus::{Locus, LocusCatalog};
pub use query::QueryMetadata;
