//! Identification services
//!
//! Each service is pure with respect to the query directory: it consumes
//! models and client traits and returns results and flags. The `workflow`
//! stage runners own all file I/O.

pub mod candidate_filter;
pub mod coverage;
pub mod phylogeny_sampler;
pub mod source_diversity;
pub mod taxa_of_interest;

pub use candidate_filter::{positive_id_flag, CandidateFilter, CandidateSelection};
pub use coverage::{CoverageAssessor, CoverageFetcher, CoverageOutcome, CoverageTargets};
pub use phylogeny_sampler::{phylogeny_ids, systematic_sample};
pub use source_diversity::{cluster_sources, sources_flag, AggregatedSources, SourceDiversityAssessor};
pub use taxa_of_interest::{detect_taxa_of_interest, match_preliminary_id, PmiMatch, ToiOutcome, ToiRow};
