//! `db-coverage` stage: reference-database coverage of target taxa (flags 5.1-5.3)

use super::query_dir::{CANDIDATES_JSON, DB_COVERAGE_JSON};
use super::{Clients, StageContext};
use crate::models::{CandidateArtifact, CoverageReport};
use crate::services::coverage::coverage_flags;
use crate::services::{CoverageAssessor, CoverageFetcher, CoverageTargets};
use bcid_common::Result;
use tracing::{info, warn};

/// Run the coverage assessment and write `db_coverage.json`.
///
/// A fatal lookup failure still writes the partial report before the
/// error is returned; flags are only written for a completed run.
pub async fn run(ctx: &StageContext, clients: &Clients) -> Result<CoverageReport> {
    let metadata = ctx.query.read_metadata()?;
    let artifact: CandidateArtifact = ctx.query.read_json(CANDIDATES_JSON)?;
    let locus = ctx.locus(&metadata)?;
    let settings = &ctx.config.coverage;

    let targets = CoverageTargets::collect(&artifact.species_names(), &metadata, settings, &ctx.errors);
    let fetcher = CoverageFetcher {
        counter: clients.counter.as_ref(),
        taxonomy: clients.taxonomy.as_ref(),
        relatives: clients.relatives.as_ref(),
        locus: locus.as_ref(),
        errors: &ctx.errors,
        workers: settings.workers,
    };
    let country_code = metadata.country_code();
    let outcome = CoverageAssessor::new(fetcher, &ctx.errors, settings.workers)
        .assess(&targets, country_code.as_deref())
        .await;

    ctx.query.write_json(DB_COVERAGE_JSON, &outcome.report)?;
    if let Some(e) = outcome.fatal {
        return Err(e);
    }
    if outcome.error_detected {
        warn!("Errors were encountered during database coverage assessment; see the error log");
    }

    for flag in coverage_flags(&outcome.report, &ctx.config.criteria) {
        ctx.flags.write(flag)?;
    }
    info!(
        candidates = outcome.report.candidate.len(),
        pmi = outcome.report.pmi.len(),
        toi = outcome.report.toi.len(),
        "Database coverage assessed"
    );
    Ok(outcome.report)
}
