//! `source-diversity` stage: independent sources per candidate species (flag 4)

use super::query_dir::{AGGREGATED_SOURCES_JSON, CANDIDATES_JSON};
use super::{Clients, StageContext};
use crate::flags::{Flag, FlagId};
use crate::models::CandidateArtifact;
use crate::services::{sources_flag, AggregatedSources, SourceDiversityAssessor};
use bcid_common::Result;
use tracing::info;

pub async fn run(ctx: &StageContext, clients: &Clients) -> Result<AggregatedSources> {
    let mut artifact: CandidateArtifact = ctx.query.read_json(CANDIDATES_JSON)?;
    if artifact.species.is_empty() {
        info!("No candidate species, skipping source diversity");
    }

    let assessor = SourceDiversityAssessor::new(clients.publications.as_ref(), &ctx.config.entrez, &ctx.errors);
    let aggregated = assessor.assess(&mut artifact).await?;

    ctx.query.write_json(AGGREGATED_SOURCES_JSON, &aggregated)?;
    ctx.query.write_json(CANDIDATES_JSON, &artifact)?;

    let min_count = ctx.config.criteria.sources_min_count;
    for species in &artifact.species {
        let independent = species.independent_sources.unwrap_or_default();
        let value = sources_flag(independent, min_count);
        info!(species = %species.species, independent, flag = %value, "Source diversity flag");
        ctx.flags.write(Flag::for_target(FlagId::Sources, value, &species.species))?;
    }
    Ok(aggregated)
}
