//! `assign-taxonomy` stage: candidate selection and identity flags

use super::query_dir::{CANDIDATES_FASTA, CANDIDATES_JSON, PHYLOGENY_FASTA};
use super::StageContext;
use crate::flags::{Flag, FlagId};
use crate::models::Hit;
use crate::services::taxa_of_interest::TOI_DETECTED_HEADER;
use crate::services::{
    detect_taxa_of_interest, match_preliminary_id, phylogeny_ids, CandidateFilter, CandidateSelection,
};
use bcid_common::Result;
use tracing::{info, warn};

pub fn run(ctx: &StageContext) -> Result<CandidateSelection> {
    let metadata = ctx.query.read_metadata()?;
    let criteria = &ctx.config.criteria;
    let filter = CandidateFilter::new(criteria, ctx.bold);

    let mut relevant = filter.relevant_hits(ctx.query.read_hits()?);
    if !ctx.bold {
        attach_taxonomy(ctx, &mut relevant)?;
    }
    let selection = filter.select(relevant);

    ctx.flags.write(Flag::new(FlagId::PositiveId, selection.positive_id()))?;
    write_candidates(ctx, &selection)?;

    let identified = selection.identified_species();
    match identified {
        Some(species) => {
            ctx.query.write_assigned_taxonomy()?;
            info!(species = %species.species, "Taxonomic identification made");
        }
        None => info!(
            strict_species = selection.strict_species,
            "No taxonomic identification could be made"
        ),
    }

    let (pmi_flag, pmi_match) = match_preliminary_id(metadata.preliminary_id(), identified);
    ctx.flags.write(Flag::new(FlagId::PreliminaryId, pmi_flag))?;
    if let Some(found) = &pmi_match {
        ctx.query.write_pmi_match(found)?;
    }

    let toi = detect_taxa_of_interest(&metadata.taxa_of_interest, &selection.artifact.species);
    ctx.flags.write(Flag::new(FlagId::TaxaOfInterest, toi.flag))?;
    if !toi.rows.is_empty() {
        ctx.query.write_toi_rows(&TOI_DETECTED_HEADER, &toi.rows)?;
    }

    Ok(selection)
}

/// Attach lineage from the accession taxonomy table to each relevant hit.
fn attach_taxonomy(ctx: &StageContext, hits: &mut [Hit]) -> Result<()> {
    let table = ctx.query.read_taxonomy_table()?;
    for hit in hits.iter_mut() {
        let record = table.get(hit.accession_base());
        if record.is_none() {
            warn!(
                accession = %hit.accession,
                "No taxonomy record for accession, hit cannot be a candidate species"
            );
        }
        hit.attach_taxonomy(record);
    }
    Ok(())
}

fn write_candidates(ctx: &StageContext, selection: &CandidateSelection) -> Result<()> {
    let artifact = &selection.artifact;
    ctx.query.write_json(CANDIDATES_JSON, artifact)?;
    ctx.query.write_candidates_csv(&artifact.hits, ctx.bold)?;
    ctx.query.write_candidates_count(artifact.species.len())?;

    let bold = ctx.bold;
    let records = ctx.query.read_hits_fasta()?;
    ctx.query.write_fasta_subset(
        CANDIDATES_FASTA,
        &records,
        artifact.hits.iter().map(|hit| fasta_id(hit, bold)),
    )?;

    let max_per_species = ctx.config.criteria.phylogeny_max_hits_per_species;
    let phylogeny = phylogeny_ids(&artifact.hits, max_per_species, |hit| fasta_id(hit, bold));
    ctx.query.write_fasta_subset(PHYLOGENY_FASTA, &records, phylogeny)?;
    Ok(())
}

/// Sequence id of a hit in `hits.fasta`
fn fasta_id(hit: &Hit, bold: bool) -> &str {
    if bold {
        &hit.hit_id
    } else {
        &hit.accession
    }
}
