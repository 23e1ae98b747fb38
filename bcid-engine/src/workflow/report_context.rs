//! `report-context` stage: aggregated flags and conclusions for reporting
//!
//! Collects everything the external report renderer needs into
//! `report_context.json`. Sources and coverage are optional since their
//! stages may have been skipped or failed.

use super::query_dir::{AGGREGATED_SOURCES_JSON, CANDIDATES_JSON, DB_COVERAGE_JSON, REPORT_CONTEXT_JSON};
use super::StageContext;
use crate::flags::{FlagEngine, FlagId, FlagSet, FlagValue, RenderedFlag, TargetFlags};
use crate::models::{CandidateArtifact, CoverageReport, QueryMetadata, TargetType};
use crate::services::AggregatedSources;
use bcid_common::{Error, ErrorRecord, Result};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{info, warn};

/// Taxonomic identification outcome
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaxonomicResult {
    pub confirmed: bool,
    pub species: Option<String>,
    pub level: u8,
    #[serde(rename = "bs_class")]
    pub level_class: &'static str,
    /// Every candidate species has enough independent sources
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sources_verified: Option<bool>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PmiStatus {
    Confirmed,
    Rejected,
    /// No conclusive identification to compare against
    NotApplicable,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PmiResult {
    pub status: PmiStatus,
    pub explanation: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToiResult {
    pub ruled_out: bool,
    /// Flag 2 followed by the worst TOI 5.1 and 5.2 flags, when assessed
    pub criteria: Vec<RenderedFlag>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Conclusions {
    pub result: TaxonomicResult,
    pub pmi: PmiResult,
    /// Absent when no taxa of interest were declared
    pub toi: Option<ToiResult>,
}

/// Contents of `report_context.json`
#[derive(Debug, Clone, Serialize)]
pub struct ReportContext {
    pub metadata: QueryMetadata,
    pub bold: bool,
    pub locus_provided: bool,
    pub generated_at: DateTime<Utc>,
    pub conclusions: Conclusions,
    pub flags: FlagSet,
    pub candidates: CandidateArtifact,
    /// Selection used the strict identity threshold
    pub strict: bool,
    pub aggregated_sources: Option<AggregatedSources>,
    pub db_coverage: Option<CoverageReport>,
    pub errors: Vec<ErrorRecord>,
}

pub fn run(ctx: &StageContext) -> Result<ReportContext> {
    let metadata = ctx.query.read_metadata()?;
    let locus_provided = ctx.locus(&metadata)?.is_some();
    let candidates: CandidateArtifact = ctx.query.read_json(CANDIDATES_JSON)?;

    let stored = ctx.flags.read_all()?;
    let flags = FlagEngine::new(&ctx.catalog, locus_provided).aggregate(&stored)?;
    let conclusions = draw_conclusions(&flags, &candidates)?;
    let strict = !matches!(
        flags.value_of(FlagId::PositiveId),
        Some(FlagValue::D) | Some(FlagValue::E)
    );

    let context = ReportContext {
        bold: ctx.bold,
        locus_provided,
        generated_at: Utc::now(),
        conclusions,
        flags,
        strict,
        aggregated_sources: read_optional(ctx, AGGREGATED_SOURCES_JSON)?,
        db_coverage: read_optional(ctx, DB_COVERAGE_JSON)?,
        errors: ctx.errors.read_all()?,
        candidates,
        metadata,
    };
    ctx.query.write_json(REPORT_CONTEXT_JSON, &context)?;
    info!(
        sample_id = %context.metadata.sample_id,
        confirmed = context.conclusions.result.confirmed,
        errors = context.errors.len(),
        "Report context written"
    );
    Ok(context)
}

fn read_optional<T: DeserializeOwned>(ctx: &StageContext, name: &str) -> Result<Option<T>> {
    if !ctx.query.exists(name) {
        warn!(file = %name, "Artifact not found, omitted from report context");
        return Ok(None);
    }
    ctx.query.read_json(name).map(Some)
}

pub fn draw_conclusions(flags: &FlagSet, candidates: &CandidateArtifact) -> Result<Conclusions> {
    let positive_id = flags
        .single(FlagId::PositiveId)
        .ok_or_else(|| Error::NotFound(format!("Flag {} has not been written", FlagId::PositiveId)))?;
    Ok(Conclusions {
        result: taxonomic_result(positive_id, flags, candidates),
        pmi: pmi_result(positive_id, flags),
        toi: toi_result(flags),
    })
}

fn taxonomic_result(positive_id: &RenderedFlag, flags: &FlagSet, candidates: &CandidateArtifact) -> TaxonomicResult {
    if positive_id.value != FlagValue::A {
        return TaxonomicResult {
            confirmed: false,
            species: None,
            level: positive_id.level,
            level_class: positive_id.level_class,
            sources_verified: None,
        };
    }
    let sources_verified = flags
        .by_target(FlagId::Sources)
        .map_or(true, |sources| sources.values().all(|f| f.level == 1));
    let (level, level_class) = if sources_verified {
        (1, "success")
    } else {
        (2, "warning")
    };
    TaxonomicResult {
        confirmed: true,
        species: candidates.species.first().map(|s| s.species.clone()),
        level,
        level_class,
        sources_verified: Some(sources_verified),
    }
}

fn pmi_result(positive_id: &RenderedFlag, flags: &FlagSet) -> PmiResult {
    if positive_id.value != FlagValue::A {
        return PmiResult {
            status: PmiStatus::NotApplicable,
            explanation: format!(
                "Inconclusive taxonomic identity (Flag {}{}): the preliminary ID cannot be confirmed or rejected",
                positive_id.flag_id, positive_id.value
            ),
        };
    }
    match flags.single(FlagId::PreliminaryId) {
        Some(flag) if flag.value == FlagValue::A => PmiResult {
            status: PmiStatus::Confirmed,
            explanation: format!("Flag {}: {}", flag_code(flag), flag.explanation),
        },
        Some(flag) if flag.value == FlagValue::NA => PmiResult {
            status: PmiStatus::NotApplicable,
            explanation: format!("Flag {}: {}", flag_code(flag), flag.explanation),
        },
        Some(flag) => PmiResult {
            status: PmiStatus::Rejected,
            explanation: format!("Flag {}: {}", flag_code(flag), flag.explanation),
        },
        None => PmiResult {
            status: PmiStatus::NotApplicable,
            explanation: "No preliminary ID flag was recorded".to_string(),
        },
    }
}

fn toi_result(flags: &FlagSet) -> Option<ToiResult> {
    let toi = flags.single(FlagId::TaxaOfInterest)?;
    if toi.value == FlagValue::NA {
        return None;
    }
    let mut ruled_out = toi.value == FlagValue::B;
    let mut criteria = vec![toi.clone()];

    for id in [FlagId::DbCoverageTarget, FlagId::DbCoverageRelated] {
        if let Some(worst) = flags.by_target_type(id, TargetType::Toi).and_then(worst_flag) {
            ruled_out = ruled_out && worst.value == FlagValue::A;
            criteria.push(worst.clone());
        }
    }
    Some(ToiResult { ruled_out, criteria })
}

/// Highest-level flag of a group; not-applicable flags rank lowest.
fn worst_flag(group: &TargetFlags) -> Option<&RenderedFlag> {
    group.values().max_by_key(|f| f.level)
}

fn flag_code(flag: &RenderedFlag) -> String {
    format!("{}{}", flag.flag_id, flag.value)
}
