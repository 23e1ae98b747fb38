//! End-to-end tests for the networked stages and report context
//!
//! Each test runs assign-taxonomy for real, then drives source-diversity,
//! db-coverage and report-context with in-memory external services.

mod helpers;

use bcid_common::error_log::ErrorRecordsExt;
use bcid_common::ErrorLocation;
use bcid_engine::flags::{Flag, FlagId, FlagValue};
use bcid_engine::models::{Rank, TargetType};
use bcid_engine::workflow::{assign_taxonomy, db_coverage, report_context, source_diversity};
use bcid_engine::StageContext;
use helpers::{blast_hit, metadata, mock_clients, MockCounter, MockPublications, MockRelatives, QueryFixture};
use std::sync::atomic::Ordering;

fn identified_fixture() -> QueryFixture {
    QueryFixture::new(
        vec![
            blast_hit("MN001.1", "Aedes aegypti", 0.99),
            blast_hit("MN006.1", "Aedes aegypti", 0.995),
            blast_hit("MN007.1", "Aedes aegypti", 0.99),
            blast_hit("MN008.1", "Aedes aegypti", 0.99),
            blast_hit("MN002.1", "Aedes aegypti", 0.96),
        ],
        metadata(Some("COI"), Some("Aedes"), &["Culicidae"], Some("AU")),
    )
    .with_taxonomy(&[
        ("MN001", "7159", "Aedes aegypti"),
        ("MN002", "7159", "Aedes aegypti"),
        ("MN006", "7159", "Aedes aegypti"),
        ("MN007", "7159", "Aedes aegypti"),
        ("MN008", "7159", "Aedes aegypti"),
    ])
}

fn publications() -> MockPublications {
    // MN008 is unknown to GenBank
    MockPublications::by_author(&[("MN001", "Smith,J."), ("MN006", "Smith J"), ("MN007", "Jones,K.")])
}

fn counter() -> MockCounter {
    MockCounter::with_counts(&[
        ("Aedes aegypti", 120),
        ("Aedes albopictus", 40),
        ("Aedes vexans", 0),
        ("Aedes", 900),
        ("Culicidae", 20000),
    ])
}

fn relatives() -> MockRelatives {
    MockRelatives::default()
        .species("Aedes aegypti")
        .species("Aedes albopictus")
        .species("Aedes vexans")
        .taxon("Aedes", Rank::Genus)
        .taxon("Culicidae", Rank::Family)
        .in_country("AU", "Aedes aegypti")
        .in_country("AU", "Aedes vexans")
}

fn flags_of(ctx: &StageContext, id: FlagId) -> Vec<Flag> {
    ctx.flags
        .read_all()
        .unwrap()
        .into_iter()
        .filter(|f| f.flag_id == id)
        .collect()
}

fn coverage_value(ctx: &StageContext, id: FlagId, target: &str, target_type: TargetType) -> Option<FlagValue> {
    flags_of(ctx, id)
        .into_iter()
        .find(|f| f.target.as_deref() == Some(target) && f.target_type == Some(target_type))
        .map(|f| f.value)
}

#[tokio::test]
async fn test_source_diversity_clusters_shared_publications() {
    let fixture = identified_fixture();
    let ctx = fixture.context(false);
    assign_taxonomy::run(&ctx).unwrap();

    let publications = publications();
    let calls = publications.calls.clone();
    let clients = mock_clients(publications, counter(), relatives());
    let aggregated = source_diversity::run(&ctx, &clients).await.unwrap();

    // MN001 and MN006 share an author; MN007 stands alone; MN008 has no source
    assert_eq!(aggregated["Aedes aegypti"].len(), 2);
    // Four unique accessions in one batch of ten
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    let candidates = fixture.read_json("candidates.json");
    assert_eq!(candidates["species"][0]["independent_sources"], 2);
    assert!(fixture.path("aggregated_sources.json").exists());

    let sources = flags_of(&ctx, FlagId::Sources);
    assert_eq!(sources.len(), 1);
    assert_eq!(sources[0].target.as_deref(), Some("Aedes aegypti"));
    assert_eq!(sources[0].value, FlagValue::B);

    let errors = ctx.errors.read_all().unwrap();
    let missing = errors.at(ErrorLocation::SourceDiversityAccession);
    assert_eq!(missing.len(), 1);
    assert!(missing[0].message.contains("MN008.1"));
}

#[tokio::test]
async fn test_db_coverage_flags_every_target_type() {
    let fixture = identified_fixture();
    let ctx = fixture.context(false);
    assign_taxonomy::run(&ctx).unwrap();

    let clients = mock_clients(publications(), counter(), relatives());
    let report = db_coverage::run(&ctx, &clients).await.unwrap();

    let candidate = &report.candidate["Aedes aegypti"];
    assert_eq!(candidate.target, Some(120));
    assert_eq!(candidate.related.as_ref().map(|r| r.len()), Some(3));
    assert!(!candidate.higher_taxon);
    assert!(report.toi["Culicidae"].higher_taxon);
    assert!(report.pmi.contains_key("Aedes"));
    assert!(fixture.path("db_coverage.json").exists());

    let candidate = TargetType::Candidate;
    assert_eq!(coverage_value(&ctx, FlagId::DbCoverageTarget, "Aedes aegypti", candidate), Some(FlagValue::A));
    // Two of three congeners have records
    assert_eq!(coverage_value(&ctx, FlagId::DbCoverageRelated, "Aedes aegypti", candidate), Some(FlagValue::B));
    // Aedes vexans is recorded in AU but has no reference sequences
    assert_eq!(coverage_value(&ctx, FlagId::DbCoverageCountry, "Aedes aegypti", candidate), Some(FlagValue::B));

    assert_eq!(coverage_value(&ctx, FlagId::DbCoverageTarget, "Aedes", TargetType::Pmi), Some(FlagValue::A));
    assert_eq!(coverage_value(&ctx, FlagId::DbCoverageTarget, "Culicidae", TargetType::Toi), Some(FlagValue::A));
    assert_eq!(coverage_value(&ctx, FlagId::DbCoverageRelated, "Culicidae", TargetType::Toi), Some(FlagValue::NA));
    assert_eq!(coverage_value(&ctx, FlagId::DbCoverageCountry, "Culicidae", TargetType::Toi), Some(FlagValue::NA));

    assert_eq!(flags_of(&ctx, FlagId::DbCoverageTarget).len(), 3);
    assert!(ctx.errors.read_all().unwrap().is_empty());
}

#[tokio::test]
async fn test_unknown_target_is_flagged_as_error() {
    let fixture = QueryFixture::new(
        vec![blast_hit("MN001.1", "Aedes aegypti", 0.99)],
        metadata(Some("COI"), None, &["Nonexistus"], None),
    )
    .with_taxonomy(&[("MN001", "7159", "Aedes aegypti")]);
    let ctx = fixture.context(false);
    assign_taxonomy::run(&ctx).unwrap();

    let clients = mock_clients(publications(), counter(), relatives());
    let report = db_coverage::run(&ctx, &clients).await.unwrap();
    assert!(report.toi["Nonexistus"].target.is_none());

    let toi = TargetType::Toi;
    assert_eq!(coverage_value(&ctx, FlagId::DbCoverageTarget, "Nonexistus", toi), Some(FlagValue::ERR));
    assert_eq!(coverage_value(&ctx, FlagId::DbCoverageRelated, "Nonexistus", toi), Some(FlagValue::ERR));
    // No country declared for the sample
    assert_eq!(
        coverage_value(&ctx, FlagId::DbCoverageCountry, "Aedes aegypti", TargetType::Candidate),
        Some(FlagValue::NA)
    );

    let errors = ctx.errors.read_all().unwrap();
    let not_found = errors.at(ErrorLocation::NoGbifRecord);
    assert_eq!(not_found.len(), 1);
    assert_eq!(not_found[0].context_str("target"), Some("Nonexistus"));
}

#[tokio::test]
async fn test_failed_related_species_count_is_recorded() {
    let fixture = identified_fixture();
    let ctx = fixture.context(false);
    assign_taxonomy::run(&ctx).unwrap();

    let mut counter = counter();
    counter.failing.insert("Aedes albopictus".to_string());
    let clients = mock_clients(publications(), counter, relatives());
    let report = db_coverage::run(&ctx, &clients).await.unwrap();

    let related = report.candidate["Aedes aegypti"].related.as_ref().unwrap();
    assert_eq!(related.get("Aedes albopictus"), Some(&None));
    assert_eq!(related.get("Aedes aegypti"), Some(&Some(120)));

    let errors = ctx.errors.read_all().unwrap();
    assert!(!errors.at(ErrorLocation::DbCoverageRelated).is_empty());
}

#[tokio::test]
async fn test_exhausted_service_aborts_coverage_and_keeps_partial_report() {
    let fixture = identified_fixture();
    let ctx = fixture.context(false);
    assign_taxonomy::run(&ctx).unwrap();

    let mut counter = counter();
    counter.fatal.insert("Aedes aegypti".to_string());
    let clients = mock_clients(publications(), counter, relatives());

    let result = db_coverage::run(&ctx, &clients).await;
    let error = result.unwrap_err();
    assert!(error.is_fatal());
    assert!(error.to_string().contains("resuming"));

    assert!(fixture.path("db_coverage.json").exists());
    assert!(flags_of(&ctx, FlagId::DbCoverageTarget).is_empty());
    let errors = ctx.errors.read_all().unwrap();
    assert!(!errors.at(ErrorLocation::DbCoverage).is_empty());
}

#[tokio::test]
async fn test_report_context_draws_conclusions() {
    let fixture = identified_fixture();
    let ctx = fixture.context(false);
    assign_taxonomy::run(&ctx).unwrap();

    let clients = mock_clients(publications(), counter(), relatives());
    source_diversity::run(&ctx, &clients).await.unwrap();
    db_coverage::run(&ctx, &clients).await.unwrap();

    let context = report_context::run(&ctx).unwrap();
    assert!(context.locus_provided);
    assert!(context.strict);
    assert!(context.db_coverage.is_some());
    assert!(context.aggregated_sources.is_some());

    let result = &context.conclusions.result;
    assert!(result.confirmed);
    assert_eq!(result.species.as_deref(), Some("Aedes aegypti"));
    // Only two independent sources
    assert_eq!(result.sources_verified, Some(false));
    assert_eq!(result.level_class, "warning");

    assert_eq!(context.conclusions.pmi.status, report_context::PmiStatus::Confirmed);
    let toi = context.conclusions.toi.as_ref().unwrap();
    // Culicidae was detected among the candidates
    assert!(!toi.ruled_out);

    let json = fixture.read_json("report_context.json");
    assert_eq!(json["conclusions"]["result"]["confirmed"], true);
    assert_eq!(json["conclusions"]["pmi"]["status"], "confirmed");
    assert!(json["flags"]["5"]["candidate"]["Aedes aegypti"].is_object());
    assert!(json["flags"]["5"]["toi"]["Culicidae"].is_object());
}

#[tokio::test]
async fn test_report_context_without_optional_artifacts() {
    let fixture = identified_fixture();
    let ctx = fixture.context(false);
    assign_taxonomy::run(&ctx).unwrap();

    let context = report_context::run(&ctx).unwrap();
    assert!(context.aggregated_sources.is_none());
    assert!(context.db_coverage.is_none());
    // No flag 4 written yet, so nothing contradicts the identification
    assert_eq!(context.conclusions.result.sources_verified, Some(true));
}
