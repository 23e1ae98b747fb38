//! Concurrent coverage assessment over all target taxa

use super::fetch::{CoverageFetcher, ResolvedTarget};
use super::targets::CoverageTargets;
use crate::models::{CountryCoverage, CoverageReport, CoverageResult, SpeciesCounts, TargetType};
use bcid_common::{Error, ErrorLocation, ErrorLog, ErrorRecord, Result};
use futures::stream::{self, StreamExt};
use std::collections::HashMap;
use std::fmt;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Operation {
    Target,
    Related,
    Country,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Operation::Target => "target",
            Operation::Related => "related",
            Operation::Country => "country",
        })
    }
}

enum TaskOutput {
    Target(u64),
    Related(SpeciesCounts),
    Country(CountryCoverage),
}

/// Result of one coverage run. With `fatal` set, `report` holds only the
/// work completed before the run was aborted.
#[derive(Debug)]
pub struct CoverageOutcome {
    pub report: CoverageReport,
    /// Some lookup failed without aborting the run
    pub error_detected: bool,
    pub fatal: Option<Error>,
}

pub struct CoverageAssessor<'a> {
    fetcher: CoverageFetcher<'a>,
    errors: &'a ErrorLog,
    workers: usize,
}

/// Resolution state accumulated before counting starts
#[derive(Default)]
struct Resolution {
    resolved: Vec<ResolvedTarget>,
    unknown: Vec<String>,
}

impl<'a> CoverageAssessor<'a> {
    pub fn new(fetcher: CoverageFetcher<'a>, errors: &'a ErrorLog, workers: usize) -> Self {
        Self {
            fetcher,
            errors,
            workers: workers.max(1),
        }
    }

    pub async fn assess(&self, targets: &CoverageTargets, country_code: Option<&str>) -> CoverageOutcome {
        let taxa = targets.all();
        if taxa.is_empty() {
            info!("No target taxa for database coverage assessment");
            return CoverageOutcome {
                report: CoverageReport::default(),
                error_detected: false,
                fatal: None,
            };
        }
        info!(
            targets = taxa.len(),
            locus = ?self.fetcher.locus.map(|l| l.name.as_str()),
            country = ?country_code,
            "Assessing database coverage"
        );

        let mut resolution = Resolution::default();
        let mut results: HashMap<String, CoverageResult> = HashMap::new();
        let fatal = match self.resolve_all(targets, &taxa, &mut resolution).await {
            Ok(()) => {
                for target in &resolution.resolved {
                    results.insert(
                        target.name.clone(),
                        CoverageResult {
                            higher_taxon: target.record.is_higher_taxon(),
                            rank: target.record.rank.map(|r| r.to_string()),
                            ..CoverageResult::default()
                        },
                    );
                }
                self.run_tasks(targets, &resolution.resolved, country_code, &mut results)
                    .await
                    .err()
            }
            Err(e) => Some(e),
        };

        for taxon in &resolution.unknown {
            results.insert(taxon.clone(), CoverageResult::unknown());
        }

        if let Some(e) = &fatal {
            error!(error = %e, "Database coverage aborted");
            self.errors.record(
                ErrorRecord::new(
                    ErrorLocation::DbCoverage,
                    "Database coverage assessment was aborted. Results for completed targets were kept.",
                )
                .with_exception(e),
            );
        }

        let mut report = CoverageReport::default();
        for taxon in &taxa {
            let Some(result) = results.get(taxon) else {
                continue;
            };
            for target_type in targets.types_of(taxon) {
                report.targets_mut(target_type).insert(taxon.clone(), result.clone());
            }
        }
        let error_detected = results.values().any(CoverageResult::has_errors);
        CoverageOutcome {
            report,
            error_detected,
            fatal,
        }
    }

    fn record_target_error(&self, location: ErrorLocation, message: String, targets: &CoverageTargets, taxon: &str) {
        let types: Vec<&str> = targets.types_of(taxon).iter().map(TargetType::as_str).collect();
        warn!(target = %taxon, "{}", message);
        self.errors.record(
            ErrorRecord::new(location, message)
                .with_context("target", taxon)
                .with_context("target_type", types.join(",")),
        );
    }

    /// Look up taxids and taxon records for every target. Targets without a
    /// record become unknown; only fatal errors are returned.
    async fn resolve_all(&self, targets: &CoverageTargets, taxa: &[String], resolution: &mut Resolution) -> Result<()> {
        let taxids = if self.fetcher.counter.counts_by_taxid() {
            self.taxids(targets, taxa).await?
        } else {
            HashMap::new()
        };

        let mut pending = stream::iter(taxa)
            .map(|taxon| async move { (taxon, self.fetcher.relatives.resolve(taxon).await) })
            .buffer_unordered(self.workers);

        let mut records = HashMap::new();
        while let Some((taxon, result)) = pending.next().await {
            match result {
                Ok(record) => {
                    records.insert(taxon.clone(), record);
                }
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    let location = if e.is_not_found() {
                        ErrorLocation::NoGbifRecord
                    } else {
                        ErrorLocation::DbCoverage
                    };
                    self.record_target_error(
                        location,
                        format!(
                            "No taxon record found for target taxon '{}'. This target could not be evaluated. ({})",
                            taxon, e
                        ),
                        targets,
                        taxon,
                    );
                }
            }
        }

        // Keep target order stable for logs and task submission
        for taxon in taxa {
            match records.remove(taxon) {
                Some(record) => resolution.resolved.push(ResolvedTarget {
                    name: taxon.clone(),
                    taxid: taxids.get(taxon).cloned().flatten(),
                    record,
                }),
                None => resolution.unknown.push(taxon.clone()),
            }
        }
        debug!(
            resolved = resolution.resolved.len(),
            unknown = resolution.unknown.len(),
            "Target taxa resolved"
        );
        Ok(())
    }

    async fn taxids(&self, targets: &CoverageTargets, taxa: &[String]) -> Result<HashMap<String, Option<String>>> {
        let taxids = match self.fetcher.taxonomy.taxids(taxa).await {
            Ok(taxids) => taxids,
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                warn!(error = %e, "Taxid lookup failed for all targets");
                HashMap::new()
            }
        };
        for taxon in taxa {
            if taxids.get(taxon).cloned().flatten().is_none() {
                self.record_target_error(
                    ErrorLocation::Taxonkit,
                    format!(
                        "No taxid found for target taxon '{}'. It is likely not represented in the reference \
                         database; records are counted by name instead.",
                        taxon
                    ),
                    targets,
                    taxon,
                );
            }
        }
        Ok(taxids)
    }

    /// Run target, related and country lookups concurrently. Per-task
    /// failures leave a `None` slot; a fatal failure stops submission.
    async fn run_tasks(
        &self,
        targets: &CoverageTargets,
        resolved: &[ResolvedTarget],
        country_code: Option<&str>,
        results: &mut HashMap<String, CoverageResult>,
    ) -> Result<()> {
        let mut tasks: Vec<(Operation, &ResolvedTarget)> = Vec::new();
        for target in resolved {
            tasks.push((Operation::Target, target));
            if !target.record.is_higher_taxon() {
                tasks.push((Operation::Related, target));
                tasks.push((Operation::Country, target));
            }
        }
        debug!(tasks = tasks.len(), "Submitting coverage tasks");

        let mut pending = stream::iter(tasks)
            .map(|(operation, target)| async move {
                let output = match operation {
                    Operation::Target => self.fetcher.target_count(target).await.map(TaskOutput::Target),
                    Operation::Related => self.fetcher.related_counts(target).await.map(TaskOutput::Related),
                    Operation::Country => self
                        .fetcher
                        .country_counts(target, country_code)
                        .await
                        .map(TaskOutput::Country),
                };
                (operation, target, output)
            })
            .buffer_unordered(self.workers);

        while let Some((operation, target, output)) = pending.next().await {
            let Some(slot) = results.get_mut(&target.name) else {
                continue;
            };
            match output {
                Ok(TaskOutput::Target(count)) => slot.target = Some(count),
                Ok(TaskOutput::Related(counts)) => slot.related = Some(counts),
                Ok(TaskOutput::Country(country)) => slot.country = Some(country),
                Err(e) => {
                    let types: Vec<&str> = targets.types_of(&target.name).iter().map(TargetType::as_str).collect();
                    let message = format!(
                        "Error processing {} coverage for target taxon '{}' ({}). This target could not be evaluated.",
                        operation,
                        target.name,
                        types.join(", ")
                    );
                    error!(target = %target.name, operation = %operation, error = %e, "Coverage task failed");
                    self.errors.record(
                        ErrorRecord::new(ErrorLocation::DbCoverage, message)
                            .with_exception(&e)
                            .with_context("target", target.name.as_str())
                            .with_context("target_type", types.join(","))
                            .with_context("operation", operation.to_string()),
                    );
                    if e.is_fatal() {
                        return Err(e);
                    }
                }
            }
        }
        info!(targets = resolved.len(), "Coverage tasks complete");
        Ok(())
    }
}
