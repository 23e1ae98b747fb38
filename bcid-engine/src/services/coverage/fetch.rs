//! Record-count lookups for one target taxon

use crate::clients::{RecordCounter, RelativesLookup, TaxonQuery, TaxonRecord, TaxonomyLookup};
use crate::models::{CountryCoverage, Locus, Rank, SpeciesCounts};
use bcid_common::{ErrorLocation, ErrorLog, ErrorRecord, Result};
use futures::stream::{self, StreamExt};
use std::collections::HashMap;
use tracing::{debug, error, info};

/// A target taxon with its external identifiers resolved
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedTarget {
    pub name: String,
    pub taxid: Option<String>,
    pub record: TaxonRecord,
}

impl ResolvedTarget {
    pub fn query(&self) -> TaxonQuery<'_> {
        TaxonQuery {
            name: &self.name,
            taxid: self.taxid.as_deref(),
            rank: self.record.rank,
        }
    }
}

/// Counts records for targets and their relatives against one database
pub struct CoverageFetcher<'a> {
    pub counter: &'a dyn RecordCounter,
    pub taxonomy: &'a dyn TaxonomyLookup,
    pub relatives: &'a dyn RelativesLookup,
    pub locus: Option<&'a Locus>,
    pub errors: &'a ErrorLog,
    pub workers: usize,
}

impl<'a> CoverageFetcher<'a> {
    pub async fn target_count(&self, target: &ResolvedTarget) -> Result<u64> {
        info!(
            database = self.counter.database(),
            target = %target.name,
            taxid = ?target.taxid,
            locus = ?self.locus.map(|l| l.name.as_str()),
            "Fetching target record count"
        );
        self.counter.count_records(target.query(), self.locus).await
    }

    /// Record counts for every congeneric species. No relatives gives an
    /// empty map.
    pub async fn related_counts(&self, target: &ResolvedTarget) -> Result<SpeciesCounts> {
        let mut species = self.relatives.relatives(&target.record).await?;
        species.sort();
        species.dedup();
        if species.is_empty() {
            return Ok(SpeciesCounts::new());
        }
        info!(
            database = self.counter.database(),
            target = %target.name,
            related = species.len(),
            "Fetching related species record counts"
        );
        self.species_counts(species, ErrorLocation::DbCoverageRelated, &target.name)
            .await
    }

    /// Record counts for congeneric species observed in `country_code`.
    /// Without a country the result is not applicable.
    pub async fn country_counts(&self, target: &ResolvedTarget, country_code: Option<&str>) -> Result<CountryCoverage> {
        let Some(country_code) = country_code else {
            return Ok(CountryCoverage::not_applicable());
        };
        let species = self
            .relatives
            .relatives_in_country(&target.record, country_code)
            .await?;
        if species.is_empty() {
            return Ok(CountryCoverage::Counts(SpeciesCounts::new()));
        }
        info!(
            database = self.counter.database(),
            target = %target.name,
            country = %country_code,
            related = species.len(),
            "Fetching related species record counts in country"
        );
        let counts = self
            .species_counts(species, ErrorLocation::DbCoverageCountry, &target.name)
            .await?;
        Ok(CountryCoverage::Counts(counts))
    }

    /// Count each species concurrently. A failed species is recorded and
    /// left as `None`; a fatal failure aborts the whole lookup.
    async fn species_counts(&self, species: Vec<String>, location: ErrorLocation, target: &str) -> Result<SpeciesCounts> {
        let taxids = if self.counter.counts_by_taxid() {
            self.taxonomy.taxids(&species).await?
        } else {
            HashMap::new()
        };

        let mut counts = SpeciesCounts::new();
        let mut queries = Vec::with_capacity(species.len());
        for name in &species {
            if !self.counter.counts_by_taxid() {
                queries.push((name.as_str(), None));
                continue;
            }
            match taxids.get(name).cloned().flatten() {
                Some(taxid) => queries.push((name.as_str(), Some(taxid))),
                // Not in the reference taxonomy, so no records
                None => {
                    debug!(species = %name, "No taxid for related species, counting 0");
                    counts.insert(name.clone(), Some(0));
                }
            }
        }

        let mut pending = stream::iter(queries)
            .map(|(name, taxid)| async move {
                let query = TaxonQuery {
                    name,
                    taxid: taxid.as_deref(),
                    rank: Some(Rank::Species),
                };
                (name, self.counter.count_records(query, self.locus).await)
            })
            .buffer_unordered(self.workers.max(1));

        while let Some((name, result)) = pending.next().await {
            match result {
                Ok(count) => {
                    counts.insert(name.to_string(), Some(count));
                }
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    error!(species = %name, target = %target, error = %e, "Species record count failed");
                    self.errors.record(
                        ErrorRecord::new(
                            location,
                            format!(
                                "Error fetching related species records from {} (species: '{}').",
                                self.counter.database(),
                                name
                            ),
                        )
                        .with_exception(&e)
                        .with_context("target", target)
                        .with_context("species", name),
                    );
                    counts.insert(name.to_string(), None);
                }
            }
        }
        Ok(counts)
    }
}
