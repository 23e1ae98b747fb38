//! Flag rendering and aggregation
//!
//! Stored flags are regrouped by family (see [`FlagFamily`]) and summary
//! flags are derived from their components by the rules in
//! [`SUMMARY_RULES`].
//!
//! Representative selection for a summary is asymmetric: when any component
//! is level 0 (not applicable) the lowest-level component represents the
//! group; otherwise the highest-level (worst) one does. If the sample had no
//! locus and the representative is below warning level, a synthetic warning
//! flag replaces it, since coverage counts without a locus are not specific
//! to the sequenced region.

use super::catalog::FlagCatalog;
use super::{level_class, Flag, FlagFamily, FlagId, FlagValue};
use crate::models::TargetType;
use bcid_common::Result;
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::warn;

/// Text removed from flag wording when no locus was provided
const LOCUS_PHRASES: [&str; 3] = [" given locus for this", " at the given locus", " for this locus"];

/// A flag with its catalogue level and wording attached
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RenderedFlag {
    pub flag_id: FlagId,
    pub value: FlagValue,
    pub target: Option<String>,
    pub target_type: Option<TargetType>,
    pub level: u8,
    pub outcome: String,
    pub explanation: String,
    #[serde(rename = "bs_class")]
    pub level_class: &'static str,
}

pub type TargetFlags = BTreeMap<String, RenderedFlag>;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FlagEntry {
    Single(RenderedFlag),
    ByTarget(TargetFlags),
    ByTargetType(BTreeMap<TargetType, TargetFlags>),
}

/// All flags of one query, grouped by id
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct FlagSet {
    entries: BTreeMap<FlagId, FlagEntry>,
}

impl FlagSet {
    pub fn get(&self, id: FlagId) -> Option<&FlagEntry> {
        self.entries.get(&id)
    }

    pub fn single(&self, id: FlagId) -> Option<&RenderedFlag> {
        match self.entries.get(&id)? {
            FlagEntry::Single(flag) => Some(flag),
            _ => None,
        }
    }

    pub fn by_target(&self, id: FlagId) -> Option<&TargetFlags> {
        match self.entries.get(&id)? {
            FlagEntry::ByTarget(flags) => Some(flags),
            _ => None,
        }
    }

    pub fn by_target_type(&self, id: FlagId, target_type: TargetType) -> Option<&TargetFlags> {
        match self.entries.get(&id)? {
            FlagEntry::ByTargetType(groups) => groups.get(&target_type),
            _ => None,
        }
    }

    pub fn value_of(&self, id: FlagId) -> Option<FlagValue> {
        self.single(id).map(|f| f.value)
    }
}

/// Derivation of one summary flag from per-target components
struct SummaryRule {
    summary: FlagId,
    components: [FlagId; 3],
    /// Replaces a representative below `no_locus_min_level` when no locus
    no_locus_value: FlagValue,
    no_locus_min_level: u8,
}

const SUMMARY_RULES: [SummaryRule; 1] = [SummaryRule {
    summary: FlagId::DbCoverage,
    components: [
        FlagId::DbCoverageTarget,
        FlagId::DbCoverageRelated,
        FlagId::DbCoverageCountry,
    ],
    no_locus_value: FlagValue::B,
    no_locus_min_level: 2,
}];

pub struct FlagEngine<'c> {
    catalog: &'c FlagCatalog,
    locus_provided: bool,
}

impl<'c> FlagEngine<'c> {
    pub fn new(catalog: &'c FlagCatalog, locus_provided: bool) -> Self {
        Self {
            catalog,
            locus_provided,
        }
    }

    pub fn render(&self, flag: &Flag) -> Result<RenderedFlag> {
        let text = self.catalog.text(flag.flag_id, flag.value)?;
        Ok(RenderedFlag {
            flag_id: flag.flag_id,
            value: flag.value,
            target: flag.target.clone(),
            target_type: flag.target_type,
            level: text.level,
            outcome: self.locus_filtered(&text.outcome),
            explanation: self.locus_filtered(&text.explanation),
            level_class: level_class(text.level),
        })
    }

    fn locus_filtered(&self, text: &str) -> String {
        if self.locus_provided {
            return text.to_string();
        }
        LOCUS_PHRASES
            .iter()
            .fold(text.to_string(), |acc, phrase| acc.replace(phrase, ""))
    }

    /// Group stored flags and compute summary flags.
    pub fn aggregate(&self, flags: &[Flag]) -> Result<FlagSet> {
        let mut entries: BTreeMap<FlagId, FlagEntry> = BTreeMap::new();

        for flag in flags {
            let rendered = self.render(flag)?;
            match flag.flag_id.family() {
                FlagFamily::Single => {
                    entries.insert(flag.flag_id, FlagEntry::Single(rendered));
                }
                FlagFamily::ByTarget => {
                    let Some(target) = flag.target.clone() else {
                        warn!(flag = %flag, "Per-target flag stored without a target, ignoring");
                        continue;
                    };
                    let entry = entries
                        .entry(flag.flag_id)
                        .or_insert_with(|| FlagEntry::ByTarget(TargetFlags::new()));
                    if let FlagEntry::ByTarget(map) = entry {
                        map.insert(target, rendered);
                    }
                }
                FlagFamily::ByTargetType => {
                    let (Some(target), Some(target_type)) = (flag.target.clone(), flag.target_type) else {
                        warn!(flag = %flag, "Coverage flag stored without target or target type, ignoring");
                        continue;
                    };
                    let entry = entries
                        .entry(flag.flag_id)
                        .or_insert_with(|| FlagEntry::ByTargetType(empty_groups()));
                    if let FlagEntry::ByTargetType(groups) = entry {
                        groups.entry(target_type).or_default().insert(target, rendered);
                    }
                }
                FlagFamily::Summary => {
                    warn!(flag = %flag, "Summary flags are derived, ignoring stored record");
                }
            }
        }

        for rule in &SUMMARY_RULES {
            let summary = self.summarize(rule, &entries)?;
            entries.insert(rule.summary, FlagEntry::ByTargetType(summary));
        }

        Ok(FlagSet { entries })
    }

    fn summarize(
        &self,
        rule: &SummaryRule,
        entries: &BTreeMap<FlagId, FlagEntry>,
    ) -> Result<BTreeMap<TargetType, TargetFlags>> {
        let component_groups = |id: FlagId, target_type: TargetType| match entries.get(&id) {
            Some(FlagEntry::ByTargetType(groups)) => groups.get(&target_type),
            _ => None,
        };

        let mut summary = empty_groups();
        for target_type in TargetType::ALL {
            // Targets are those with a first-component flag
            let Some(lead) = component_groups(rule.components[0], target_type) else {
                continue;
            };
            for target in lead.keys() {
                let mut components = Vec::with_capacity(rule.components.len());
                for id in rule.components {
                    let found = component_groups(id, target_type).and_then(|g| g.get(target));
                    match found {
                        Some(flag) => components.push(flag.clone()),
                        None => {
                            warn!(
                                flag_id = %id,
                                target = %target,
                                target_type = %target_type,
                                "Missing coverage component flag, treating as error"
                            );
                            components.push(self.render(&Flag::for_typed_target(
                                id,
                                FlagValue::ERR,
                                target,
                                target_type,
                            ))?);
                        }
                    }
                }

                let mut representative = select_representative(&components).clone();
                if representative.level < rule.no_locus_min_level && !self.locus_provided {
                    representative = self.render(&Flag::for_typed_target(
                        rule.summary,
                        rule.no_locus_value,
                        target,
                        target_type,
                    ))?;
                }
                if let Some(group) = summary.get_mut(&target_type) {
                    group.insert(target.clone(), representative);
                }
            }
        }
        Ok(summary)
    }
}

fn empty_groups() -> BTreeMap<TargetType, TargetFlags> {
    TargetType::ALL
        .into_iter()
        .map(|tt| (tt, TargetFlags::new()))
        .collect()
}

/// First lowest-level flag if any is level 0, else first highest-level flag.
///
/// Panics on an empty slice; summary rules always supply components.
pub(crate) fn select_representative(flags: &[RenderedFlag]) -> &RenderedFlag {
    let pick_lowest = flags.iter().any(|f| f.level == 0);
    let mut best = &flags[0];
    for flag in &flags[1..] {
        let better = if pick_lowest {
            flag.level < best.level
        } else {
            flag.level > best.level
        };
        if better {
            best = flag;
        }
    }
    best
}
