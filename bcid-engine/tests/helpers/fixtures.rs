//! Query Directory Fixtures
//!
//! Builds a run directory with one query directory inside it, laid out the
//! way the upstream search and taxonomy steps leave it.

use bcid_common::Config;
use bcid_engine::{QueryDir, StageContext};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use tempfile::TempDir;

pub const QUERY_NAME: &str = "query_001_sample1";

/// Temporary run directory; dropped with the fixture
pub struct QueryFixture {
    pub run_dir: TempDir,
    pub query: PathBuf,
}

impl QueryFixture {
    pub fn new(hits: Vec<Value>, metadata: Value) -> Self {
        let run_dir = TempDir::new().unwrap();
        let query = run_dir.path().join(QUERY_NAME);
        std::fs::create_dir_all(&query).unwrap();

        let fasta: String = hits
            .iter()
            .flat_map(|hit| {
                let id = hit["accession"]
                    .as_str()
                    .filter(|a| !a.is_empty())
                    .or_else(|| hit["hit_id"].as_str())
                    .unwrap();
                let mut ids = vec![id.to_string()];
                // BOLD FASTA is keyed by hit id
                if let Some(hit_id) = hit["hit_id"].as_str() {
                    if hit_id != id {
                        ids.push(hit_id.to_string());
                    }
                }
                ids
            })
            .map(|id| format!(">{} sequence\nACGTACGTACGTACGT\n", id))
            .collect();

        std::fs::write(query.join("hits.json"), json!({ "hits": hits }).to_string()).unwrap();
        std::fs::write(query.join("hits.fasta"), fasta).unwrap();
        std::fs::write(query.join("metadata.json"), metadata.to_string()).unwrap();
        Self { run_dir, query }
    }

    /// Write the run's accession taxonomy table.
    pub fn with_taxonomy(self, rows: &[(&str, &str, &str)]) -> Self {
        let mut csv = String::from("accession,taxid,phylum,class,order,family,genus,species\n");
        for (accession, taxid, species) in rows {
            let genus = species.split_whitespace().next().unwrap_or_default();
            csv.push_str(&format!(
                "{},{},Arthropoda,Insecta,Diptera,Culicidae,{},{}\n",
                accession, taxid, genus, species
            ));
        }
        std::fs::write(self.run_dir.path().join("taxonomy.csv"), csv).unwrap();
        self
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.query.join(name)
    }

    pub fn read_json(&self, name: &str) -> Value {
        serde_json::from_str(&std::fs::read_to_string(self.path(name)).unwrap()).unwrap()
    }

    pub fn read_text(&self, name: &str) -> String {
        std::fs::read_to_string(self.path(name)).unwrap()
    }

    pub fn context(&self, bold: bool) -> StageContext {
        self.context_with(Config::default(), bold)
    }

    pub fn context_with(&self, config: Config, bold: bool) -> StageContext {
        let query = QueryDir::new(&self.query, None).unwrap();
        StageContext::new(config, query, bold).unwrap()
    }
}

/// Metadata for a sample with everything declared
pub fn metadata(locus: Option<&str>, pmi: Option<&str>, toi: &[&str], country_code: Option<&str>) -> Value {
    json!({
        "sample_id": "sample1",
        "locus": locus,
        "preliminary_id": pmi,
        "taxa_of_interest": toi,
        "country_code": country_code,
    })
}

/// A BLAST hit passing the relevance filter
pub fn blast_hit(accession: &str, species: &str, identity: f64) -> Value {
    json!({
        "hit_id": format!("gi|{}", accession),
        "hit_subject": format!("{} cytochrome oxidase subunit I", species),
        "species": species,
        "identity": identity,
        "alignment_length": 650,
        "query_coverage": 0.98,
        "e_value": 0.0,
        "bitscore": 1200.0,
        "accession": accession,
    })
}

/// A BOLD hit; identity comes from `similarity`
pub fn bold_hit(hit_id: &str, accession: &str, species: &str, similarity: f64, collectors: Option<&str>) -> Value {
    json!({
        "hit_id": hit_id,
        "species": species,
        "taxonomy": {
            "phylum": "Arthropoda",
            "class": "Insecta",
            "family": "Culicidae",
            "genus": species.split_whitespace().next().unwrap_or_default(),
            "species": species,
        },
        "similarity": similarity,
        "accession": accession,
        "collectors": collectors,
        "bin_uri": "BOLD:AAA0001",
    })
}

pub fn flag_file(dir: &Path, flag_id: &str) -> Value {
    let text = std::fs::read_to_string(dir.join(format!("{}.flag", flag_id))).unwrap();
    serde_json::from_str(&text).unwrap()
}
