//! Per-query artifact layout and file formats
//!
//! Each query has its own directory holding the upstream inputs
//! (`hits.json`, `hits.fasta`, `metadata.json`) and every artifact the
//! stages write. The accession taxonomy table lives in the run's output
//! directory and is shared by all queries.

use crate::models::{Hit, HitsFile, QueryMetadata, Taxonomy, TaxonomyRecord, TaxonomyTable};
use crate::services::{PmiMatch, ToiRow};
use bcid_common::{Error, Result};
use needletail::parser::{write_fasta, LineEnding};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashSet;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

pub const HITS_JSON: &str = "hits.json";
pub const HITS_FASTA: &str = "hits.fasta";
pub const METADATA_JSON: &str = "metadata.json";
pub const TAXONOMY_CSV: &str = "taxonomy.csv";
pub const CANDIDATES_JSON: &str = "candidates.json";
pub const CANDIDATES_CSV: &str = "candidates.csv";
pub const CANDIDATES_FASTA: &str = "candidates.fasta";
pub const PHYLOGENY_FASTA: &str = "phylogeny.fasta";
pub const CANDIDATES_COUNT: &str = "candidates_count.txt";
pub const ASSIGNED_TAXONOMY_CSV: &str = "assigned_taxonomy.csv";
pub const PMI_MATCH_CSV: &str = "preliminary_id_match.csv";
pub const TOI_DETECTED_CSV: &str = "taxa_of_concern_detected.csv";
pub const AGGREGATED_SOURCES_JSON: &str = "aggregated_sources.json";
pub const DB_COVERAGE_JSON: &str = "db_coverage.json";
pub const REPORT_CONTEXT_JSON: &str = "report_context.json";

pub const CANDIDATE_CSV_HEADER: [&str; 9] = [
    "species",
    "taxid",
    "accession",
    "hit_subject",
    "identity",
    "query_coverage",
    "alignment_length",
    "e_value",
    "bitscore",
];

pub const CANDIDATE_CSV_HEADER_BOLD: [&str; 7] = [
    "species",
    "hit_id",
    "accession",
    "sequence_description",
    "similarity",
    "bin_uri",
    "url",
];

/// One FASTA record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FastaRecord {
    pub id: String,
    pub seq: Vec<u8>,
}

/// Paths and readers/writers for one query directory
#[derive(Debug, Clone)]
pub struct QueryDir {
    dir: PathBuf,
    output_dir: PathBuf,
}

impl QueryDir {
    /// `output_dir` defaults to the query directory's parent.
    pub fn new(dir: impl Into<PathBuf>, output_dir: Option<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        if !dir.is_dir() {
            return Err(Error::InvalidInput(format!(
                "Query directory does not exist: {}",
                dir.display()
            )));
        }
        let output_dir = output_dir
            .or_else(|| dir.parent().map(Path::to_path_buf))
            .unwrap_or_else(|| dir.clone());
        Ok(Self { dir, output_dir })
    }

    pub fn path(&self) -> &Path {
        &self.dir
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn file(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }

    pub fn exists(&self, name: &str) -> bool {
        self.file(name).is_file()
    }

    pub fn read_json<T: DeserializeOwned>(&self, name: &str) -> Result<T> {
        let path = self.file(name);
        let text = std::fs::read_to_string(&path)
            .map_err(|e| Error::NotFound(format!("Cannot read {}: {}", path.display(), e)))?;
        Ok(serde_json::from_str(&text)?)
    }

    pub fn write_json<T: Serialize + ?Sized>(&self, name: &str, value: &T) -> Result<()> {
        let path = self.file(name);
        std::fs::write(&path, serde_json::to_vec_pretty(value)?)?;
        info!(path = %path.display(), "Written");
        Ok(())
    }

    pub fn read_hits(&self) -> Result<Vec<Hit>> {
        let hits: HitsFile = self.read_json(HITS_JSON)?;
        debug!(hits = hits.hits.len(), "Read hits");
        Ok(hits.hits)
    }

    pub fn read_metadata(&self) -> Result<QueryMetadata> {
        self.read_json(METADATA_JSON)
    }

    /// Accession taxonomy table from the output directory, keyed by
    /// accession without version.
    pub fn read_taxonomy_table(&self) -> Result<TaxonomyTable> {
        let path = self.output_dir.join(TAXONOMY_CSV);
        let file = File::open(&path)
            .map_err(|e| Error::NotFound(format!("Cannot read {}: {}", path.display(), e)))?;
        read_taxonomy_csv(file)
    }

    /// Write the candidate hit table in the BLAST or BOLD layout.
    pub fn write_candidates_csv(&self, hits: &[Hit], bold: bool) -> Result<()> {
        let header: &[&str] = if bold {
            &CANDIDATE_CSV_HEADER_BOLD
        } else {
            &CANDIDATE_CSV_HEADER
        };
        let path = self.file(CANDIDATES_CSV);
        let mut writer = csv::Writer::from_path(&path).map_err(csv_error)?;
        writer.write_record(header).map_err(csv_error)?;
        for hit in hits {
            writer
                .write_record(header.iter().map(|field| hit.field_text(field)))
                .map_err(csv_error)?;
        }
        writer.flush()?;
        info!(path = %path.display(), rows = hits.len(), "Written candidate table");
        Ok(())
    }

    /// Copy the candidate table as the assigned taxonomy.
    pub fn write_assigned_taxonomy(&self) -> Result<()> {
        std::fs::copy(self.file(CANDIDATES_CSV), self.file(ASSIGNED_TAXONOMY_CSV))?;
        info!("Written taxonomic identification to {}", ASSIGNED_TAXONOMY_CSV);
        Ok(())
    }

    pub fn write_candidates_count(&self, count: usize) -> Result<()> {
        std::fs::write(self.file(CANDIDATES_COUNT), count.to_string())?;
        Ok(())
    }

    pub fn read_hits_fasta(&self) -> Result<Vec<FastaRecord>> {
        read_fasta(&self.file(HITS_FASTA))
    }

    /// Write the hit sequences whose ids are in `ids`, in file order.
    pub fn write_fasta_subset<'a>(
        &self,
        name: &str,
        records: &[FastaRecord],
        ids: impl IntoIterator<Item = &'a str>,
    ) -> Result<usize> {
        let wanted: HashSet<&str> = ids.into_iter().collect();
        let selected: Vec<&FastaRecord> = records.iter().filter(|r| wanted.contains(r.id.as_str())).collect();
        write_fasta_records(&self.file(name), &selected)?;
        info!(file = %name, sequences = selected.len(), "Written FASTA");
        Ok(selected.len())
    }

    pub fn write_toi_rows(&self, header: &[&str], rows: &[ToiRow]) -> Result<()> {
        let mut writer = csv::Writer::from_path(self.file(TOI_DETECTED_CSV)).map_err(csv_error)?;
        writer.write_record(header).map_err(csv_error)?;
        for row in rows {
            writer.write_record(row.record()).map_err(csv_error)?;
        }
        writer.flush()?;
        Ok(())
    }

    pub fn write_pmi_match(&self, found: &PmiMatch) -> Result<()> {
        let mut writer = csv::Writer::from_path(self.file(PMI_MATCH_CSV)).map_err(csv_error)?;
        writer.write_record(["rank", "taxon"]).map_err(csv_error)?;
        writer
            .write_record([found.rank.as_str(), found.taxon.as_str()])
            .map_err(csv_error)?;
        writer.flush()?;
        Ok(())
    }
}

fn csv_error(e: csv::Error) -> Error {
    Error::InvalidInput(format!("CSV error: {}", e))
}

/// Parse a taxonomy table with an `accession` column, an optional `taxid`
/// column and one column per rank.
pub fn read_taxonomy_csv(reader: impl std::io::Read) -> Result<TaxonomyTable> {
    let mut csv_reader = csv::Reader::from_reader(reader);
    let headers = csv_reader.headers().map_err(csv_error)?.clone();
    let mut table = TaxonomyTable::new();
    for row in csv_reader.records() {
        let row = row.map_err(csv_error)?;
        let fields: Vec<(&str, &str)> = headers.iter().zip(row.iter()).collect();
        let mut accession = None;
        let mut taxid = None;
        for &(key, value) in &fields {
            match key {
                "accession" => accession = Some(value.split('.').next().unwrap_or_default().to_string()),
                "taxid" if !value.trim().is_empty() => taxid = Some(value.trim().to_string()),
                _ => {}
            }
        }
        let Some(accession) = accession.filter(|a| !a.is_empty()) else {
            continue;
        };
        table.insert(
            accession,
            TaxonomyRecord {
                taxid,
                taxonomy: Taxonomy::from_fields(fields),
            },
        );
    }
    Ok(table)
}

pub fn read_fasta(path: &Path) -> Result<Vec<FastaRecord>> {
    let mut reader = needletail::parse_fastx_file(path)
        .map_err(|e| Error::InvalidInput(format!("Cannot parse FASTA {}: {}", path.display(), e)))?;
    let mut records = Vec::new();
    while let Some(record) = reader.next() {
        let record =
            record.map_err(|e| Error::InvalidInput(format!("Bad FASTA record in {}: {}", path.display(), e)))?;
        // The id is the first word of the header line
        let header = String::from_utf8_lossy(record.id()).into_owned();
        let id = header.split_whitespace().next().unwrap_or_default().to_string();
        records.push(FastaRecord {
            id,
            seq: record.seq().into_owned(),
        });
    }
    Ok(records)
}

pub fn write_fasta_records(path: &Path, records: &[&FastaRecord]) -> Result<()> {
    let mut writer = BufWriter::new(File::create(path)?);
    for record in records {
        write_fasta(record.id.as_bytes(), &record.seq, &mut writer, LineEnding::Unix)
            .map_err(|e| Error::Internal(format!("Cannot write FASTA {}: {}", path.display(), e)))?;
    }
    writer.flush()?;
    Ok(())
}
