//! Local taxonkit installation: taxon name -> NCBI taxid

use super::TaxonomyLookup;
use async_trait::async_trait;
use bcid_common::config::TaxonkitSettings;
use bcid_common::{Error, Result};
use std::collections::HashMap;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

pub struct Taxonkit {
    settings: TaxonkitSettings,
}

impl Taxonkit {
    pub fn new(settings: &TaxonkitSettings) -> Self {
        Self {
            settings: settings.clone(),
        }
    }

    async fn run(&self, input: String) -> Result<String> {
        let mut command = Command::new(&self.settings.binary);
        command.arg("name2taxid");
        if let Some(dir) = &self.settings.data_dir {
            command.arg("--data-dir").arg(dir);
        }
        let mut child = command
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(input.as_bytes()).await?;
            // Dropping stdin closes the pipe so taxonkit sees EOF
        }
        let output = child.wait_with_output().await?;

        let stderr = String::from_utf8_lossy(&output.stderr);
        if !output.status.success() {
            return Err(Error::Internal(format!(
                "taxonkit name2taxid failed ({}): {}",
                output.status,
                stderr.trim()
            )));
        }
        if !stderr.trim().is_empty() {
            warn!(stderr = %stderr.trim(), "taxonkit name2taxid reported warnings");
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// Parse `name<TAB>taxid` lines. Names without a taxid map to `None`; for
/// ambiguous names the first taxid is kept.
pub fn parse_name2taxid(stdout: &str, names: &[String]) -> HashMap<String, Option<String>> {
    let mut taxids: HashMap<String, Option<String>> = names.iter().map(|n| (n.clone(), None)).collect();
    for line in stdout.lines() {
        let mut fields = line.split('\t');
        let (Some(name), Some(taxid)) = (fields.next(), fields.next()) else {
            continue;
        };
        let taxid = taxid.trim();
        if taxid.is_empty() {
            continue;
        }
        if let Some(slot) = taxids.get_mut(name.trim()) {
            slot.get_or_insert_with(|| taxid.to_string());
        }
    }
    taxids
}

#[async_trait]
impl TaxonomyLookup for Taxonkit {
    async fn taxids(&self, names: &[String]) -> Result<HashMap<String, Option<String>>> {
        if names.is_empty() {
            return Ok(HashMap::new());
        }
        debug!(count = names.len(), "Resolving taxids with taxonkit");
        let stdout = self.run(names.join("\n") + "\n").await?;
        Ok(parse_name2taxid(&stdout, names))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_name2taxid() {
        let names = vec![
            "Homo sapiens".to_string(),
            "Culex pipiens".to_string(),
            "Nonexistent thing".to_string(),
        ];
        let stdout = "Homo sapiens\t9606\nCulex pipiens\t7175\nCulex pipiens\t999\nNonexistent thing\t\n";
        let taxids = parse_name2taxid(stdout, &names);
        assert_eq!(taxids["Homo sapiens"].as_deref(), Some("9606"));
        assert_eq!(taxids["Culex pipiens"].as_deref(), Some("7175"));
        assert_eq!(taxids["Nonexistent thing"], None);
        assert_eq!(taxids.len(), 3);
    }
}
