//! File loaders feeding the CLI: pending work items from CSV, channel rules from JSON.

use std::collections::HashSet;
use std::io::Read;
use std::path::Path;

use serde::{Deserialize, Deserializer};

use super::domain::{ChannelRule, ItemId, WorkItem};

#[derive(Debug)]
pub enum ImportError {
    Io(std::io::Error),
    Csv(csv::Error),
    Json(serde_json::Error),
}

impl std::fmt::Display for ImportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ImportError::Io(err) => write!(f, "failed to read input file: {}", err),
            ImportError::Csv(err) => write!(f, "invalid work item CSV data: {}", err),
            ImportError::Json(err) => write!(f, "invalid channel rule JSON: {}", err),
        }
    }
}

impl std::error::Error for ImportError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ImportError::Io(err) => Some(err),
            ImportError::Csv(err) => Some(err),
            ImportError::Json(err) => Some(err),
        }
    }
}

impl From<std::io::Error> for ImportError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err)
    }
}

impl From<csv::Error> for ImportError {
    fn from(err: csv::Error) -> Self {
        Self::Csv(err)
    }
}

impl From<serde_json::Error> for ImportError {
    fn from(err: serde_json::Error) -> Self {
        Self::Json(err)
    }
}

pub struct WorkItemImporter;

impl WorkItemImporter {
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Vec<WorkItem>, ImportError> {
        let file = std::fs::File::open(path)?;
        Self::from_reader(file)
    }

    /// Parse `id,nationality,position` rows. Rows without an id are skipped and only the first
    /// row for a repeated id is kept.
    pub fn from_reader<R: Read>(reader: R) -> Result<Vec<WorkItem>, ImportError> {
        let mut csv_reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_reader(reader);
        let mut seen = HashSet::new();
        let mut items = Vec::new();

        for record in csv_reader.deserialize::<WorkItemRow>() {
            let row = record?;
            let Some(id) = row.id else {
                continue;
            };
            if !seen.insert(id.clone()) {
                continue;
            }

            items.push(WorkItem {
                id: ItemId(id),
                nationality: row.nationality,
                position: row.position,
            });
        }

        Ok(items)
    }
}

#[derive(Debug, Deserialize)]
struct WorkItemRow {
    #[serde(default, deserialize_with = "empty_string_as_none")]
    id: Option<String>,
    #[serde(default, deserialize_with = "empty_string_as_none")]
    nationality: Option<String>,
    #[serde(default, deserialize_with = "empty_string_as_none")]
    position: Option<String>,
}

fn empty_string_as_none<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let opt = Option::<String>::deserialize(deserializer)?;
    Ok(opt.filter(|value| !value.trim().is_empty()))
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RuleFile {
    List(Vec<ChannelRule>),
    Wrapped { rules: Vec<ChannelRule> },
}

/// Load channel rules from a JSON file holding either a bare array or `{"rules": [...]}`.
pub fn load_rules<P: AsRef<Path>>(path: P) -> Result<Vec<ChannelRule>, ImportError> {
    let file = std::fs::File::open(path)?;
    rules_from_reader(file)
}

pub fn rules_from_reader<R: Read>(reader: R) -> Result<Vec<ChannelRule>, ImportError> {
    let rules = match serde_json::from_reader(reader)? {
        RuleFile::List(rules) | RuleFile::Wrapped { rules } => rules,
    };
    Ok(rules)
}
