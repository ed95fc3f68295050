use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::EncodeError;
use crate::normalize::{FileRecord, ResultTable, lookup, normalize};

pub const GRAPH_FIELD: &str = "@graph";

/// Accessions of every summary record in a search envelope, in envelope order.
/// A record without a string `accession` fails the whole extraction.
pub fn extract_accessions(envelope: &Value) -> Result<Vec<String>, EncodeError> {
    let records = envelope
        .get(GRAPH_FIELD)
        .and_then(Value::as_array)
        .ok_or_else(|| EncodeError::MissingField(GRAPH_FIELD.to_string()))?;
    records
        .iter()
        .map(|record| {
            record
                .get("accession")
                .and_then(Value::as_str)
                .map(str::to_string)
                .ok_or_else(|| EncodeError::MissingField(format!("{GRAPH_FIELD}[].accession")))
        })
        .collect()
}

/// Cloud download URLs of a sample's files, in file order. Files without
/// cloud metadata are skipped.
pub fn extract_download_urls(sample: &Value) -> Vec<String> {
    let sample = normalize(sample.clone());
    lookup(&sample, &["files"])
        .and_then(Value::as_array)
        .map(|files| {
            files
                .iter()
                .filter_map(|file| lookup(file, &["cloud_metadata", "url"]))
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

/// Post-hoc row predicates over a flattened table. Unset predicates keep every row.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TableFilter {
    pub status: Option<String>,
    pub organism: Option<String>,
    pub assembly: Option<String>,
    pub output_type: Option<String>,
    pub min_replicates: Option<usize>,
}

impl TableFilter {
    pub fn is_empty(&self) -> bool {
        self.status.is_none()
            && self.organism.is_none()
            && self.assembly.is_none()
            && self.output_type.is_none()
            && self.min_replicates.is_none()
    }

    pub fn matches(&self, row: &FileRecord) -> bool {
        column_equals(row, "status", self.status.as_deref())
            && column_equals(row, "organism", self.organism.as_deref())
            && column_equals(row, "assembly", self.assembly.as_deref())
            && column_equals(row, "output_type", self.output_type.as_deref())
            && self
                .min_replicates
                .map(|min| replicate_count(row) >= min)
                .unwrap_or(true)
    }

    pub fn apply(&self, mut table: ResultTable) -> ResultTable {
        if !self.is_empty() {
            table.retain(|row| self.matches(row));
        }
        table
    }
}

fn column_equals(row: &FileRecord, column: &str, expected: Option<&str>) -> bool {
    match expected {
        None => true,
        Some(expected) => row.get(column).and_then(Value::as_str) == Some(expected),
    }
}

fn replicate_count(row: &FileRecord) -> usize {
    row.get("biological_replicates")
        .and_then(Value::as_array)
        .map(Vec::len)
        .unwrap_or(0)
}
