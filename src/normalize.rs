//! Flattening of experiment documents into per-file rows.
//!
//! Upstream documents vary by resource type and schema version, so every
//! column is read through a path table and falls back to `null` when any
//! segment is missing. A document without a `files` list is treated as a
//! single file entry of itself.

use std::cmp::Ordering;
use std::collections::HashMap;

use serde::Serialize;
use serde_json::{Map, Value};

/// One flattened row: per-file columns plus the sample columns of its parent.
pub type FileRecord = Map<String, Value>;

const UNKNOWN: &str = "Unknown";

struct FieldSpec {
    column: &'static str,
    path: &'static [&'static str],
}

const fn field(column: &'static str, path: &'static [&'static str]) -> FieldSpec {
    FieldSpec { column, path }
}

const SAMPLE_FIELDS: &[FieldSpec] = &[
    field("sample_accession", &["accession"]),
    field("sample_status", &["status"]),
    field("assay_title", &["assay_title"]),
    field("assay_term_name", &["assay_term_name"]),
    field("replication_type", &["replication_type"]),
    field("date_released", &["date_released"]),
    field("biosample_term_id", &["biosample_ontology", "term_id"]),
    field("biosample_term_name", &["biosample_ontology", "term_name"]),
    field("lab", &["lab", "institute_name"]),
    field("lab_title", &["lab", "title"]),
];

const TARGET_COLUMN: &str = "target";
const ORGANISM_COLUMN: &str = "organism";

const FILE_FIELDS: &[FieldSpec] = &[
    field("accession", &["accession"]),
    field("status", &["status"]),
    field("file_size", &["file_size"]),
    field("file_format", &["file_format"]),
    field("file_type", &["file_type"]),
    field("output_category", &["output_category"]),
    field("output_type", &["output_type"]),
    field("assembly", &["assembly"]),
    field("read_length", &["read_length"]),
    field("read_length_units", &["read_length_units"]),
    field("run_type", &["run_type"]),
    field("schema_version", &["schema_version"]),
];

const REPLICATE_FIELDS: &[FieldSpec] = &[
    field("biological_replicates", &["biological_replicates"]),
    field("technical_replicates", &["technical_replicates"]),
];

const URL_FIELD: FieldSpec = field("url", &["cloud_metadata", "url"]);
const ENCODE_VERSION_COLUMN: &str = "encode_version";

/// Column order of every flattened row.
pub fn columns() -> Vec<&'static str> {
    let mut columns = Vec::new();
    columns.extend(FILE_FIELDS.iter().map(|spec| spec.column));
    columns.extend(REPLICATE_FIELDS.iter().map(|spec| spec.column));
    columns.push(URL_FIELD.column);
    columns.push(ENCODE_VERSION_COLUMN);
    columns.push(TARGET_COLUMN);
    columns.push(ORGANISM_COLUMN);
    columns.extend(SAMPLE_FIELDS.iter().map(|spec| spec.column));
    columns
}

pub fn lookup<'a>(value: &'a Value, path: &[&str]) -> Option<&'a Value> {
    path.iter()
        .try_fold(value, |current, segment| current.get(*segment))
        .filter(|found| !found.is_null())
}

fn extract(value: &Value, spec: &FieldSpec) -> Value {
    lookup(value, spec.path).cloned().unwrap_or(Value::Null)
}

/// Guarantees a `files` array. A bare file-like record becomes
/// `{files: [record], ...record}`; a non-array `files` becomes empty.
pub fn normalize(raw: Value) -> Value {
    match raw {
        Value::Object(mut map) => {
            match map.get("files") {
                Some(Value::Array(_)) => {}
                Some(_) => {
                    map.insert("files".to_string(), Value::Array(Vec::new()));
                }
                None => {
                    let copy = Value::Object(map.clone());
                    map.insert("files".to_string(), Value::Array(vec![copy]));
                }
            }
            Value::Object(map)
        }
        _ => {
            let mut map = Map::new();
            map.insert("files".to_string(), Value::Array(Vec::new()));
            Value::Object(map)
        }
    }
}

pub fn sample_metadata(sample: &Value) -> FileRecord {
    let mut record = Map::new();
    let (target, organism) = target_fields(sample);
    record.insert(TARGET_COLUMN.to_string(), target);
    record.insert(ORGANISM_COLUMN.to_string(), organism);
    for spec in SAMPLE_FIELDS {
        record.insert(spec.column.to_string(), extract(sample, spec));
    }
    record
}

fn target_fields(sample: &Value) -> (Value, Value) {
    let Some(target) = lookup(sample, &["target"]) else {
        return (Value::from(UNKNOWN), Value::from(UNKNOWN));
    };
    let label = lookup(target, &["label"]).cloned().unwrap_or(Value::Null);
    let organism = match lookup(target, &["organism"]) {
        Some(Value::String(name)) => Value::from(name.as_str()),
        Some(organism) => lookup(organism, &["scientific_name"])
            .or_else(|| lookup(organism, &["name"]))
            .cloned()
            .unwrap_or(Value::Null),
        None => Value::Null,
    };
    (label, organism)
}

/// Maps file accessions to the analysis object that lists them.
struct AnalysisIndex<'a> {
    by_file: HashMap<&'a str, &'a Value>,
    present: bool,
}

impl<'a> AnalysisIndex<'a> {
    fn build(sample: &'a Value) -> Self {
        let Some(analyses) = lookup(sample, &["analysis_objects"]).and_then(Value::as_array) else {
            return Self {
                by_file: HashMap::new(),
                present: false,
            };
        };
        let mut by_file = HashMap::new();
        for analysis in analyses {
            let files = lookup(analysis, &["files"])
                .and_then(Value::as_array)
                .map(Vec::as_slice)
                .unwrap_or_default();
            for reference in files.iter().filter_map(Value::as_str) {
                if let Some(accession) = file_reference_accession(reference) {
                    by_file.insert(accession, analysis);
                }
            }
        }
        Self {
            by_file,
            present: true,
        }
    }

    fn encode_version(&self, file_accession: Option<&str>) -> Value {
        if !self.present {
            return Value::Null;
        }
        file_accession
            .and_then(|accession| self.by_file.get(accession))
            .and_then(|analysis| lookup(analysis, &["pipeline_award_rfas"]))
            .and_then(Value::as_array)
            .and_then(|rfas| rfas.first())
            .and_then(Value::as_str)
            .and_then(|rfa| rfa.chars().last())
            .and_then(|ch| ch.to_digit(10))
            .map(Value::from)
            .unwrap_or(Value::Null)
    }
}

/// `/files/ENCFF001ABC/` -> `ENCFF001ABC`
pub fn file_reference_accession(reference: &str) -> Option<&str> {
    reference
        .split('/')
        .nth(2)
        .filter(|segment| !segment.is_empty())
}

fn file_record(file: &Value, analyses: &AnalysisIndex<'_>) -> FileRecord {
    let mut record = Map::new();
    for spec in FILE_FIELDS {
        record.insert(spec.column.to_string(), extract(file, spec));
    }
    for spec in REPLICATE_FIELDS {
        record.insert(spec.column.to_string(), sorted_ids(lookup(file, spec.path)));
    }
    record.insert(URL_FIELD.column.to_string(), extract(file, &URL_FIELD));
    let accession = lookup(file, &["accession"]).and_then(Value::as_str);
    record.insert(
        ENCODE_VERSION_COLUMN.to_string(),
        analyses.encode_version(accession),
    );
    record
}

fn empty_file_record() -> FileRecord {
    let mut record = Map::new();
    for column in FILE_FIELDS
        .iter()
        .chain(REPLICATE_FIELDS)
        .map(|spec| spec.column)
        .chain([URL_FIELD.column, ENCODE_VERSION_COLUMN])
    {
        record.insert(column.to_string(), Value::Null);
    }
    record
}

fn sorted_ids(value: Option<&Value>) -> Value {
    let Some(Value::Array(items)) = value else {
        return Value::Null;
    };
    let mut items = items.clone();
    items.sort_by(compare_ids);
    Value::Array(items)
}

fn id_parts(value: &Value) -> Option<Vec<f64>> {
    match value {
        Value::Number(number) => number.as_f64().map(|n| vec![n]),
        Value::String(text) => text
            .split('_')
            .map(|part| part.trim().parse::<f64>().ok())
            .collect(),
        _ => None,
    }
}

// Technical replicate ids look like `1_2`; compare them component-wise.
fn compare_ids(left: &Value, right: &Value) -> Ordering {
    match (id_parts(left), id_parts(right)) {
        (Some(a), Some(b)) => a
            .iter()
            .zip(&b)
            .map(|(x, y)| x.total_cmp(y))
            .find(|ordering| ordering.is_ne())
            .unwrap_or_else(|| a.len().cmp(&b.len())),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => left.to_string().cmp(&right.to_string()),
    }
}

/// One row per file entry with the sample columns merged in; a sample
/// without files still yields one row.
pub fn flatten(sample: &Value) -> Vec<FileRecord> {
    let metadata = sample_metadata(sample);
    let files = lookup(sample, &["files"])
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();

    if files.is_empty() {
        let mut record = empty_file_record();
        record.extend(metadata);
        return vec![record];
    }

    let analyses = AnalysisIndex::build(sample);
    files
        .iter()
        .map(|file| {
            let mut record = file_record(file, &analyses);
            record.extend(metadata.clone());
            record
        })
        .collect()
}

pub fn to_table(raw: Value) -> ResultTable {
    ResultTable::from_rows(flatten(&normalize(raw)))
}

/// Row concatenation of flattened records. Rows are addressed by position,
/// so concatenating tables renumbers them implicitly.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct ResultTable {
    rows: Vec<FileRecord>,
}

impl ResultTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_rows(rows: Vec<FileRecord>) -> Self {
        Self { rows }
    }

    pub fn columns(&self) -> Vec<&'static str> {
        columns()
    }

    pub fn rows(&self) -> &[FileRecord] {
        &self.rows
    }

    pub fn into_rows(self) -> Vec<FileRecord> {
        self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn append(&mut self, other: ResultTable) {
        self.rows.extend(other.rows);
    }

    pub fn retain<F>(&mut self, predicate: F)
    where
        F: FnMut(&FileRecord) -> bool,
    {
        self.rows.retain(predicate);
    }

    /// Values of one column in row order.
    pub fn column(&self, name: &str) -> Vec<&Value> {
        self.rows
            .iter()
            .map(|row| row.get(name).unwrap_or(&Value::Null))
            .collect()
    }
}

impl FromIterator<ResultTable> for ResultTable {
    fn from_iter<I: IntoIterator<Item = ResultTable>>(iter: I) -> Self {
        let mut table = ResultTable::new();
        for part in iter {
            table.append(part);
        }
        table
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn bare_record_becomes_single_file() {
        let raw = json!({"accession": "ENCFF001AAA", "file_format": "bam"});
        let sample = normalize(raw.clone());
        let files = sample["files"].as_array().unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0], raw);
        assert_eq!(sample["file_format"], "bam");
    }

    #[test]
    fn non_array_files_is_empty() {
        let sample = normalize(json!({"files": "oops"}));
        assert_eq!(sample["files"], json!([]));
    }

    #[test]
    fn target_absent_is_unknown() {
        let meta = sample_metadata(&json!({"accession": "ENCSR1"}));
        assert_eq!(meta["target"], "Unknown");
        assert_eq!(meta["organism"], "Unknown");
        assert_eq!(meta["lab"], Value::Null);
    }

    #[test]
    fn organism_string_or_object() {
        let as_string = sample_metadata(&json!({"target": {"label": "CTCF", "organism": "human"}}));
        assert_eq!(as_string["organism"], "human");
        let as_object = sample_metadata(&json!({
            "target": {"label": "CTCF", "organism": {"scientific_name": "Homo sapiens"}}
        }));
        assert_eq!(as_object["target"], "CTCF");
        assert_eq!(as_object["organism"], "Homo sapiens");
        let missing = sample_metadata(&json!({"target": {"label": "CTCF"}}));
        assert_eq!(missing["organism"], Value::Null);
    }

    #[test]
    fn technical_replicates_sort_componentwise() {
        let sorted = sorted_ids(Some(&json!(["2_1", "1_10", "1_2"])));
        assert_eq!(sorted, json!(["1_2", "1_10", "2_1"]));
        let sorted = sorted_ids(Some(&json!([3, 1, 2])));
        assert_eq!(sorted, json!([1, 2, 3]));
        assert_eq!(sorted_ids(None), Value::Null);
    }

    #[test]
    fn file_reference_third_segment() {
        assert_eq!(
            file_reference_accession("/files/ENCFF001ABC/"),
            Some("ENCFF001ABC")
        );
        assert_eq!(file_reference_accession("ENCFF001ABC"), None);
    }

    #[test]
    fn encode_version_from_first_rfa() {
        let sample = json!({
            "files": [{"accession": "ENCFF1"}, {"accession": "ENCFF2"}],
            "analysis_objects": [
                {"files": ["/files/ENCFF1/"], "pipeline_award_rfas": ["ENCODE4", "ENCODE3"]},
                {"files": ["/files/ENCFF2/"], "pipeline_award_rfas": []}
            ]
        });
        let rows = flatten(&sample);
        assert_eq!(rows[0]["encode_version"], json!(4));
        assert_eq!(rows[1]["encode_version"], Value::Null);
    }

    #[test]
    fn every_row_has_every_column() {
        let rows = flatten(&normalize(json!({"files": [{"accession": "ENCFF1"}]})));
        let mut expected = columns();
        expected.sort_unstable();
        let mut actual: Vec<&str> = rows[0].keys().map(String::as_str).collect();
        actual.sort_unstable();
        assert_eq!(actual, expected);
    }
}
