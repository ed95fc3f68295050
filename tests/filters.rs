use std::fs;

use assert_matches::assert_matches;
use serde_json::{Value, json};

use encode_query::error::EncodeError;
use encode_query::filters::{TableFilter, extract_accessions, extract_download_urls};
use encode_query::normalize::to_table;

fn fixture(name: &str) -> Value {
    let raw = fs::read_to_string(format!("tests/fixtures/{name}")).unwrap();
    serde_json::from_str(&raw).unwrap()
}

#[test]
fn search_envelope_accessions() {
    let envelope = fixture("search_hepg2_arid3a.json");
    assert_eq!(extract_accessions(&envelope).unwrap(), vec!["ENCSR000EDP"]);
}

#[test]
fn empty_graph_is_not_an_error() {
    let accessions = extract_accessions(&json!({"@graph": [], "total": 0})).unwrap();
    assert!(accessions.is_empty());
}

#[test]
fn graph_must_be_a_list() {
    let err = extract_accessions(&json!({"@graph": {"accession": "X"}})).unwrap_err();
    assert_matches!(err, EncodeError::MissingField(_));
}

#[test]
fn experiment_download_urls_in_file_order() {
    let sample = fixture("experiment_ENCSR000EDP.json");
    assert_eq!(
        extract_download_urls(&sample),
        vec![
            "https://encode-public.s3.amazonaws.com/2012/ENCFF001AAA.fastq.gz",
            "https://encode-public.s3.amazonaws.com/2012/ENCFF002BBB.bam",
        ]
    );
}

#[test]
fn urls_of_non_object_are_empty() {
    assert!(extract_download_urls(&Value::Null).is_empty());
    assert!(extract_download_urls(&json!({"files": []})).is_empty());
}

#[test]
fn filter_experiment_rows() {
    let table = to_table(fixture("experiment_ENCSR000EDP.json"));

    let released = TableFilter {
        status: Some("released".to_string()),
        ..TableFilter::default()
    };
    assert_eq!(
        released.apply(table.clone()).column("accession"),
        vec![&json!("ENCFF001AAA"), &json!("ENCFF002BBB")]
    );

    let replicated_hg19 = TableFilter {
        assembly: Some("hg19".to_string()),
        min_replicates: Some(2),
        ..TableFilter::default()
    };
    assert_eq!(
        replicated_hg19.apply(table.clone()).column("accession"),
        vec![&json!("ENCFF003CCC")]
    );

    let organism = TableFilter {
        organism: Some("Mus musculus".to_string()),
        ..TableFilter::default()
    };
    assert!(organism.apply(table).is_empty());
}

#[test]
fn empty_filter_keeps_every_row() {
    let table = to_table(fixture("experiment_ENCSR000EDP.json"));
    let filter = TableFilter::default();
    assert!(filter.is_empty());
    assert_eq!(filter.apply(table.clone()), table);
}
