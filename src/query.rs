use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::domain::{Accession, TriState};
use crate::error::EncodeError;

pub const SEARCH_PATH: &str = "search";

const KEY_TYPE: &str = "type";
const KEY_STATUS: &str = "status";
const KEY_LIMIT: &str = "limit";
const KEY_CELL_LINE: &str = "biosample_ontology.term_name";
const KEY_ASSEMBLY: &str = "assembly";
const KEY_TARGET: &str = "target.label";
const KEY_SEARCH_TERM: &str = "searchTerm";
const KEY_ORGANISM: &str = "replicates.library.biosample.donor.organism.scientific_name";
const KEY_FILE_TYPE: &str = "files.file_type";
const KEY_PERTURBED: &str = "perturbed";
// Negated filters carry a trailing `!` so they serialize as `field!=value`.
const KEY_NOT_REPLICATION_TYPE: &str = "replication_type!";
const KEY_NOT_AUDIT_ERROR: &str = "audit.ERROR.category!";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Flag(bool),
    Text(String),
    List(Vec<String>),
}

impl From<&str> for ParamValue {
    fn from(value: &str) -> Self {
        ParamValue::Text(value.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(value: String) -> Self {
        ParamValue::Text(value)
    }
}

impl From<bool> for ParamValue {
    fn from(value: bool) -> Self {
        ParamValue::Flag(value)
    }
}

impl From<Vec<String>> for ParamValue {
    fn from(value: Vec<String>) -> Self {
        ParamValue::List(value)
    }
}

/// Query-string parameters for one request. Keys are kept sorted so equal
/// parameter sets serialize identically.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QueryParameters(BTreeMap<String, ParamValue>);

impl QueryParameters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<ParamValue>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn insert_opt(&mut self, key: &str, value: Option<&String>) {
        if let Some(value) = value {
            self.insert(key, value.as_str());
        }
    }

    pub fn get(&self, key: &str) -> Option<&ParamValue> {
        self.0.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Flattens into query pairs; list values repeat their key once per element.
    pub fn to_pairs(&self) -> Vec<(String, String)> {
        let mut pairs = Vec::with_capacity(self.0.len());
        for (key, value) in &self.0 {
            match value {
                ParamValue::Flag(flag) => pairs.push((key.clone(), flag.to_string())),
                ParamValue::Text(text) => pairs.push((key.clone(), text.clone())),
                ParamValue::List(items) => {
                    for item in items {
                        pairs.push((key.clone(), item.clone()));
                    }
                }
            }
        }
        pairs
    }
}

/// Options for an experiment search. Every filter left as `None` is omitted
/// from the outgoing parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExperimentQuery {
    pub status: String,
    pub limit: String,
    pub cell_line: Option<String>,
    pub assembly: Option<String>,
    pub target: Option<String>,
    pub search_term: Option<String>,
    pub organism: Option<String>,
    pub file_type: Option<String>,
    pub perturbed: TriState,
    pub replicated: bool,
    pub drop_errors: Vec<String>,
    pub overrides: BTreeMap<String, String>,
}

impl Default for ExperimentQuery {
    fn default() -> Self {
        Self {
            status: "released".to_string(),
            limit: "all".to_string(),
            cell_line: None,
            assembly: None,
            target: None,
            search_term: None,
            organism: None,
            file_type: None,
            perturbed: TriState::Unset,
            replicated: false,
            drop_errors: Vec::new(),
            overrides: BTreeMap::new(),
        }
    }
}

impl ExperimentQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cell_line(mut self, value: impl Into<String>) -> Self {
        self.cell_line = Some(value.into());
        self
    }

    pub fn assembly(mut self, value: impl Into<String>) -> Self {
        self.assembly = Some(value.into());
        self
    }

    pub fn target(mut self, value: impl Into<String>) -> Self {
        self.target = Some(value.into());
        self
    }

    pub fn search_term(mut self, value: impl Into<String>) -> Self {
        self.search_term = Some(value.into());
        self
    }

    pub fn organism(mut self, value: impl Into<String>) -> Self {
        self.organism = Some(value.into());
        self
    }

    pub fn file_type(mut self, value: impl Into<String>) -> Self {
        self.file_type = Some(value.into());
        self
    }

    pub fn status(mut self, value: impl Into<String>) -> Self {
        self.status = value.into();
        self
    }

    pub fn limit(mut self, value: impl Into<String>) -> Self {
        self.limit = value.into();
        self
    }

    pub fn replicated(mut self, value: bool) -> Self {
        self.replicated = value;
        self
    }

    pub fn drop_errors<I, S>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.drop_errors = values.into_iter().map(Into::into).collect();
        self
    }

    /// Parses the perturbation flag from user input (`true`, `false`, `unset`).
    pub fn perturbed(mut self, value: &str) -> Result<Self, EncodeError> {
        self.perturbed = value.parse()?;
        Ok(self)
    }

    pub fn parameter(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.overrides.insert(key.into(), value.into());
        self
    }

    pub fn path(&self) -> &'static str {
        SEARCH_PATH
    }

    pub fn to_parameters(&self) -> Result<QueryParameters, EncodeError> {
        if self.status.trim().is_empty() {
            return Err(EncodeError::InvalidArgument(
                "status must not be empty".to_string(),
            ));
        }
        validate_limit(&self.limit)?;

        let mut params = QueryParameters::new();
        params.insert(KEY_TYPE, "Experiment");
        params.insert(KEY_STATUS, self.status.as_str());
        params.insert(KEY_LIMIT, self.limit.as_str());
        params.insert_opt(KEY_CELL_LINE, self.cell_line.as_ref());
        params.insert_opt(KEY_ASSEMBLY, self.assembly.as_ref());
        params.insert_opt(KEY_TARGET, self.target.as_ref());
        params.insert_opt(KEY_SEARCH_TERM, self.search_term.as_ref());
        params.insert_opt(KEY_ORGANISM, self.organism.as_ref());
        params.insert_opt(KEY_FILE_TYPE, self.file_type.as_ref());
        if let Some(flag) = self.perturbed.as_bool() {
            params.insert(KEY_PERTURBED, flag);
        }
        if self.replicated {
            params.insert(KEY_NOT_REPLICATION_TYPE, "unreplicated");
        }
        if !self.drop_errors.is_empty() {
            params.insert(KEY_NOT_AUDIT_ERROR, self.drop_errors.clone());
        }
        for (key, value) in &self.overrides {
            params.insert(key.as_str(), value.as_str());
        }
        Ok(params)
    }
}

fn validate_limit(limit: &str) -> Result<(), EncodeError> {
    let limit = limit.trim();
    let is_valid = limit == "all" || limit.parse::<u64>().map(|n| n > 0).unwrap_or(false);
    if !is_valid {
        return Err(EncodeError::InvalidArgument(format!(
            "limit must be `all` or a positive integer, got {limit:?}"
        )));
    }
    Ok(())
}

/// Path-based lookup of a single experiment document; carries no query parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BiosampleQuery {
    accession: Accession,
}

impl BiosampleQuery {
    pub fn new(accession: &str) -> Result<Self, EncodeError> {
        Ok(Self {
            accession: accession.parse()?,
        })
    }

    pub fn accession(&self) -> &Accession {
        &self.accession
    }

    pub fn path(&self) -> String {
        self.accession.experiment_path()
    }

    pub fn parameters(&self) -> QueryParameters {
        QueryParameters::new()
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn defaults_only() {
        let params = ExperimentQuery::new().to_parameters().unwrap();
        assert_eq!(params.len(), 3);
        assert_eq!(params.get("type"), Some(&ParamValue::from("Experiment")));
        assert_eq!(params.get("status"), Some(&ParamValue::from("released")));
        assert_eq!(params.get("limit"), Some(&ParamValue::from("all")));
    }

    #[test]
    fn empty_string_is_not_omitted() {
        let params = ExperimentQuery::new().target("").to_parameters().unwrap();
        assert_eq!(params.get("target.label"), Some(&ParamValue::from("")));
        assert!(!params.contains_key("assembly"));
    }

    #[test]
    fn list_values_repeat_key() {
        let params = ExperimentQuery::new()
            .drop_errors(["extremely low read depth", "missing control alignments"])
            .to_parameters()
            .unwrap()
            .to_pairs();
        let audit = params
            .iter()
            .filter(|(key, _)| key == "audit.ERROR.category!")
            .count();
        assert_eq!(audit, 2);
    }

    #[test]
    fn rejects_bad_limit() {
        let err = ExperimentQuery::new().limit("0").to_parameters().unwrap_err();
        assert_matches!(err, EncodeError::InvalidArgument(_));
    }
}
