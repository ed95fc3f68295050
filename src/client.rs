use std::time::{Duration, Instant};

use reqwest::blocking::Client;
use reqwest::header::{ACCEPT, HeaderMap, HeaderValue, USER_AGENT};
use serde_json::Value;
use tracing::debug;

use crate::error::EncodeError;
use crate::query::{BiosampleQuery, ExperimentQuery, QueryParameters};

pub const DEFAULT_BASE_URL: &str = "https://www.encodeproject.org";

pub trait EncodeClient: Send + Sync {
    /// Issues one GET against `<base>/<path>/` and parses the body as JSON.
    fn fetch(&self, path: &str, parameters: &QueryParameters) -> Result<Value, EncodeError>;
}

impl<C: EncodeClient + ?Sized> EncodeClient for Box<C> {
    fn fetch(&self, path: &str, parameters: &QueryParameters) -> Result<Value, EncodeError> {
        (**self).fetch(path, parameters)
    }
}

#[derive(Debug, Clone)]
pub struct ClientSettings {
    pub base_url: String,
    pub timeout: Duration,
    pub user_agent: String,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout: Duration::from_secs(60),
            user_agent: format!("encode-query/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

#[derive(Clone)]
pub struct EncodeHttpClient {
    client: Client,
    base_url: String,
}

impl EncodeHttpClient {
    pub fn new() -> Result<Self, EncodeError> {
        Self::with_settings(ClientSettings::default())
    }

    pub fn with_settings(settings: ClientSettings) -> Result<Self, EncodeError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&settings.user_agent)
                .map_err(|err| EncodeError::InvalidArgument(err.to_string()))?,
        );
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        let client = Client::builder()
            .default_headers(headers)
            .timeout(settings.timeout)
            .build()
            .map_err(|err| EncodeError::Http(err.to_string()))?;
        Ok(Self {
            client,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn endpoint(&self, path: &str) -> String {
        endpoint_url(&self.base_url, path)
    }
}

impl EncodeClient for EncodeHttpClient {
    fn fetch(&self, path: &str, parameters: &QueryParameters) -> Result<Value, EncodeError> {
        let url = self.endpoint(path);
        let start = Instant::now();
        let response = self
            .client
            .get(&url)
            .query(&parameters.to_pairs())
            .send()
            .map_err(|err| EncodeError::Http(err.to_string()))?;
        let status = response.status();
        let body = response
            .text()
            .map_err(|err| EncodeError::Http(err.to_string()))?;
        debug!(
            %url,
            status = status.as_u16(),
            parameters = parameters.len(),
            latency_ms = start.elapsed().as_millis() as u64,
            "encode.response"
        );
        parse_body(status.as_u16(), &body)
    }
}

/// The portal answers an empty search with 404 and a regular search
/// envelope, so a JSON body is returned whatever the status unless it is the
/// portal's own error document (`"status": "error"`). A non-JSON body is a
/// `Status` error on a non-success status and a `Json` error otherwise.
pub fn parse_body(status: u16, body: &str) -> Result<Value, EncodeError> {
    let is_success = (200..300).contains(&status);
    match serde_json::from_str::<Value>(body) {
        Ok(value) if !is_success && is_error_document(&value) => Err(EncodeError::Status {
            status,
            message: error_message(&value),
        }),
        Ok(value) => Ok(value),
        Err(_) if !is_success => Err(EncodeError::Status {
            status,
            message: body.to_string(),
        }),
        Err(err) => Err(EncodeError::Json(err.to_string())),
    }
}

fn is_error_document(value: &Value) -> bool {
    value.get("status").and_then(Value::as_str) == Some("error")
}

fn error_message(value: &Value) -> String {
    ["description", "title"]
        .iter()
        .find_map(|key| value.get(*key).and_then(Value::as_str))
        .map(str::to_string)
        .unwrap_or_else(|| value.to_string())
}

/// Joins a base URL and a resource path, always ending with `/` as the service expects.
pub fn endpoint_url(base_url: &str, path: &str) -> String {
    let path = path.trim_matches('/');
    format!("{}/{}/", base_url.trim_end_matches('/'), path)
}

pub fn experiment<C: EncodeClient>(
    client: &C,
    query: &ExperimentQuery,
) -> Result<Value, EncodeError> {
    let parameters = query.to_parameters()?;
    client.fetch(query.path(), &parameters)
}

pub fn biosample<C: EncodeClient>(client: &C, accession: &str) -> Result<Value, EncodeError> {
    let query = BiosampleQuery::new(accession)?;
    client.fetch(&query.path(), &query.parameters())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_has_trailing_slash() {
        assert_eq!(
            endpoint_url("https://www.encodeproject.org/", "/search"),
            "https://www.encodeproject.org/search/"
        );
        assert_eq!(
            endpoint_url(DEFAULT_BASE_URL, "experiments/ENCSR000EDP"),
            "https://www.encodeproject.org/experiments/ENCSR000EDP/"
        );
    }

    #[test]
    fn json_body_wins_over_status() {
        let value = parse_body(404, r#"{"@graph": [], "total": 0}"#).unwrap();
        assert_eq!(value["total"], 0);
        let err = parse_body(
            404,
            r#"{"@type": ["HTTPNotFound", "Error"], "status": "error", "title": "Not Found"}"#,
        )
        .unwrap_err();
        assert!(matches!(err, EncodeError::Status { status: 404, message } if message == "Not Found"));
        assert!(matches!(
            parse_body(503, "<html>busy</html>"),
            Err(EncodeError::Status { status: 503, .. })
        ));
        assert!(matches!(
            parse_body(200, "<html>ok</html>"),
            Err(EncodeError::Json(_))
        ));
    }
}
