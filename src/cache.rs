use std::fs;
use std::io::{Read, Write};

use camino::{Utf8Path, Utf8PathBuf};
use directories::BaseDirs;
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::client::EncodeClient;
use crate::error::EncodeError;
use crate::query::QueryParameters;

#[derive(Serialize)]
struct CacheKey<'a> {
    path: &'a str,
    parameters: &'a QueryParameters,
}

/// Content-addressed store of raw responses, one gzip JSON file per request.
#[derive(Debug, Clone)]
pub struct ResponseCache {
    root: Utf8PathBuf,
}

impl ResponseCache {
    pub fn new() -> Result<Self, EncodeError> {
        let root = BaseDirs::new()
            .and_then(|dirs| {
                Utf8PathBuf::from_path_buf(
                    dirs.home_dir()
                        .join(".cache")
                        .join("encode-query")
                        .join("responses"),
                )
                .ok()
            })
            .ok_or_else(|| EncodeError::Cache("unable to resolve cache directory".to_string()))?;
        Ok(Self { root })
    }

    pub fn new_with_root(root: Utf8PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    pub fn key(path: &str, parameters: &QueryParameters) -> Result<String, EncodeError> {
        let canonical = serde_json::to_vec(&CacheKey {
            path: path.trim_matches('/'),
            parameters,
        })
        .map_err(|err| EncodeError::Cache(err.to_string()))?;
        Ok(format!("{:x}", Sha256::digest(&canonical)))
    }

    pub fn entry_path(&self, key: &str) -> Utf8PathBuf {
        self.root.join(format!("{key}.json.gz"))
    }

    /// Returns the stored document, or `None` when absent or unreadable.
    pub fn get(&self, key: &str) -> Result<Option<Value>, EncodeError> {
        let path = self.entry_path(key);
        if !path.as_std_path().exists() {
            return Ok(None);
        }
        let file = fs::File::open(path.as_std_path())
            .map_err(|err| EncodeError::Cache(format!("open {path}: {err}")))?;
        let mut text = String::new();
        if let Err(err) = GzDecoder::new(file).read_to_string(&mut text) {
            warn!(%path, error = %err, "cache.corrupt");
            return Ok(None);
        }
        match serde_json::from_str(&text) {
            Ok(value) => Ok(Some(value)),
            Err(err) => {
                warn!(%path, error = %err, "cache.corrupt");
                Ok(None)
            }
        }
    }

    pub fn put(&self, key: &str, value: &Value) -> Result<(), EncodeError> {
        fs::create_dir_all(self.root.as_std_path())
            .map_err(|err| EncodeError::Cache(err.to_string()))?;
        let bytes = serde_json::to_vec(value).map_err(|err| EncodeError::Cache(err.to_string()))?;
        let temp = tempfile::Builder::new()
            .prefix("encode-query-cache")
            .tempfile_in(self.root.as_std_path())
            .map_err(|err| EncodeError::Cache(err.to_string()))?;
        let mut encoder = GzEncoder::new(temp.as_file(), Compression::default());
        encoder
            .write_all(&bytes)
            .map_err(|err| EncodeError::Cache(err.to_string()))?;
        encoder
            .finish()
            .map_err(|err| EncodeError::Cache(err.to_string()))?;
        temp.persist(self.entry_path(key).as_std_path())
            .map_err(|err| EncodeError::Cache(err.to_string()))?;
        Ok(())
    }
}

/// Read-through, write-through memoization of any [`EncodeClient`].
pub struct CachedClient<C> {
    inner: C,
    cache: ResponseCache,
}

impl<C: EncodeClient> CachedClient<C> {
    pub fn new(inner: C, cache: ResponseCache) -> Self {
        Self { inner, cache }
    }

    pub fn cache(&self) -> &ResponseCache {
        &self.cache
    }

    pub fn into_inner(self) -> C {
        self.inner
    }
}

impl<C: EncodeClient> EncodeClient for CachedClient<C> {
    fn fetch(&self, path: &str, parameters: &QueryParameters) -> Result<Value, EncodeError> {
        let key = ResponseCache::key(path, parameters)?;
        if let Some(value) = self.cache.get(&key)? {
            debug!(path, %key, "cache.hit");
            return Ok(value);
        }
        let value = self.inner.fetch(path, parameters)?;
        self.cache.put(&key, &value)?;
        debug!(path, %key, "cache.store");
        Ok(value)
    }
}
