use std::path::Path;
use std::time::Duration;

use serde_json::Value;
use tracing::info;

use crate::batch::{self, BatchOptions, BatchOutcome};
use crate::client::{self, EncodeClient};
use crate::download::{self, CancelToken, DownloadOptions, DownloadOutcome, FileTransport};
use crate::error::EncodeError;
use crate::filters::{extract_accessions, extract_download_urls};
use crate::normalize::{ResultTable, to_table};
use crate::query::ExperimentQuery;

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub message: String,
    pub elapsed: Option<Duration>,
    pub bytes: Option<u64>,
    pub total: Option<u64>,
}

impl ProgressEvent {
    pub fn phase(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            elapsed: None,
            bytes: None,
            total: None,
        }
    }
}

pub trait ProgressSink {
    fn event(&self, event: ProgressEvent);
}

/// Entry point tying a search client and a file transport together.
#[derive(Clone)]
pub struct App<C: EncodeClient, T: FileTransport> {
    client: C,
    transport: T,
}

impl<C: EncodeClient, T: FileTransport> App<C, T> {
    pub fn new(client: C, transport: T) -> Self {
        Self { client, transport }
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn experiment(&self, query: &ExperimentQuery) -> Result<Value, EncodeError> {
        client::experiment(&self.client, query)
    }

    pub fn accessions(&self, query: &ExperimentQuery) -> Result<Vec<String>, EncodeError> {
        let envelope = self.experiment(query)?;
        extract_accessions(&envelope)
    }

    pub fn biosample(&self, accession: &str) -> Result<Value, EncodeError> {
        client::biosample(&self.client, accession)
    }

    pub fn biosample_table(&self, accession: &str) -> Result<ResultTable, EncodeError> {
        Ok(to_table(self.biosample(accession)?))
    }

    pub fn download_urls(&self, accession: &str) -> Result<Vec<String>, EncodeError> {
        Ok(extract_download_urls(&self.biosample(accession)?))
    }

    pub fn fetch_batch<S: AsRef<str> + Sync>(
        &self,
        accessions: &[S],
        options: &BatchOptions,
    ) -> Result<ResultTable, EncodeError> {
        batch::fetch_batch(&self.client, accessions, options)
    }

    pub fn fetch_batch_detailed<S: AsRef<str> + Sync>(
        &self,
        accessions: &[S],
        options: &BatchOptions,
    ) -> Result<BatchOutcome, EncodeError> {
        batch::fetch_batch_detailed(&self.client, accessions, options)
    }

    pub fn download(
        &self,
        url: &str,
        options: &DownloadOptions,
        sink: &dyn ProgressSink,
        cancel: &CancelToken,
    ) -> Result<DownloadOutcome, EncodeError> {
        download::download(&self.transport, url, options, sink, cancel)
    }

    /// Downloads every cloud file of one experiment into `directory`, stopping at the first error.
    pub fn download_sample(
        &self,
        accession: &str,
        directory: &Path,
        options: &DownloadOptions,
        sink: &dyn ProgressSink,
        cancel: &CancelToken,
    ) -> Result<Vec<DownloadOutcome>, EncodeError> {
        let urls = self.download_urls(accession)?;
        info!(accession, files = urls.len(), "download.sample");
        let mut outcomes = Vec::with_capacity(urls.len());
        for url in urls {
            let name = download::resolve_path(&url, None)?;
            let file_options = DownloadOptions {
                path: Some(directory.join(name)),
                ..options.clone()
            };
            outcomes.push(self.download(&url, &file_options, sink, cancel)?);
        }
        Ok(outcomes)
    }
}
