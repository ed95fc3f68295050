use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, bounded};
use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use serde::Serialize;
use tracing::{info, warn};

use crate::app::{ProgressEvent, ProgressSink};
use crate::error::EncodeError;

pub const DEFAULT_BLOCK_SIZE: usize = 32 * 1024;

/// Longest a stalled body read can delay noticing a cancellation.
pub const CANCEL_POLL_INTERVAL: Duration = Duration::from_millis(100);

const READ_AHEAD_BLOCKS: usize = 4;

/// An opened remote body. The status is reported as-is; the downloader
/// decides what a non-success status means.
pub struct RemoteFile {
    pub status: u16,
    pub content_length: Option<u64>,
    pub body: Box<dyn Read + Send>,
}

pub trait FileTransport: Send + Sync {
    fn open(&self, url: &str) -> Result<RemoteFile, EncodeError>;
}

#[derive(Clone)]
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    pub fn new() -> Result<Self, EncodeError> {
        Self::with_user_agent(&format!("encode-query/{}", env!("CARGO_PKG_VERSION")))
    }

    pub fn with_user_agent(user_agent: &str) -> Result<Self, EncodeError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(user_agent)
                .map_err(|err| EncodeError::InvalidArgument(err.to_string()))?,
        );
        // Large files: bound the connect phase only.
        let client = Client::builder()
            .default_headers(headers)
            .connect_timeout(Duration::from_secs(30))
            .timeout(None::<Duration>)
            .build()
            .map_err(|err| EncodeError::Http(err.to_string()))?;
        Ok(Self { client })
    }
}

impl FileTransport for HttpTransport {
    fn open(&self, url: &str) -> Result<RemoteFile, EncodeError> {
        let response = self
            .client
            .get(url)
            .send()
            .map_err(|err| EncodeError::Http(err.to_string()))?;
        Ok(RemoteFile {
            status: response.status().as_u16(),
            content_length: response.content_length(),
            body: Box::new(response),
        })
    }
}

/// Shared flag a caller sets to interrupt an in-flight download.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone)]
pub struct DownloadOptions {
    pub path: Option<PathBuf>,
    pub block_size: usize,
    /// Skip the download when the target already exists.
    pub cache: bool,
    pub append: bool,
}

impl Default for DownloadOptions {
    fn default() -> Self {
        Self {
            path: None,
            block_size: DEFAULT_BLOCK_SIZE,
            cache: false,
            append: false,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DownloadOutcome {
    pub url: String,
    pub path: PathBuf,
    pub bytes: u64,
    pub skipped: bool,
    pub downloaded_at: Option<String>,
}

/// Target path for `url`: the explicit path, else the URL's last path segment.
pub fn resolve_path(url: &str, path: Option<&Path>) -> Result<PathBuf, EncodeError> {
    if let Some(path) = path {
        return Ok(path.to_path_buf());
    }
    let without_query = url.split(['?', '#']).next().unwrap_or(url);
    without_query
        .rsplit('/')
        .next()
        .filter(|segment| !segment.is_empty())
        .map(PathBuf::from)
        .ok_or_else(|| {
            EncodeError::InvalidArgument(format!("cannot derive a file name from {url}"))
        })
}

pub fn download<T: FileTransport + ?Sized>(
    transport: &T,
    url: &str,
    options: &DownloadOptions,
    sink: &dyn ProgressSink,
    cancel: &CancelToken,
) -> Result<DownloadOutcome, EncodeError> {
    if options.block_size == 0 {
        return Err(EncodeError::InvalidArgument(
            "block size must be positive".to_string(),
        ));
    }
    let path = resolve_path(url, options.path.as_deref())?;

    if options.cache && path.exists() {
        info!(%url, path = %path.display(), "download.cached");
        sink.event(ProgressEvent::phase(format!(
            "phase=Store; {} already present",
            path.display()
        )));
        return Ok(DownloadOutcome {
            url: url.to_string(),
            path,
            bytes: 0,
            skipped: true,
            downloaded_at: None,
        });
    }

    sink.event(ProgressEvent::phase(format!("phase=Prepare; {url}")));
    let remote = transport.open(url)?;

    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|err| EncodeError::Filesystem(err.to_string()))?;
    }
    let file = OpenOptions::new()
        .create(true)
        .write(true)
        .append(options.append)
        .truncate(!options.append)
        .open(&path)
        .map_err(|err| {
            EncodeError::Filesystem(format!("open {}: {err}", path.display()))
        })?;

    let start = Instant::now();
    let received = match stream_body(
        remote.body,
        file,
        url,
        options.block_size,
        remote.content_length,
        sink,
        cancel,
    ) {
        Ok(received) => received,
        Err(err) => {
            remove_partial(&path);
            return Err(err);
        }
    };

    if !(200..300).contains(&remote.status) {
        remove_partial(&path);
        return Err(EncodeError::DownloadFailed {
            url: url.to_string(),
            status: remote.status,
        });
    }
    if let Some(expected) = remote.content_length.filter(|length| *length != 0) {
        if expected != received {
            remove_partial(&path);
            return Err(EncodeError::SizeMismatch {
                url: url.to_string(),
                expected,
                received,
            });
        }
    }

    info!(
        %url,
        path = %path.display(),
        bytes = received,
        elapsed_ms = start.elapsed().as_millis() as u64,
        "download.done"
    );
    Ok(DownloadOutcome {
        url: url.to_string(),
        path,
        bytes: received,
        skipped: false,
        downloaded_at: Some(chrono::Utc::now().to_rfc3339()),
    })
}

enum Chunk {
    Data(Vec<u8>),
    Done,
    Failed(io::Error),
}

// Body reads run on their own thread so a stalled connection cannot keep the
// writer from seeing the cancel token. The reader exits once the receiver is
// dropped and its pending read returns.
fn spawn_reader(
    mut body: Box<dyn Read + Send>,
    block_size: usize,
) -> Result<Receiver<Chunk>, EncodeError> {
    let (tx, rx) = bounded(READ_AHEAD_BLOCKS);
    thread::Builder::new()
        .name("encode-download-reader".to_string())
        .spawn(move || {
            let mut buffer = vec![0u8; block_size];
            loop {
                let chunk = match body.read(&mut buffer) {
                    Ok(0) => Chunk::Done,
                    Ok(read) => Chunk::Data(buffer[..read].to_vec()),
                    Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                    Err(err) => Chunk::Failed(err),
                };
                let last = !matches!(chunk, Chunk::Data(_));
                if tx.send(chunk).is_err() || last {
                    break;
                }
            }
        })
        .map_err(|err| EncodeError::Http(format!("start body reader: {err}")))?;
    Ok(rx)
}

fn stream_body(
    body: Box<dyn Read + Send>,
    mut file: File,
    url: &str,
    block_size: usize,
    total: Option<u64>,
    sink: &dyn ProgressSink,
    cancel: &CancelToken,
) -> Result<u64, EncodeError> {
    let start = Instant::now();
    let chunks = spawn_reader(body, block_size)?;
    let mut received = 0u64;
    loop {
        if cancel.is_cancelled() {
            return Err(EncodeError::Cancelled(url.to_string()));
        }
        let bytes = match chunks.recv_timeout(CANCEL_POLL_INTERVAL) {
            Ok(Chunk::Data(bytes)) => bytes,
            Ok(Chunk::Done) => break,
            Ok(Chunk::Failed(err)) => return Err(EncodeError::Http(err.to_string())),
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => {
                return Err(EncodeError::Http(format!("body reader for {url} stopped")));
            }
        };
        file.write_all(&bytes)
            .map_err(|err| EncodeError::Filesystem(err.to_string()))?;
        received += bytes.len() as u64;
        sink.event(ProgressEvent {
            message: "download.progress".to_string(),
            elapsed: Some(start.elapsed()),
            bytes: Some(received),
            total,
        });
    }
    file.flush()
        .map_err(|err| EncodeError::Filesystem(err.to_string()))?;
    Ok(received)
}

fn remove_partial(path: &Path) {
    if let Err(err) = fs::remove_file(path) {
        if err.kind() != io::ErrorKind::NotFound {
            warn!(path = %path.display(), error = %err, "download.cleanup_failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_from_last_segment() {
        let path = resolve_path(
            "https://encode-public.s3.amazonaws.com/2020/ENCFF001ABC.bam?x=1",
            None,
        )
        .unwrap();
        assert_eq!(path, PathBuf::from("ENCFF001ABC.bam"));
    }

    #[test]
    fn explicit_path_wins() {
        let path = resolve_path("https://a/b.bam", Some(Path::new("out/c.bam"))).unwrap();
        assert_eq!(path, PathBuf::from("out/c.bam"));
    }

    #[test]
    fn trailing_slash_has_no_name() {
        assert!(resolve_path("https://a/b/", None).is_err());
    }
}
