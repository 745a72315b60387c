//! Streaming downloads for binary endpoints.
//!
//! Binary endpoints sometimes answer a failed request with a JSON `FAILED`
//! envelope and HTTP 200. The downloader therefore sniffs a bounded prefix of
//! the body first: a complete, decodable `FAILED` envelope is reported as a
//! rejection and nothing reaches the sink. Anything else (including bodies that
//! fail to decode, which is what archives look like) is copied through a
//! bounded buffer.

use crate::protocol::ResponseEnvelope;
use crate::transport::TransportError;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::io::{AsyncWrite, AsyncWriteExt, BufWriter};
use tracing::{debug, info};

pub const DEFAULT_BUFFER_SIZE: usize = 64 * 1024;

/// Largest prefix inspected for a JSON envelope. Failure envelopes are tiny.
pub const DEFAULT_SNIFF_LIMIT: usize = 64 * 1024;

/// Receives bytes-transferred updates during a download.
pub trait ProgressSink: Send + Sync {
    fn on_progress(&self, transferred: u64, total: Option<u64>);

    fn on_finish(&self, _transferred: u64) {}
}

/// Default sink (no reporting).
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopProgress;

impl ProgressSink for NoopProgress {
    fn on_progress(&self, _transferred: u64, _total: Option<u64>) {}
}

impl<F> ProgressSink for F
where
    F: Fn(u64, Option<u64>) + Send + Sync,
{
    fn on_progress(&self, transferred: u64, total: Option<u64>) {
        self(transferred, total)
    }
}

/// Logs progress through `tracing` every `step` bytes.
#[derive(Debug)]
pub struct TracingProgress {
    label: String,
    step: u64,
    next_report: AtomicU64,
}

impl TracingProgress {
    pub fn new(label: impl Into<String>) -> Self {
        Self::with_step(label, 1 << 20)
    }

    pub fn with_step(label: impl Into<String>, step: u64) -> Self {
        let step = step.max(1);
        Self {
            label: label.into(),
            step,
            next_report: AtomicU64::new(step),
        }
    }
}

impl ProgressSink for TracingProgress {
    fn on_progress(&self, transferred: u64, total: Option<u64>) {
        let next = self.next_report.load(Ordering::Relaxed);
        if transferred >= next {
            self.next_report
                .store(transferred - transferred % self.step + self.step, Ordering::Relaxed);
            info!(label = self.label.as_str(), transferred, total, "download progress");
        }
    }

    fn on_finish(&self, transferred: u64) {
        info!(label = self.label.as_str(), transferred, "download finished");
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transfer {
    pub bytes: u64,
}

#[derive(Debug, thiserror::Error)]
pub enum DownloadError {
    #[error("response is a FAILED envelope: {0}")]
    Rejected(String),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("cannot write downloaded data: {0}")]
    Write(#[source] std::io::Error),
}

struct SniffedBody<S> {
    head: Vec<u8>,
    /// `None` once the whole body fit in `head`.
    rest: Option<S>,
}

/// Copies response bodies to sinks without holding them in memory.
#[derive(Debug, Clone)]
pub struct StreamingDownloader {
    buffer_size: usize,
    sniff_limit: usize,
}

impl Default for StreamingDownloader {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamingDownloader {
    pub fn new() -> Self {
        Self {
            buffer_size: DEFAULT_BUFFER_SIZE,
            sniff_limit: DEFAULT_SNIFF_LIMIT,
        }
    }

    pub fn with_buffer_size(mut self, size: usize) -> Self {
        self.buffer_size = size.max(1);
        self
    }

    pub fn with_sniff_limit(mut self, limit: usize) -> Self {
        self.sniff_limit = limit;
        self
    }

    /// Copy `body` into `sink` unless it turns out to be a `FAILED` envelope.
    pub async fn copy<S, E, W>(
        &self,
        body: S,
        total: Option<u64>,
        sink: &mut W,
        progress: &dyn ProgressSink,
    ) -> Result<Transfer, DownloadError>
    where
        S: Stream<Item = Result<Bytes, E>> + Unpin,
        E: Into<TransportError>,
        W: AsyncWrite + Unpin,
    {
        let sniffed = self.sniff(body).await?;
        self.drain(sniffed, total, sink, progress).await
    }

    /// Like [`copy`](Self::copy), into a file.
    ///
    /// Data goes to `<path>.part` first and is renamed over `path` only on
    /// success. The partial file is removed on any failure, and also when the
    /// returned future is dropped (cancellation). A rejected body never
    /// creates a file.
    pub async fn copy_to_path<S, E>(
        &self,
        body: S,
        total: Option<u64>,
        path: &Path,
        progress: &dyn ProgressSink,
    ) -> Result<Transfer, DownloadError>
    where
        S: Stream<Item = Result<Bytes, E>> + Unpin,
        E: Into<TransportError>,
    {
        let sniffed = self.sniff(body).await?;

        let mut part = PartFile::new(part_path(path));
        let mut file = tokio::fs::File::create(&part.path)
            .await
            .map_err(DownloadError::Write)?;
        let transfer = self.drain(sniffed, total, &mut file, progress).await?;
        drop(file);

        tokio::fs::rename(&part.path, path)
            .await
            .map_err(DownloadError::Write)?;
        part.persisted();
        debug!(path = %path.display(), bytes = transfer.bytes, "download saved");
        Ok(transfer)
    }

    async fn sniff<S, E>(&self, mut body: S) -> Result<SniffedBody<S>, DownloadError>
    where
        S: Stream<Item = Result<Bytes, E>> + Unpin,
        E: Into<TransportError>,
    {
        let mut head = Vec::new();
        while could_be_envelope(&head) && head.len() <= self.sniff_limit {
            match body.next().await {
                Some(chunk) => {
                    let chunk = chunk.map_err(|e| DownloadError::Transport(e.into()))?;
                    head.extend_from_slice(&chunk);
                }
                None => {
                    if let Ok(envelope) = ResponseEnvelope::decode_bytes(&head) {
                        if let Err(comment) = envelope.into_result() {
                            return Err(DownloadError::Rejected(comment));
                        }
                    }
                    return Ok(SniffedBody { head, rest: None });
                }
            }
        }
        Ok(SniffedBody {
            head,
            rest: Some(body),
        })
    }

    async fn drain<S, E, W>(
        &self,
        sniffed: SniffedBody<S>,
        total: Option<u64>,
        sink: &mut W,
        progress: &dyn ProgressSink,
    ) -> Result<Transfer, DownloadError>
    where
        S: Stream<Item = Result<Bytes, E>> + Unpin,
        E: Into<TransportError>,
        W: AsyncWrite + Unpin,
    {
        let mut writer = BufWriter::with_capacity(self.buffer_size, sink);
        let mut transferred = 0u64;

        if !sniffed.head.is_empty() {
            writer
                .write_all(&sniffed.head)
                .await
                .map_err(DownloadError::Write)?;
            transferred += sniffed.head.len() as u64;
            progress.on_progress(transferred, total);
        }

        if let Some(mut rest) = sniffed.rest {
            while let Some(chunk) = rest.next().await {
                let chunk = chunk.map_err(|e| DownloadError::Transport(e.into()))?;
                writer.write_all(&chunk).await.map_err(DownloadError::Write)?;
                transferred += chunk.len() as u64;
                progress.on_progress(transferred, total);
            }
        }

        writer.flush().await.map_err(DownloadError::Write)?;
        progress.on_finish(transferred);
        Ok(Transfer { bytes: transferred })
    }
}

fn could_be_envelope(head: &[u8]) -> bool {
    match head.iter().find(|b| !b.is_ascii_whitespace()) {
        None => true,
        Some(b) => *b == b'{',
    }
}

/// Removes the `.part` file on drop unless it was renamed into place.
struct PartFile {
    path: PathBuf,
    persisted: bool,
}

impl PartFile {
    fn new(path: PathBuf) -> Self {
        Self {
            path,
            persisted: false,
        }
    }

    fn persisted(&mut self) {
        self.persisted = true;
    }
}

impl Drop for PartFile {
    fn drop(&mut self) {
        if !self.persisted {
            let _ = std::fs::remove_file(&self.path);
        }
    }
}

fn part_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".part");
    PathBuf::from(name)
}
