//! Streaming transfer - copies the remote body into the destination file
//!
//! One `Transfer` runs one GET request. It resumes with an open-ended range
//! header when a start byte is given, appends to the destination, and checks
//! the job's pause/stop flags between chunks.

use super::job::JobShared;
use super::probe::is_not_found;
use super::rate_limiter::{RateLimiter, Throttled};
use crate::error::FetchError;
use fetchline_types::{JobEvent, CHUNK_SIZE};
use futures::TryStreamExt;
use reqwest::header::RANGE;
use reqwest::{Client, StatusCode};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio_util::io::StreamReader;
use tracing::{debug, info, warn};

/// How a transfer that did not fail came to an end
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TransferOutcome {
    Completed,
    Paused,
    Stopped,
}

pub(crate) struct Transfer {
    shared: Arc<JobShared>,
    client: Client,
    url: String,
    path: PathBuf,
    start_byte: u64,
    total: u64,
    timeout: Duration,
}

impl Transfer {
    pub(crate) fn new(
        shared: Arc<JobShared>,
        client: Client,
        url: String,
        path: PathBuf,
        start_byte: u64,
        total: u64,
        timeout: Duration,
    ) -> Self {
        Self {
            shared,
            client,
            url,
            path,
            start_byte,
            total,
            timeout,
        }
    }

    pub(crate) async fn run(mut self) -> Result<TransferOutcome, FetchError> {
        let mut request = self.client.get(&self.url);
        if self.start_byte > 0 {
            let range = format!("bytes={}-", self.start_byte);
            debug!("Requesting range: {}", range);
            request = request.header(RANGE, range);
        }

        let response = tokio::time::timeout(self.timeout, request.send())
            .await
            .map_err(|_| FetchError::Timeout)??;

        let status = response.status();
        if is_not_found(status) {
            return Err(FetchError::NotFound(self.url.clone()));
        }
        if !status.is_success() {
            return Err(FetchError::Server {
                status: status.as_u16(),
            });
        }

        if self.start_byte > 0 && status != StatusCode::PARTIAL_CONTENT {
            warn!(
                "Server ignored range request for {}, restarting from byte 0",
                self.url
            );
            self.start_byte = 0;
            self.shared.downloaded.store(0, Ordering::Release);
        }

        let mut file = open_destination(&self.path, self.start_byte).await?;

        let stream = Box::pin(response.bytes_stream().map_err(io::Error::other));
        let limiter = RateLimiter::new(self.shared.max_speed.load(Ordering::Acquire));
        let mut reader =
            Throttled::new(StreamReader::new(stream), limiter).with_read_timeout(self.timeout);

        let mut buf = vec![0u8; CHUNK_SIZE];
        let mut written = self.start_byte;

        let outcome = loop {
            // A changed cap takes effect from this chunk on
            reader
                .limiter()
                .set_limit(self.shared.max_speed.load(Ordering::Acquire));

            let n = match reader.read_chunk(&mut buf).await {
                Ok(n) => n,
                Err(e) => {
                    // The retry sizes the resume offset from the file on disk
                    if let Err(flush_err) = file.flush().await {
                        warn!("Failed to flush {:?}: {}", self.path, flush_err);
                    }
                    return Err(map_read_error(e));
                }
            };
            if n == 0 {
                break TransferOutcome::Completed;
            }

            if let Some(outcome) = self.shared.interrupt() {
                break outcome;
            }

            let remaining = self.total - written;
            let n = if n as u64 > remaining {
                warn!("Server sent more than {} bytes, discarding the rest", self.total);
                remaining as usize
            } else {
                n
            };

            file.write_all(&buf[..n]).await?;
            written += n as u64;
            self.shared.downloaded.fetch_add(n as u64, Ordering::AcqRel);
            self.shared.events.emit(JobEvent::BytesWritten {
                id: self.shared.id,
                delta: n as u64,
            });

            if written == self.total {
                break TransferOutcome::Completed;
            }
        };

        file.flush().await?;

        if outcome == TransferOutcome::Completed {
            file.sync_all().await?;
            if written < self.total {
                return Err(FetchError::Transfer(format!(
                    "stream ended at byte {} of {}",
                    written, self.total
                )));
            }
            info!("Transfer of {} complete ({} bytes)", self.url, written);
        } else {
            info!("Transfer of {} interrupted at byte {}", self.url, written);
        }

        Ok(outcome)
    }
}

/// Open the destination for writing at `start_byte`: append to an existing
/// prefix, or start a fresh file when transferring from zero
async fn open_destination(path: &Path, start_byte: u64) -> Result<File, FetchError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }

    let mut options = OpenOptions::new();
    options.create(true);
    if start_byte > 0 {
        options.append(true);
    } else {
        options.write(true).truncate(true);
    }
    Ok(options.open(path).await?)
}

fn map_read_error(error: io::Error) -> FetchError {
    if error.kind() == io::ErrorKind::TimedOut {
        FetchError::Timeout
    } else {
        FetchError::Io(error)
    }
}
