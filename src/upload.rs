// Resumable upload driver: walks the file chunk by chunk over a
// `ResumableTransport`, reports progress, and retries transient failures
// with exponential backoff, resuming from the offset the server committed.

use crate::api::{ChunkOutcome, ResumableTransport, VideoMetadata, VideoResource};
use crate::error::{AuthError, UploadError};
use rand::Rng;
use std::io::{Read, Seek, SeekFrom};
use std::time::Duration;

#[cfg(test)]
use mockall::automock;

/// Bounded exponential backoff for transient errors.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn with_max_retries(max_retries: u32) -> Self {
        RetryPolicy {
            max_retries,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(32),
        }
    }

    /// Delay before retry number `attempt` (1-based), with up to 1s of jitter.
    pub fn delay(&self, attempt: u32) -> Duration {
        if self.base_delay.is_zero() {
            return Duration::ZERO;
        }
        let factor = 1u32 << attempt.saturating_sub(1).min(16);
        let backoff = self.base_delay.saturating_mul(factor).min(self.max_delay);
        let jitter = Duration::from_millis(rand::thread_rng().gen_range(0..1000));
        backoff + jitter
    }
}

/// Snapshot passed to the progress callback after every acknowledged chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadProgress {
    pub bytes_sent: u64,
    pub total_bytes: u64,
}

impl UploadProgress {
    /// Whole percent, rounded down.
    pub fn percent(&self) -> u8 {
        if self.total_bytes == 0 {
            return 100;
        }
        (self.bytes_sent.min(self.total_bytes) * 100 / self.total_bytes) as u8
    }
}

/// State of the single in-flight upload.
#[derive(Debug)]
struct UploadSession {
    uri: String,
    offset: u64,
    total_bytes: u64,
}

/// Source of a new access token once the server rejects the current one.
#[cfg_attr(test, automock)]
pub trait TokenRefresh {
    fn refresh_access_token(&self) -> Result<String, AuthError>;
}

pub struct ResumableUpload<'a, T: ResumableTransport + ?Sized> {
    transport: &'a T,
    chunk_size: usize,
    retry: RetryPolicy,
    tokens: Option<&'a dyn TokenRefresh>,
}

impl<'a, T: ResumableTransport + ?Sized> ResumableUpload<'a, T> {
    pub fn new(transport: &'a T, chunk_size: usize, retry: RetryPolicy) -> Self {
        ResumableUpload {
            transport,
            chunk_size: chunk_size.max(1),
            retry,
            tokens: None,
        }
    }

    /// Renew the bearer through `tokens` when a chunk comes back 401.
    /// Without it a 401 is fatal like any other client error.
    pub fn with_token_refresh(mut self, tokens: &'a dyn TokenRefresh) -> Self {
        self.tokens = Some(tokens);
        self
    }

    /// Upload `media` (exactly `total_bytes` long) and return the video id.
    pub fn run<R, F>(
        &self,
        media: &mut R,
        total_bytes: u64,
        metadata: &VideoMetadata,
        content_type: &str,
        mut on_progress: F,
    ) -> Result<String, UploadError>
    where
        R: Read + Seek,
        F: FnMut(UploadProgress),
    {
        let uri = self.with_retry(|| self.transport.start_session(metadata, total_bytes, content_type))?;
        let mut session = UploadSession {
            uri,
            offset: 0,
            total_bytes,
        };

        // Both reset whenever the committed offset moves forward.
        let mut attempts = 0;
        let mut renewed = false;
        loop {
            let chunk = read_chunk(media, session.offset, self.chunk_size)?;
            let sent = self.transport.send_chunk(&session.uri, chunk, session.offset, total_bytes);
            let outcome = match sent {
                Ok(outcome) => {
                    if let ChunkOutcome::Incomplete { committed } = &outcome {
                        if *committed <= session.offset {
                            let stalled = UploadError::NoProgress {
                                offset: session.offset,
                            };
                            self.back_off(&mut attempts, stalled, session.offset)?;
                        }
                    }
                    outcome
                }
                Err(e) if e.is_unauthorized() && !renewed && self.tokens.is_some() => {
                    renewed = true;
                    self.renew_token(&session)?;
                    match self.resume_point(&session)? {
                        Some(outcome) => outcome,
                        None => continue,
                    }
                }
                Err(e) if e.is_transient() => {
                    self.back_off(&mut attempts, e, session.offset)?;
                    match self.resume_point(&session)? {
                        Some(outcome) => outcome,
                        None => continue,
                    }
                }
                Err(e) => return Err(e),
            };

            match outcome {
                ChunkOutcome::Complete(resource) => return finished_id(resource),
                ChunkOutcome::Incomplete { committed } => {
                    let committed = committed.min(session.total_bytes);
                    if committed > session.offset {
                        attempts = 0;
                        renewed = false;
                    }
                    session.offset = committed;
                    on_progress(UploadProgress {
                        bytes_sent: session.offset,
                        total_bytes: session.total_bytes,
                    });
                }
            }
        }
    }

    /// Spend one retry on `err` and sleep, or give up once the budget is gone.
    fn back_off(&self, attempts: &mut u32, err: UploadError, offset: u64) -> Result<(), UploadError> {
        if *attempts >= self.retry.max_retries {
            return Err(UploadError::RetriesExhausted {
                attempts: *attempts,
                last: Box::new(err),
            });
        }
        *attempts += 1;
        let delay = self.retry.delay(*attempts);
        log::warn!(
            "chunk at offset {offset} failed ({err}); retry {}/{} in {delay:?}",
            *attempts,
            self.retry.max_retries
        );
        std::thread::sleep(delay);
        Ok(())
    }

    fn renew_token(&self, session: &UploadSession) -> Result<(), UploadError> {
        let Some(tokens) = self.tokens else {
            return Ok(());
        };
        log::warn!("access token rejected at offset {}; refreshing it", session.offset);
        let token = tokens.refresh_access_token()?;
        self.transport.set_access_token(&token);
        Ok(())
    }

    /// Where the server wants the next chunk to start. `None` when the
    /// status query itself failed transiently; the caller resends from the
    /// offset it already has.
    fn resume_point(&self, session: &UploadSession) -> Result<Option<ChunkOutcome>, UploadError> {
        match self.transport.query_offset(&session.uri, session.total_bytes) {
            Ok(outcome) => Ok(Some(outcome)),
            Err(e) if e.is_transient() => {
                log::warn!("status query failed ({e}); resending from offset {}", session.offset);
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    fn with_retry<V>(&self, mut op: impl FnMut() -> Result<V, UploadError>) -> Result<V, UploadError> {
        let mut attempts = 0;
        loop {
            match op() {
                Ok(v) => return Ok(v),
                Err(e) if e.is_transient() && attempts < self.retry.max_retries => {
                    attempts += 1;
                    let delay = self.retry.delay(attempts);
                    log::warn!("request failed ({e}); retry {attempts}/{} in {delay:?}", self.retry.max_retries);
                    std::thread::sleep(delay);
                }
                Err(e) if e.is_transient() => {
                    return Err(UploadError::RetriesExhausted {
                        attempts,
                        last: Box::new(e),
                    })
                }
                Err(e) => return Err(e),
            }
        }
    }
}

fn finished_id(resource: VideoResource) -> Result<String, UploadError> {
    log::debug!("finished resource: {resource:?}");
    match resource.id {
        Some(id) if !id.is_empty() => Ok(id),
        _ => Err(UploadError::MissingVideoId),
    }
}

/// Read up to `max` bytes starting at `offset`. Short only at end of file.
fn read_chunk<R: Read + Seek>(media: &mut R, offset: u64, max: usize) -> std::io::Result<Vec<u8>> {
    media.seek(SeekFrom::Start(offset))?;
    let mut buf = Vec::with_capacity(max);
    (&mut *media).take(max as u64).read_to_end(&mut buf)?;
    Ok(buf)
}
