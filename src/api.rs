// API client module: a small blocking HTTP client for the video platform's
// resumable upload endpoint. It knows the wire format (headers, status
// codes, JSON bodies) and nothing about retries or progress, which live in
// `upload`.

use crate::cli::PrivacyStatus;
use crate::credentials::Credentials;
use crate::error::UploadError;
use reqwest::blocking::{Client, Response};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_RANGE, LOCATION, RANGE};
use reqwest::redirect::Policy;
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::path::Path;
use std::time::Duration;

#[cfg(test)]
use mockall::automock;

/// Short-link prefix for watch URLs.
pub const WATCH_URL_PREFIX: &str = "https://youtu.be/";

/// Playback URL for an uploaded video.
pub fn watch_url(video_id: &str) -> String {
    format!("{WATCH_URL_PREFIX}{video_id}")
}

/// Body of the `videos.insert` request.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct VideoMetadata {
    pub snippet: Snippet,
    pub status: VideoStatus,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct Snippet {
    pub title: String,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct VideoStatus {
    #[serde(rename = "privacyStatus")]
    pub privacy_status: PrivacyStatus,
}

/// The video resource returned once the last byte is accepted. Only the
/// identifier matters to us; the rest is kept for logging.
#[derive(Deserialize, Debug, Clone, PartialEq, Default)]
pub struct VideoResource {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub snippet: Option<serde_json::Value>,
    #[serde(default)]
    pub status: Option<serde_json::Value>,
}

/// Server reply to a chunk or a status query.
#[derive(Debug, Clone, PartialEq)]
pub enum ChunkOutcome {
    /// `308 Resume Incomplete`: the first `committed` bytes are stored.
    Incomplete { committed: u64 },
    /// The upload is finished.
    Complete(VideoResource),
}

/// The three requests that make up a resumable upload session.
#[cfg_attr(test, automock)]
pub trait ResumableTransport {
    /// Create the session; returns the session URI.
    fn start_session(
        &self,
        metadata: &VideoMetadata,
        total_bytes: u64,
        content_type: &str,
    ) -> Result<String, UploadError>;

    /// Send `chunk` as bytes `offset..offset + chunk.len()` of `total_bytes`.
    fn send_chunk(
        &self,
        session_uri: &str,
        chunk: Vec<u8>,
        offset: u64,
        total_bytes: u64,
    ) -> Result<ChunkOutcome, UploadError>;

    /// Ask how much of the file the server has committed.
    fn query_offset(&self, session_uri: &str, total_bytes: u64) -> Result<ChunkOutcome, UploadError>;

    /// Use `token` as the bearer for every later request.
    fn set_access_token(&self, token: &str);
}

/// Blocking client holding the bearer token and the upload endpoint.
pub struct ApiClient {
    client: Client,
    upload_url: String,
    token: RefCell<String>,
}

impl ApiClient {
    pub fn new(upload_url: &str, creds: &Credentials, timeout: Duration) -> Result<Self, UploadError> {
        // 308 is "Resume Incomplete" here, not a redirect to follow.
        let client = Client::builder()
            .redirect(Policy::none())
            .timeout(timeout)
            .build()?;
        Ok(ApiClient {
            client,
            upload_url: upload_url.to_string(),
            token: RefCell::new(creds.token.clone()),
        })
    }

    fn auth_headers(&self) -> Result<HeaderMap, UploadError> {
        let mut headers = HeaderMap::new();
        let val = HeaderValue::from_str(&format!("Bearer {}", self.token.borrow()))
            .map_err(|_| UploadError::InvalidResponse("access token is not a valid header value".into()))?;
        headers.insert(AUTHORIZATION, val);
        Ok(headers)
    }

    fn read_outcome(res: Response) -> Result<ChunkOutcome, UploadError> {
        let status = res.status();
        if status.as_u16() == 308 {
            let committed = match res.headers().get(RANGE) {
                Some(value) => parse_committed_range(value.to_str().unwrap_or_default())?,
                None => 0,
            };
            return Ok(ChunkOutcome::Incomplete { committed });
        }
        if status.is_success() {
            let resource: VideoResource = res
                .json()
                .map_err(|e| UploadError::InvalidResponse(format!("video resource: {e}")))?;
            return Ok(ChunkOutcome::Complete(resource));
        }
        Err(http_error(res))
    }
}

impl ResumableTransport for ApiClient {
    fn start_session(
        &self,
        metadata: &VideoMetadata,
        total_bytes: u64,
        content_type: &str,
    ) -> Result<String, UploadError> {
        let res = self
            .client
            .post(&self.upload_url)
            .query(&[("uploadType", "resumable"), ("part", "snippet,status")])
            .headers(self.auth_headers()?)
            .header("X-Upload-Content-Length", total_bytes.to_string())
            .header("X-Upload-Content-Type", content_type)
            .json(metadata)
            .send()?;
        if !res.status().is_success() {
            return Err(http_error(res));
        }
        let session_uri = res
            .headers()
            .get(LOCATION)
            .and_then(|v| v.to_str().ok())
            .ok_or(UploadError::MissingSessionUri)?
            .to_string();
        log::info!("resumable session created: {session_uri}");
        Ok(session_uri)
    }

    fn send_chunk(
        &self,
        session_uri: &str,
        chunk: Vec<u8>,
        offset: u64,
        total_bytes: u64,
    ) -> Result<ChunkOutcome, UploadError> {
        let range = content_range(offset, chunk.len() as u64, total_bytes);
        log::debug!("PUT {range}");
        let res = self
            .client
            .put(session_uri)
            .headers(self.auth_headers()?)
            .header(CONTENT_RANGE, range)
            .body(chunk)
            .send()?;
        Self::read_outcome(res)
    }

    fn query_offset(&self, session_uri: &str, total_bytes: u64) -> Result<ChunkOutcome, UploadError> {
        let res = self
            .client
            .put(session_uri)
            .headers(self.auth_headers()?)
            .header(CONTENT_RANGE, format!("bytes */{total_bytes}"))
            .body(Vec::new())
            .send()?;
        Self::read_outcome(res)
    }

    fn set_access_token(&self, token: &str) {
        self.token.replace(token.to_string());
    }
}

/// `Content-Range` for a chunk; an empty chunk only announces the total.
pub fn content_range(offset: u64, len: u64, total_bytes: u64) -> String {
    if len == 0 {
        format!("bytes */{total_bytes}")
    } else {
        format!("bytes {}-{}/{}", offset, offset + len - 1, total_bytes)
    }
}

/// Number of committed bytes from a `Range: bytes=0-N` header.
fn parse_committed_range(value: &str) -> Result<u64, UploadError> {
    let last = value
        .trim()
        .strip_prefix("bytes=")
        .and_then(|r| r.split_once('-'))
        .and_then(|(_, end)| end.trim().parse::<u64>().ok())
        .ok_or_else(|| UploadError::InvalidResponse(format!("malformed Range header {value:?}")))?;
    Ok(last + 1)
}

fn http_error(res: Response) -> UploadError {
    let status = res.status().as_u16();
    let body = res.text().unwrap_or_default();
    UploadError::Http {
        status,
        body: body.trim().to_string(),
    }
}

/// MIME type announced for the media body.
pub fn guess_content_type(path: &Path) -> String {
    mime_guess::from_path(path)
        .first_raw()
        .unwrap_or("application/octet-stream")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn watch_url_is_prefix_plus_id() {
        assert_eq!(watch_url("dQw4w9WgXcQ"), "https://youtu.be/dQw4w9WgXcQ");
    }

    #[test]
    fn content_range_formats() {
        assert_eq!(content_range(0, 10, 25), "bytes 0-9/25");
        assert_eq!(content_range(20, 5, 25), "bytes 20-24/25");
        assert_eq!(content_range(0, 0, 0), "bytes */0");
    }

    #[test]
    fn committed_range_parsing() {
        assert_eq!(parse_committed_range("bytes=0-262143").unwrap(), 262_144);
        assert!(parse_committed_range("items=1-2").is_err());
    }

    #[test]
    fn content_type_from_extension() {
        assert_eq!(guess_content_type(Path::new("demo.mp4")), "video/mp4");
        assert_eq!(guess_content_type(Path::new("demo")), "application/octet-stream");
    }

    #[test]
    fn bearer_follows_the_latest_token() {
        let creds = crate::credentials::sample_credentials(None, None);
        let api = ApiClient::new("http://127.0.0.1:9/upload", &creds, Duration::from_secs(1)).unwrap();
        assert_eq!(api.auth_headers().unwrap()[AUTHORIZATION], "Bearer ya29.access");
        api.set_access_token("ya29.fresh");
        assert_eq!(api.auth_headers().unwrap()[AUTHORIZATION], "Bearer ya29.fresh");
    }

    #[test]
    fn video_resource_tolerates_missing_id() {
        let resource: VideoResource =
            serde_json::from_str(r#"{"kind":"youtube#video","status":{"uploadStatus":"uploaded"}}"#).unwrap();
        assert_eq!(resource.id, None);
        let resource: VideoResource = serde_json::from_str(r#"{"id":"abc123"}"#).unwrap();
        assert_eq!(resource.id.as_deref(), Some("abc123"));
    }
}
