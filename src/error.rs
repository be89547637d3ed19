// Error types. Each stage of the run has its own enum so `main` can print
// a specific diagnostic instead of a trace.

use std::path::PathBuf;

/// Failures while loading, refreshing or obtaining OAuth credentials.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("Missing {}. Put your OAuth client secrets JSON next to this program.", .0.display())]
    MissingClientSecret(PathBuf),
    #[error("Could not read {}: {source}", .path.display())]
    ReadClientSecret {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{} is not a valid OAuth client secrets file: {source}", .path.display())]
    InvalidClientSecret {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("Failed to refresh the access token ({0}). Delete the token file to authorize again.")]
    Refresh(String),
    #[error("Authorization failed: {0}")]
    Consent(String),
    #[error("Authorization response did not match this request (state mismatch)")]
    StateMismatch,
    #[error("Token exchange failed: {0}")]
    Exchange(String),
    #[error("Local redirect listener failed: {0}")]
    Listener(#[source] std::io::Error),
    #[error("Could not write token file {}: {source}", .path.display())]
    TokenStore {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to read authorization input: {0}")]
    Prompt(String),
    #[error("Invalid OAuth endpoint {url:?}: {source}")]
    Endpoint {
        url: String,
        #[source]
        source: url::ParseError,
    },
}

/// Failures during the resumable transfer.
#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },
    #[error("network error: {0}")]
    Network(String),
    #[error("upload session was not created: response carried no Location header")]
    MissingSessionUri,
    #[error("unexpected response: {0}")]
    InvalidResponse(String),
    #[error("failed to read video file: {0}")]
    Io(#[from] std::io::Error),
    #[error("giving up after {attempts} retries: {last}")]
    RetriesExhausted {
        attempts: u32,
        last: Box<UploadError>,
    },
    #[error("upload finished without a video identifier")]
    MissingVideoId,
    #[error("server stored nothing past byte {offset}")]
    NoProgress { offset: u64 },
    #[error("access token was rejected and could not be renewed: {0}")]
    Reauthorization(#[from] AuthError),
}

impl UploadError {
    /// Whether retrying the same request may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            UploadError::Network(_) => true,
            UploadError::Http { status, .. } => {
                matches!(status, 408 | 429 | 500 | 502 | 503 | 504)
            }
            _ => false,
        }
    }

    /// The server rejected the bearer token.
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, UploadError::Http { status: 401, .. })
    }
}

impl From<reqwest::Error> for UploadError {
    fn from(err: reqwest::Error) -> Self {
        if let Some(status) = err.status() {
            UploadError::Http {
                status: status.as_u16(),
                body: err.to_string(),
            }
        } else {
            UploadError::Network(err.to_string())
        }
    }
}

/// Top-level outcome of a run; every variant maps to exit code 1.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("File not found: {}", .0.display())]
    FileNotFound(PathBuf),
    #[error("Invalid configuration: {0:#}")]
    Config(#[from] anyhow::Error),
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error(transparent)]
    Upload(#[from] UploadError),
}
