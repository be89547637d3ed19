// Runtime configuration. Every knob has a default and can be overridden
// through an environment variable, read once at startup.

use crate::upload::RetryPolicy;
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const CLIENT_SECRETS_FILE: &str = "client_secret.json";
pub const TOKEN_FILE: &str = "token.json";
pub const DEFAULT_UPLOAD_URL: &str = "https://www.googleapis.com/upload/youtube/v3/videos";

/// Resumable chunks must be a multiple of this many bytes (except the last).
pub const CHUNK_GRANULARITY: usize = 256 * 1024;
const DEFAULT_CHUNK_SIZE: usize = 32 * CHUNK_GRANULARITY;
const DEFAULT_MAX_RETRIES: u32 = 5;
const DEFAULT_TIMEOUT_SECS: u64 = 300;

#[derive(Debug, Clone)]
pub struct UploaderConfig {
    pub client_secret_path: PathBuf,
    pub token_path: PathBuf,
    pub upload_url: String,
    pub chunk_size: usize,
    pub request_timeout: Duration,
    pub retry: RetryPolicy,
}

impl Default for UploaderConfig {
    fn default() -> Self {
        UploaderConfig {
            client_secret_path: PathBuf::from(CLIENT_SECRETS_FILE),
            token_path: PathBuf::from(TOKEN_FILE),
            upload_url: DEFAULT_UPLOAD_URL.to_string(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            request_timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            retry: RetryPolicy::with_max_retries(DEFAULT_MAX_RETRIES),
        }
    }
}

impl UploaderConfig {
    /// Build the configuration from `VIDEO_UPLOADER_*` environment
    /// variables, falling back to the defaults above.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = UploaderConfig::default();

        config.client_secret_path = match lookup("VIDEO_UPLOADER_CLIENT_SECRET") {
            Some(path) => PathBuf::from(path),
            None => locate_client_secret(Path::new(CLIENT_SECRETS_FILE)),
        };
        if let Some(path) = lookup("VIDEO_UPLOADER_TOKEN_FILE") {
            config.token_path = PathBuf::from(path);
        }
        if let Some(url) = lookup("VIDEO_UPLOADER_API_URL") {
            config.upload_url = url;
        }
        if let Some(raw) = lookup("VIDEO_UPLOADER_CHUNK_SIZE") {
            let size: usize = raw
                .trim()
                .parse()
                .with_context(|| format!("VIDEO_UPLOADER_CHUNK_SIZE={raw:?} is not a byte count"))?;
            config.chunk_size = round_chunk_size(size);
        }
        if let Some(raw) = lookup("VIDEO_UPLOADER_MAX_RETRIES") {
            let retries: u32 = raw
                .trim()
                .parse()
                .with_context(|| format!("VIDEO_UPLOADER_MAX_RETRIES={raw:?} is not a number"))?;
            config.retry = RetryPolicy::with_max_retries(retries);
        }
        if let Some(raw) = lookup("VIDEO_UPLOADER_TIMEOUT_SECS") {
            let secs: u64 = raw
                .trim()
                .parse()
                .with_context(|| format!("VIDEO_UPLOADER_TIMEOUT_SECS={raw:?} is not a number"))?;
            config.request_timeout = Duration::from_secs(secs);
        }
        Ok(config)
    }
}

/// Prefer the file in the working directory; otherwise try the per-user
/// config directory. Returns the working-directory path when neither
/// exists so the "missing file" diagnostic names the expected location.
fn locate_client_secret(default: &Path) -> PathBuf {
    if default.exists() {
        return default.to_path_buf();
    }
    dirs::config_dir()
        .map(|dir| dir.join("video-uploader").join(CLIENT_SECRETS_FILE))
        .filter(|p| p.exists())
        .unwrap_or_else(|| default.to_path_buf())
}

fn round_chunk_size(size: usize) -> usize {
    let chunks = size.div_ceil(CHUNK_GRANULARITY).max(1);
    chunks * CHUNK_GRANULARITY
}
