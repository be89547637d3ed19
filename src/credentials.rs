// OAuth token bundle and its on-disk store.
//
// The token file uses the "authorized user" JSON layout understood by the
// Google client libraries, so an existing token.json from other tooling can
// be reused and vice versa.

use crate::error::AuthError;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// Tokens are treated as expired this long before their actual expiry.
const EXPIRY_SKEW_SECS: i64 = 60;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Credentials {
    pub token: String,
    /// Written as `null` when absent; Google's loaders require the key.
    #[serde(default)]
    pub refresh_token: Option<String>,
    pub token_uri: String,
    pub client_id: String,
    pub client_secret: String,
    #[serde(default)]
    pub scopes: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiry: Option<DateTime<Utc>>,
}

impl Credentials {
    /// A token with no recorded expiry never counts as expired.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        match self.expiry {
            Some(expiry) => now >= expiry - Duration::seconds(EXPIRY_SKEW_SECS),
            None => false,
        }
    }

    pub fn is_valid(&self, now: DateTime<Utc>) -> bool {
        !self.token.is_empty() && !self.is_expired(now)
    }

    pub fn can_refresh(&self) -> bool {
        self.refresh_token.as_deref().is_some_and(|t| !t.is_empty())
    }

    /// Files written without a scope list are assumed to cover what was asked for.
    pub fn grants(&self, scope: &str) -> bool {
        self.scopes.is_empty() || self.scopes.iter().any(|s| s == scope)
    }
}

/// Reads and writes the persisted credentials.
#[derive(Debug, Clone)]
pub struct CredentialStore {
    path: PathBuf,
}

impl CredentialStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        CredentialStore { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// `None` when there is no token file or it cannot be understood; both
    /// cases send the caller through a fresh authorization.
    pub fn load(&self) -> Option<Credentials> {
        let data = match std::fs::read_to_string(&self.path) {
            Ok(data) => data,
            Err(e) if e.kind() == ErrorKind::NotFound => return None,
            Err(e) => {
                log::warn!("cannot read {}: {}", self.path.display(), e);
                return None;
            }
        };
        match serde_json::from_str(&data) {
            Ok(creds) => Some(creds),
            Err(e) => {
                log::warn!("ignoring unreadable token file {}: {}", self.path.display(), e);
                None
            }
        }
    }

    /// Overwrite the token file with `creds`.
    pub fn save(&self, creds: &Credentials) -> Result<(), AuthError> {
        let to_store_err = |source| AuthError::TokenStore {
            path: self.path.clone(),
            source,
        };
        let json = serde_json::to_string_pretty(creds)
            .map_err(|e| to_store_err(std::io::Error::new(ErrorKind::InvalidData, e)))?;
        std::fs::write(&self.path, json).map_err(to_store_err)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&self.path, std::fs::Permissions::from_mode(0o600))
                .map_err(to_store_err)?;
        }
        log::info!("saved credentials to {}", self.path.display());
        Ok(())
    }
}

#[cfg(test)]
pub(crate) fn sample_credentials(expiry: Option<DateTime<Utc>>, refresh: Option<&str>) -> Credentials {
    Credentials {
        token: "ya29.access".into(),
        refresh_token: refresh.map(String::from),
        token_uri: "https://oauth2.googleapis.com/token".into(),
        client_id: "client-id".into(),
        client_secret: "client-secret".into(),
        scopes: vec![crate::oauth::UPLOAD_SCOPE.into()],
        expiry,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expiry_honours_skew() {
        let now = Utc::now();
        let creds = sample_credentials(Some(now + Duration::seconds(30)), None);
        assert!(creds.is_expired(now));
        let creds = sample_credentials(Some(now + Duration::hours(1)), None);
        assert!(!creds.is_expired(now));
        assert!(creds.is_valid(now));
    }

    #[test]
    fn missing_expiry_is_not_expired() {
        let creds = sample_credentials(None, None);
        assert!(creds.is_valid(Utc::now()));
    }

    #[test]
    fn empty_refresh_token_cannot_refresh() {
        assert!(!sample_credentials(None, Some("")).can_refresh());
        assert!(sample_credentials(None, Some("1//refresh")).can_refresh());
    }

    #[test]
    fn save_then_load_preserves_bundle() {
        let dir = tempfile::tempdir().unwrap();
        let store = CredentialStore::new(dir.path().join("token.json"));
        let creds = sample_credentials(Some(Utc::now()), Some("1//refresh"));
        store.save(&creds).unwrap();
        assert_eq!(store.load(), Some(creds));
    }

    #[test]
    fn refresh_token_key_is_always_written() {
        let dir = tempfile::tempdir().unwrap();
        let store = CredentialStore::new(dir.path().join("token.json"));
        store.save(&sample_credentials(None, None)).unwrap();
        let saved: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(store.path()).unwrap()).unwrap();
        let fields = saved.as_object().unwrap();
        assert!(fields.contains_key("refresh_token"));
        assert!(fields["refresh_token"].is_null());
        for key in ["token", "token_uri", "client_id", "client_secret", "scopes"] {
            assert!(fields.contains_key(key), "{key} missing");
        }
        assert_eq!(store.load().unwrap().refresh_token, None);
    }

    #[test]
    fn missing_or_garbled_file_loads_as_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = CredentialStore::new(dir.path().join("token.json"));
        assert_eq!(store.load(), None);
        std::fs::write(store.path(), "{not json").unwrap();
        assert_eq!(store.load(), None);
    }

    #[test]
    fn reads_google_authorized_user_layout() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("token.json");
        std::fs::write(
            &path,
            r#"{"token": "ya29.x", "refresh_token": "1//r", "token_uri": "https://oauth2.googleapis.com/token",
                "client_id": "id", "client_secret": "s",
                "scopes": ["https://www.googleapis.com/auth/youtube.upload"],
                "universe_domain": "googleapis.com", "account": "",
                "expiry": "2030-01-01T00:00:00.123456Z"}"#,
        )
        .unwrap();
        let creds = CredentialStore::new(path).load().unwrap();
        assert_eq!(creds.refresh_token.as_deref(), Some("1//r"));
        assert!(creds.grants(crate::oauth::UPLOAD_SCOPE));
        assert!(creds.expiry.is_some());
    }
}
