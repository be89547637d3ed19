// One run of the uploader: validate input, get credentials, upload, report.

use crate::api::{guess_content_type, ApiClient};
use crate::cli::{Cli, UploadRequest};
use crate::config::UploaderConfig;
use crate::credentials::CredentialStore;
use crate::error::{AppError, UploadError};
use crate::oauth::{obtain_credentials, AuthProvider, ConsentMode, CredentialRenewal, GoogleAuthProvider};
use crate::ui::{self, UploadReporter};
use crate::upload::ResumableUpload;
use std::fs::File;

/// Run the whole flow and return the new video's identifier.
pub fn run(cli: &Cli) -> Result<String, AppError> {
    let config = UploaderConfig::from_env()?;
    let mode = if cli.console_auth {
        ConsentMode::Console
    } else {
        ConsentMode::LocalServer
    };
    let provider = GoogleAuthProvider::new(mode, !cli.no_browser);
    run_with(cli, &config, &provider)
}

/// Same as [`run`] with the configuration and auth provider supplied.
pub fn run_with<P: AuthProvider + ?Sized>(
    cli: &Cli,
    config: &UploaderConfig,
    provider: &P,
) -> Result<String, AppError> {
    check_video(cli)?;
    let request = UploadRequest::from_cli(cli);

    let store = CredentialStore::new(&config.token_path);
    let creds = obtain_credentials(&store, &config.client_secret_path, provider)?;

    let api = ApiClient::new(&config.upload_url, &creds, config.request_timeout)?;
    let mut file = File::open(&request.file_path).map_err(UploadError::Io)?;
    let total_bytes = file
        .metadata()
        .map_err(UploadError::Io)?
        .len();
    let content_type = guess_content_type(&request.file_path);
    log::info!(
        "uploading {} ({total_bytes} bytes, {content_type}) as {:?}",
        request.file_path.display(),
        request.title
    );

    // A token that expires mid-upload is refreshed and saved again.
    let renewal = CredentialRenewal::new(provider, &store, creds);
    let mut reporter = UploadReporter::start(total_bytes);
    let result = ResumableUpload::new(&api, config.chunk_size, config.retry.clone())
        .with_token_refresh(&renewal)
        .run(
            &mut file,
            total_bytes,
            &request.metadata(),
            &content_type,
            |progress| reporter.update(progress),
        );
    reporter.finish();

    let video_id = result?;
    ui::report_success(&video_id);
    Ok(video_id)
}

/// The video must exist before any credential or network work happens.
fn check_video(cli: &Cli) -> Result<(), AppError> {
    if cli.video.is_file() {
        Ok(())
    } else {
        Err(AppError::FileNotFound(cli.video.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AuthError;
    use crate::oauth::MockAuthProvider;
    use clap::Parser;

    fn config_in(dir: &std::path::Path) -> UploaderConfig {
        UploaderConfig {
            client_secret_path: dir.join("client_secret.json"),
            token_path: dir.join("token.json"),
            // Nothing listens here; reaching the network would fail loudly.
            upload_url: "http://127.0.0.1:9/upload".into(),
            ..UploaderConfig::default()
        }
    }

    #[test]
    fn missing_video_touches_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let video = dir.path().join("missing.mp4");
        let cli = Cli::parse_from(["video-uploader", video.to_str().unwrap()]);
        let mut provider = MockAuthProvider::new();
        provider.expect_refresh().never();
        provider.expect_authorize().never();

        let err = run_with(&cli, &config_in(dir.path()), &provider).unwrap_err();
        assert!(matches!(err, AppError::FileNotFound(p) if p == video));
        assert!(!dir.path().join("token.json").exists());
    }

    #[test]
    fn directory_is_not_a_video() {
        let dir = tempfile::tempdir().unwrap();
        let cli = Cli::parse_from(["video-uploader", dir.path().to_str().unwrap()]);
        let provider = MockAuthProvider::new();
        let err = run_with(&cli, &config_in(dir.path()), &provider).unwrap_err();
        assert!(matches!(err, AppError::FileNotFound(_)));
    }

    #[test]
    fn missing_client_secret_stops_before_upload() {
        let dir = tempfile::tempdir().unwrap();
        let video = dir.path().join("demo.mp4");
        std::fs::write(&video, b"not really a video").unwrap();
        let cli = Cli::parse_from(["video-uploader", video.to_str().unwrap()]);
        let mut provider = MockAuthProvider::new();
        provider.expect_authorize().never();

        let err = run_with(&cli, &config_in(dir.path()), &provider).unwrap_err();
        assert!(matches!(err, AppError::Auth(AuthError::MissingClientSecret(_))));
    }
}
