// UI layer: everything the user sees on the terminal. Progress goes through
// an `indicatif` bar on stderr while the "Uploaded N%" lines and the final
// summary are plain stdout lines, so they survive redirection.

use crate::api::watch_url;
use crate::error::{AppError, AuthError, UploadError};
use crate::upload::UploadProgress;
use crossterm::style::Stylize;
use dialoguer::Input;
use indicatif::{ProgressBar, ProgressStyle};
use url::Url;

/// Progress display for one upload.
pub struct UploadReporter {
    bar: ProgressBar,
    last_percent: Option<u8>,
}

impl UploadReporter {
    /// Prints "Starting upload..." and sets up a byte-level bar.
    pub fn start(total_bytes: u64) -> Self {
        println!("Starting upload...");
        let bar = ProgressBar::new(total_bytes);
        if let Ok(style) =
            ProgressStyle::with_template("{spinner} [{bar:40}] {bytes}/{total_bytes} ({eta})")
        {
            bar.set_style(style.progress_chars("=> "));
        }
        UploadReporter {
            bar,
            last_percent: None,
        }
    }

    /// Called after every acknowledged chunk.
    pub fn update(&mut self, progress: UploadProgress) {
        self.bar.set_position(progress.bytes_sent);
        let percent = progress.percent();
        if self.last_percent != Some(percent) {
            self.last_percent = Some(percent);
            self.bar.suspend(|| println!("Uploaded {percent}%"));
        }
    }

    pub fn finish(self) {
        self.bar.finish_and_clear();
    }
}

pub fn report_success(video_id: &str) {
    println!("{}", "Upload complete ✅".green());
    println!("Video ID: {video_id}");
    println!("Watch URL: {}", watch_url(video_id));
}

/// Print the diagnostic for a failed run.
pub fn report_failure(err: &AppError) {
    match err {
        AppError::Upload(UploadError::MissingVideoId) => {}
        AppError::Upload(e @ (UploadError::Http { .. } | UploadError::Network(_) | UploadError::RetriesExhausted { .. })) => {
            println!("{}", format!("HTTP Error: {e}").red())
        }
        AppError::Upload(e) => println!("{}", format!("Upload error: {e}").red()),
        other => eprintln!("{}", other.to_string().red()),
    }
    if matches!(err, AppError::Upload(_)) {
        println!("{}", "The upload failed.".red());
    }
}

pub fn show_consent_url(url: &Url) {
    println!("Please visit this URL to authorize this application: {url}");
}

/// Ask for the URL the browser ended up on after consent (or just the code).
pub fn prompt_redirect_url() -> Result<String, AuthError> {
    Input::<String>::new()
        .with_prompt("Paste the full redirect URL (or the code)")
        .interact_text()
        .map_err(|e| AuthError::Prompt(e.to_string()))
}
