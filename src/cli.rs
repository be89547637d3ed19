// Command-line surface: argument parsing and the immutable upload request
// built from it. Nothing in here touches the network or the token file.

use crate::api::{Snippet, VideoMetadata, VideoStatus};
use clap::{Parser, ValueEnum};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Upload a video to YouTube.
#[derive(Parser, Debug, Clone)]
#[command(version, about = "Upload a video to YouTube (resumable, chunked).")]
pub struct Cli {
    /// Path to the video file (e.g., /path/to/video.mp4)
    pub video: PathBuf,

    /// Video title (default: filename without extension)
    #[arg(long)]
    pub title: Option<String>,

    /// Video description
    #[arg(long, default_value = "")]
    pub description: String,

    /// Comma-separated tags, e.g. "tag1,tag2"
    #[arg(long, default_value = "")]
    pub tags: String,

    /// Privacy status
    #[arg(long, value_enum, default_value_t = PrivacyStatus::Private)]
    pub privacy: PrivacyStatus,

    /// Print the consent URL instead of opening a browser
    #[arg(long)]
    pub no_browser: bool,

    /// Paste the redirected URL into the terminal instead of running a local listener
    #[arg(long)]
    pub console_auth: bool,

    /// Log progress details to stderr
    #[arg(short, long)]
    pub verbose: bool,
}

/// Visibility of the uploaded video.
#[derive(ValueEnum, Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum PrivacyStatus {
    Public,
    Unlisted,
    #[default]
    Private,
}

/// Everything needed to describe one upload. Built once from the CLI and
/// never mutated afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct UploadRequest {
    pub file_path: PathBuf,
    pub title: String,
    pub description: String,
    pub tags: Option<Vec<String>>,
    pub privacy_status: PrivacyStatus,
}

impl UploadRequest {
    pub fn from_cli(cli: &Cli) -> Self {
        let title = match &cli.title {
            Some(t) => t.clone(),
            None => derive_title(&cli.video),
        };
        UploadRequest {
            file_path: cli.video.clone(),
            title,
            description: cli.description.clone(),
            tags: parse_tags(&cli.tags),
            privacy_status: cli.privacy,
        }
    }

    /// Request body for the `videos.insert` call.
    pub fn metadata(&self) -> VideoMetadata {
        VideoMetadata {
            snippet: Snippet {
                title: self.title.clone(),
                description: self.description.clone(),
                tags: self.tags.clone(),
            },
            status: VideoStatus {
                privacy_status: self.privacy_status,
            },
        }
    }
}

/// Base name of the file with its extension removed.
pub fn derive_title(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Split on commas and trim. Returns `None` when nothing is left so the
/// field is omitted from the request instead of sent as an empty list.
pub fn parse_tags(raw: &str) -> Option<Vec<String>> {
    let tags: Vec<String> = raw
        .split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(String::from)
        .collect();
    if tags.is_empty() {
        None
    } else {
        Some(tags)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<Cli, clap::Error> {
        Cli::try_parse_from(std::iter::once("video-uploader").chain(args.iter().copied()))
    }

    #[test]
    fn title_defaults_to_file_stem() {
        let cli = parse(&["clips/demo.mp4"]).unwrap();
        let req = UploadRequest::from_cli(&cli);
        assert_eq!(req.title, "demo");
        assert_eq!(derive_title(Path::new("/a/b/holiday.2024.mov")), "holiday.2024");
        assert_eq!(derive_title(Path::new("noext")), "noext");
    }

    #[test]
    fn explicit_title_wins() {
        let cli = parse(&["demo.mp4", "--title", "My Title"]).unwrap();
        assert_eq!(UploadRequest::from_cli(&cli).title, "My Title");
    }

    #[test]
    fn tags_are_trimmed_and_empty_entries_dropped() {
        assert_eq!(
            parse_tags("cats, dogs ,, "),
            Some(vec!["cats".to_string(), "dogs".to_string()])
        );
        assert_eq!(parse_tags(""), None);
        assert_eq!(parse_tags("  , ,"), None);
    }

    #[test]
    fn privacy_defaults_to_private() {
        let cli = parse(&["demo.mp4"]).unwrap();
        assert_eq!(cli.privacy, PrivacyStatus::Private);
        let cli = parse(&["demo.mp4", "--privacy", "unlisted"]).unwrap();
        assert_eq!(cli.privacy, PrivacyStatus::Unlisted);
    }

    #[test]
    fn unknown_privacy_is_rejected() {
        let err = parse(&["demo.mp4", "--privacy", "weird"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::InvalidValue);
    }

    #[test]
    fn video_path_is_required() {
        assert!(parse(&[]).is_err());
    }

    #[test]
    fn metadata_omits_tags_when_none() {
        let cli = parse(&["demo.mp4", "--description", "hello"]).unwrap();
        let body = serde_json::to_value(UploadRequest::from_cli(&cli).metadata()).unwrap();
        assert_eq!(
            body,
            serde_json::json!({
                "snippet": { "title": "demo", "description": "hello" },
                "status": { "privacyStatus": "private" }
            })
        );
    }

    #[test]
    fn metadata_includes_tags_when_present() {
        let cli = parse(&["demo.mp4", "--tags", "a,b", "--privacy", "public"]).unwrap();
        let body = serde_json::to_value(UploadRequest::from_cli(&cli).metadata()).unwrap();
        assert_eq!(body["snippet"]["tags"], serde_json::json!(["a", "b"]));
        assert_eq!(body["status"]["privacyStatus"], "public");
    }
}
