use std::path::{Path, PathBuf};

use anyhow::Result;
use async_trait::async_trait;

/// Requested output kind for a download round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Audio,
    Video,
}

impl OutputFormat {
    /// Parse the `fmt` query flag. `mp3`/`audio` and `mp4`/`video` are accepted.
    pub fn from_flag(flag: &str) -> Option<Self> {
        match flag.trim().to_ascii_lowercase().as_str() {
            "mp3" | "audio" => Some(OutputFormat::Audio),
            "mp4" | "video" => Some(OutputFormat::Video),
            _ => None,
        }
    }
}

/// Transcode step applied after the raw download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Postprocessor {
    pub codec: String,
    pub quality: String,
}

/// Every option the download tool is driven with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadOptions {
    pub format: OutputFormat,
    pub retries: u32,
    pub fragment_retries: u32,
    /// Output path pattern; the tool substitutes `%(id)s` and `%(ext)s`.
    pub output_template: String,
    pub postprocessor: Option<Postprocessor>,
    /// Container to merge separate audio/video streams into.
    pub merge_output_format: Option<String>,
}

impl DownloadOptions {
    /// Build options for `format`, writing into `output_dir`.
    ///
    /// Without a transcoder, audio falls back to the best raw audio container
    /// and video is left in whatever container the source provides.
    pub fn new(
        format: OutputFormat,
        output_dir: &Path,
        retries: u32,
        fragment_retries: u32,
        transcoder_available: bool,
    ) -> Self {
        let (postprocessor, merge_output_format) = match (format, transcoder_available) {
            (OutputFormat::Audio, true) => (
                Some(Postprocessor {
                    codec: "mp3".to_string(),
                    quality: "192".to_string(),
                }),
                None,
            ),
            (OutputFormat::Video, true) => (None, Some("mp4".to_string())),
            (_, false) => (None, None),
        };

        Self {
            format,
            retries,
            fragment_retries,
            output_template: output_dir
                .join("%(id)s.%(ext)s")
                .to_string_lossy()
                .into_owned(),
            postprocessor,
            merge_output_format,
        }
    }

    /// Format selector expression handed to the tool.
    pub fn format_selector(&self) -> &'static str {
        match self.format {
            OutputFormat::Audio => "bestaudio/best",
            OutputFormat::Video if self.merge_output_format.is_some() => "bestvideo*+bestaudio/best",
            OutputFormat::Video => "best",
        }
    }
}

/// One item to download.
#[derive(Debug, Clone)]
pub struct DownloadRequest {
    pub video_id: String,
    pub url: String,
    pub output_dir: PathBuf,
    pub options: DownloadOptions,
}

/// Sub-event reported by the download tool while it runs.
#[derive(Debug, Clone, PartialEq)]
pub enum DownloadProgress {
    Downloading {
        percent: f64,
        speed: Option<String>,
        eta: Option<String>,
    },
    /// Post-download work: stream merging or transcoding.
    Merging { message: String },
}

pub type ProgressCallback<'a> = &'a (dyn Fn(DownloadProgress) + Send + Sync);

/// Resolves a URL into raw metadata.
///
/// `Ok(None)` means the tool ran but found nothing extractable.
#[async_trait]
pub trait MetadataExtractor: Send + Sync {
    async fn extract_info(&self, url: &str) -> Result<Option<serde_json::Value>>;
}

/// Blocking single-item downloader, run on the blocking thread pool.
///
/// Errors carry the raw tool diagnostics; callers classify them before
/// anything reaches a client.
pub trait MediaDownloader: Send + Sync {
    fn download(&self, request: &DownloadRequest, on_progress: ProgressCallback<'_>) -> Result<()>;

    /// Whether a local transcoder can produce fixed-codec audio and merged video.
    fn transcoder_available(&self) -> bool {
        false
    }
}
