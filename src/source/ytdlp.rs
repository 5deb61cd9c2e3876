use std::collections::VecDeque;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::process::{Command, Stdio};
use std::sync::{Arc, OnceLock};

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tracing::{debug, info, warn};

use super::traits::{DownloadRequest, MediaDownloader, MetadataExtractor, ProgressCallback};
use crate::config::EngineConfig;
use crate::detect::progress::{parse_progress_line, DOWNLOAD_TEMPLATE, POSTPROCESS_TEMPLATE};

/// Lines of stderr kept for failure classification.
const STDERR_TAIL_LINES: usize = 50;

/// yt-dlp process wrapper serving as both extractor and downloader.
pub struct YtDlp {
    bin: String,
    ffmpeg_bin: String,
    transcoder: OnceLock<bool>,
}

impl YtDlp {
    pub fn new(bin: impl Into<String>, ffmpeg_bin: impl Into<String>) -> Self {
        Self {
            bin: bin.into(),
            ffmpeg_bin: ffmpeg_bin.into(),
            transcoder: OnceLock::new(),
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(config.ytdlp_bin.clone(), config.ffmpeg_bin.clone())
    }

    /// Explicit ffmpeg path for yt-dlp, only when configured as a path.
    fn ffmpeg_location(&self) -> Option<&str> {
        if self.ffmpeg_bin.contains(std::path::MAIN_SEPARATOR) || self.ffmpeg_bin.contains('/') {
            Some(&self.ffmpeg_bin)
        } else {
            None
        }
    }
}

/// Resolve `bin` as an explicit path or by searching `PATH`.
fn find_executable(bin: &str) -> bool {
    let candidate = Path::new(bin);
    if candidate.components().count() > 1 {
        return candidate.is_file();
    }

    let Some(paths) = std::env::var_os("PATH") else {
        return false;
    };
    std::env::split_paths(&paths).any(|dir| {
        dir.join(bin).is_file() || (cfg!(windows) && dir.join(format!("{}.exe", bin)).is_file())
    })
}

/// Command-line arguments for a single-item download.
pub fn build_download_args(request: &DownloadRequest, ffmpeg_location: Option<&str>) -> Vec<String> {
    let opts = &request.options;
    let mut args: Vec<String> = vec![
        "-f".into(),
        opts.format_selector().into(),
        "--retries".into(),
        opts.retries.to_string(),
        "--fragment-retries".into(),
        opts.fragment_retries.to_string(),
        "-o".into(),
        opts.output_template.clone(),
        "--no-playlist".into(),
        "--no-warnings".into(),
        "--newline".into(),
        "--progress".into(),
        "--progress-template".into(),
        DOWNLOAD_TEMPLATE.into(),
        "--progress-template".into(),
        POSTPROCESS_TEMPLATE.into(),
    ];

    if let Some(pp) = &opts.postprocessor {
        args.extend([
            "--extract-audio".into(),
            "--audio-format".into(),
            pp.codec.clone(),
            "--audio-quality".into(),
            format!("{}K", pp.quality),
        ]);
    }
    if let Some(container) = &opts.merge_output_format {
        args.extend(["--merge-output-format".into(), container.clone()]);
    }
    if let Some(location) = ffmpeg_location {
        args.extend(["--ffmpeg-location".into(), location.to_string()]);
    }

    args.push("--".into());
    args.push(request.url.clone());
    args
}

#[async_trait]
impl MetadataExtractor for YtDlp {
    async fn extract_info(&self, url: &str) -> Result<Option<Value>> {
        let output = tokio::process::Command::new(&self.bin)
            .args([
                "--flat-playlist",
                "--dump-single-json",
                "--no-warnings",
                "--ignore-errors",
                "--",
                url,
            ])
            .stdin(Stdio::null())
            .output()
            .await
            .with_context(|| format!("failed to run {}", self.bin))?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let body = stdout.trim();
        if body.is_empty() || body == "null" {
            if !output.status.success() {
                let stderr = String::from_utf8_lossy(&output.stderr);
                warn!("extraction failed for {}: {}", url, stderr.trim());
                return Err(anyhow!("{}", stderr.trim()));
            }
            return Ok(None);
        }

        // --ignore-errors may exit non-zero while still printing usable JSON.
        let value: Value = serde_json::from_str(body).context("extractor printed invalid JSON")?;
        Ok(Some(value))
    }
}

impl MediaDownloader for YtDlp {
    fn download(&self, request: &DownloadRequest, on_progress: ProgressCallback<'_>) -> Result<()> {
        let args = build_download_args(request, self.ffmpeg_location());
        debug!("spawning {} for {}", self.bin, request.video_id);

        let mut child = Command::new(&self.bin)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| format!("failed to spawn {}", self.bin))?;

        let stderr_tail = Arc::new(Mutex::new(VecDeque::<String>::new()));
        let stderr_reader = child.stderr.take().map(|stream| {
            let tail = Arc::clone(&stderr_tail);
            std::thread::spawn(move || {
                for line in BufReader::new(stream).lines().map_while(|l| l.ok()) {
                    let mut lines = tail.lock();
                    lines.push_back(line);
                    if lines.len() > STDERR_TAIL_LINES {
                        lines.pop_front();
                    }
                }
            })
        });

        if let Some(stdout) = child.stdout.take() {
            for line in BufReader::new(stdout).lines().map_while(|l| l.ok()) {
                if let Some(progress) = parse_progress_line(&line) {
                    on_progress(progress);
                }
            }
        }

        let status = child.wait().context("download process failed")?;
        if let Some(handle) = stderr_reader {
            let _ = handle.join();
        }

        if status.success() {
            return Ok(());
        }

        let diagnostics = stderr_tail.lock().iter().cloned().collect::<Vec<_>>().join("\n");
        Err(anyhow!(
            "{}",
            if diagnostics.is_empty() {
                format!("{} exited with {}", self.bin, status)
            } else {
                diagnostics
            }
        ))
    }

    fn transcoder_available(&self) -> bool {
        *self.transcoder.get_or_init(|| {
            let found = find_executable(&self.ffmpeg_bin);
            info!("transcoder {} available: {}", self.ffmpeg_bin, found);
            found
        })
    }
}
