// Download orchestrator: bounded-concurrency fan-out of one round's items onto the blocking pool.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::bus::{BusSender, ProgressBus, ProgressEvent};
use super::session::{SessionStore, SharedSession, Video};
use super::stats::RoundStats;
use crate::config::{EngineConfig, ERROR_MESSAGE_LIMIT};
use crate::detect::failure::failure_message;
use crate::error::{truncate_chars, EngineError, Result};
use crate::source::traits::{
    DownloadOptions, DownloadProgress, DownloadRequest, MediaDownloader, OutputFormat,
};

const NOT_IN_SESSION: &str = "Video not found in session";
const NO_OUTPUT_FILE: &str = "Download produced no output file";

/// Which catalog items a round covers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VideoSelection {
    /// Every catalog item, in extraction order.
    All,
    /// Caller-ordered ids; duplicates and unknown ids are kept.
    Ids(Vec<String>),
}

impl VideoSelection {
    /// Parse the `video_ids` query value: `all` or a comma-separated list.
    ///
    /// Segments are kept verbatim. Empty or padded ids miss the catalog and
    /// fail individually.
    pub fn parse(raw: &str) -> Self {
        if raw == "all" {
            return VideoSelection::All;
        }
        VideoSelection::Ids(raw.split(',').map(str::to_string).collect())
    }
}

/// A started round: its event stream and live statistics.
pub struct Round {
    pub bus: ProgressBus,
    pub stats: Arc<RoundStats>,
    pub handle: JoinHandle<()>,
}

/// Shared state for every item task of one round.
struct RoundContext {
    session: SharedSession,
    directory: PathBuf,
    downloader: Arc<dyn MediaDownloader>,
    semaphore: Arc<Semaphore>,
    stats: Arc<RoundStats>,
    tx: BusSender,
    format: OutputFormat,
    transcoder: bool,
    retries: u32,
    fragment_retries: u32,
}

pub struct Orchestrator {
    store: Arc<SessionStore>,
    downloader: Arc<dyn MediaDownloader>,
    max_concurrency: usize,
    keepalive: Duration,
    retries: u32,
    fragment_retries: u32,
}

impl Orchestrator {
    pub fn new(
        store: Arc<SessionStore>,
        downloader: Arc<dyn MediaDownloader>,
        config: &EngineConfig,
    ) -> Self {
        Self {
            store,
            downloader,
            max_concurrency: config.concurrency(),
            keepalive: config.keepalive(),
            retries: config.retries,
            fragment_retries: config.fragment_retries,
        }
    }

    pub fn store(&self) -> &Arc<SessionStore> {
        &self.store
    }

    /// Start a download round for `session_id` and return its event stream.
    ///
    /// The round runs to completion even if the returned bus is dropped.
    pub fn start_round(
        &self,
        session_id: &str,
        selection: VideoSelection,
        format: OutputFormat,
    ) -> Result<Round> {
        let session = self.store.require(session_id)?;

        let (directory, plan) = {
            let mut s = session.lock();
            s.set_format(format);
            let ids = match selection {
                VideoSelection::All => s.video_ids(),
                VideoSelection::Ids(ids) => ids,
            };
            let plan: Vec<(String, Option<Video>)> = ids
                .into_iter()
                .map(|id| {
                    let video = s.video(&id).cloned();
                    (id, video)
                })
                .collect();
            (s.directory().to_path_buf(), plan)
        };

        let (tx, bus) = ProgressBus::new(self.keepalive);
        let stats = Arc::new(RoundStats::new(plan.len()));
        self.store.register_round(session_id, stats.clone());

        let ctx = Arc::new(RoundContext {
            session,
            directory,
            downloader: self.downloader.clone(),
            semaphore: Arc::new(Semaphore::new(self.max_concurrency)),
            stats: stats.clone(),
            tx: tx.clone(),
            format,
            transcoder: self.downloader.transcoder_available(),
            retries: self.retries,
            fragment_retries: self.fragment_retries,
        });

        info!(
            "round started session={} items={} format={:?} concurrency={}",
            session_id,
            plan.len(),
            format,
            self.max_concurrency
        );

        let sid = session_id.to_string();
        let handle = tokio::spawn(async move {
            let items = plan
                .into_iter()
                .map(|(video_id, video)| run_item(ctx.clone(), video_id, video));
            join_all(items).await;

            tx.send(ProgressEvent::AllComplete {});
            let snap = ctx.stats.snapshot();
            info!(
                "round finished session={} completed={} failed={} peak_workers={} elapsed_ms={}",
                sid, snap.completed, snap.failed, snap.peak_workers, snap.elapsed_ms
            );
        });

        Ok(Round { bus, stats, handle })
    }
}

fn progress_event(video_id: &str, progress: DownloadProgress) -> ProgressEvent {
    match progress {
        DownloadProgress::Downloading {
            percent,
            speed,
            eta,
        } => ProgressEvent::Progress {
            video_id: video_id.to_string(),
            percent,
            speed,
            eta,
        },
        DownloadProgress::Merging { message } => ProgressEvent::Merging {
            video_id: video_id.to_string(),
            message,
        },
    }
}

/// Drive one item to exactly one terminal event.
async fn run_item(ctx: Arc<RoundContext>, video_id: String, video: Option<Video>) {
    // Catalog misses fail immediately and never take a slot.
    let Some(video) = video else {
        debug!("video {} not in session", video_id);
        ctx.stats.record_failed();
        ctx.tx.send(ProgressEvent::Error {
            video_id,
            title: None,
            message: NOT_IN_SESSION.to_string(),
        });
        return;
    };

    // The semaphore lives as long as the round and is never closed.
    let _permit = match ctx.semaphore.acquire().await {
        Ok(permit) => permit,
        Err(_) => {
            ctx.stats.record_failed();
            ctx.tx.send(ProgressEvent::Error {
                video_id,
                title: Some(video.title),
                message: "Download failed".to_string(),
            });
            return;
        }
    };

    ctx.stats.increment_workers();
    ctx.tx.send(ProgressEvent::Downloading {
        video_id: video_id.clone(),
        title: video.title.clone(),
    });

    let request = DownloadRequest {
        video_id: video_id.clone(),
        url: video.url.clone(),
        output_dir: ctx.directory.clone(),
        options: DownloadOptions::new(
            ctx.format,
            &ctx.directory,
            ctx.retries,
            ctx.fragment_retries,
            ctx.transcoder,
        ),
    };

    let downloader = ctx.downloader.clone();
    let progress_tx = ctx.tx.clone();
    let worker_id = video_id.clone();
    let outcome = tokio::task::spawn_blocking(move || {
        let on_progress =
            |progress: DownloadProgress| progress_tx.send(progress_event(&worker_id, progress));
        downloader.download(&request, &on_progress)
    })
    .await;

    ctx.stats.decrement_workers();

    let result = match outcome {
        Ok(Ok(())) => record_output(&ctx, &video_id).await,
        Ok(Err(e)) => {
            let raw = format!("{:#}", e);
            warn!("download of {} failed: {}", video_id, raw);
            Err(EngineError::Download(failure_message(&raw)))
        }
        Err(join_err) => {
            warn!("download worker for {} aborted: {}", video_id, join_err);
            Err(EngineError::Download("Download failed".to_string()))
        }
    };

    match result {
        Ok(filename) => {
            debug!("video {} complete as {}", video_id, filename);
            ctx.stats.record_completed();
            ctx.tx.send(ProgressEvent::Complete {
                video_id,
                title: video.title,
            });
        }
        Err(e) => {
            ctx.stats.record_failed();
            ctx.tx.send(ProgressEvent::Error {
                video_id,
                title: Some(video.title),
                message: truncate_chars(&e.to_string(), ERROR_MESSAGE_LIMIT),
            });
        }
    }
}

/// Locate the finished file and record it in the session before `complete` is sent.
async fn record_output(ctx: &RoundContext, video_id: &str) -> Result<String> {
    let preferred = preferred_extension(ctx.format, ctx.transcoder);
    match find_output_file(&ctx.directory, video_id, preferred).await {
        Ok(Some(filename)) => {
            ctx.session.lock().record_download(video_id, filename.clone());
            Ok(filename)
        }
        Ok(None) => Err(EngineError::Download(NO_OUTPUT_FILE.to_string())),
        Err(e) => {
            warn!("scanning {} failed: {}", ctx.directory.display(), e);
            Err(EngineError::Download(NO_OUTPUT_FILE.to_string()))
        }
    }
}

fn preferred_extension(format: OutputFormat, transcoder: bool) -> Option<&'static str> {
    match (format, transcoder) {
        (OutputFormat::Audio, true) => Some("mp3"),
        (OutputFormat::Video, true) => Some("mp4"),
        (_, false) => None,
    }
}

/// Find a regular file in `dir` whose stem is exactly `video_id`.
///
/// Partial downloads are ignored. When several match, `preferred` extension
/// wins, otherwise the lexically first name.
pub async fn find_output_file(
    dir: &Path,
    video_id: &str,
    preferred: Option<&str>,
) -> std::io::Result<Option<String>> {
    let mut matches = Vec::new();
    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let stem_matches = path.file_stem().and_then(|s| s.to_str()) == Some(video_id);
        if !stem_matches {
            continue;
        }
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or_default();
        if matches!(ext, "part" | "ytdl" | "temp") {
            continue;
        }
        if !entry.file_type().await?.is_file() {
            continue;
        }
        if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
            matches.push(name.to_string());
        }
    }

    matches.sort();
    let preferred_hit = preferred.and_then(|ext| {
        matches
            .iter()
            .find(|name| Path::new(name).extension().and_then(|e| e.to_str()) == Some(ext))
            .cloned()
    });
    Ok(preferred_hit.or_else(|| matches.into_iter().next()))
}
