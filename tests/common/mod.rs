// Fake collaborators shared by the integration tests.
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde_json::{json, Value};

use playlist_dl_engine::engine::bus::{BusFrame, ProgressEvent};
use playlist_dl_engine::engine::orchestrator::Round;
use playlist_dl_engine::engine::session::Video;
use playlist_dl_engine::source::traits::{
    DownloadProgress, DownloadRequest, MediaDownloader, MetadataExtractor, ProgressCallback,
};

pub const PLAYLIST_URL: &str = "https://www.youtube.com/playlist?list=PL3";
pub const BROKEN_URL: &str = "https://example.invalid/nothing";
pub const EMPTY_URL: &str = "https://www.youtube.com/watch?v=gone";

/// Three playable entries around one unavailable (null) entry.
pub fn playlist_json() -> Value {
    json!({
        "_type": "playlist",
        "id": "PL3",
        "title": "Road Trip: Vol/1",
        "entries": [
            {"id": "v1", "title": "First: Song", "duration": 65},
            null,
            {"id": "v2", "title": "Second/Track?", "thumbnails": [{"url": "t-small"}, {"url": "t-big"}]},
            {"id": "v3", "duration": 3661.0}
        ]
    })
}

pub struct FakeExtractor;

#[async_trait]
impl MetadataExtractor for FakeExtractor {
    async fn extract_info(&self, url: &str) -> Result<Option<Value>> {
        match url {
            PLAYLIST_URL => Ok(Some(playlist_json())),
            EMPTY_URL => Ok(None),
            _ => Err(anyhow!("ERROR: Unsupported URL: {}", url)),
        }
    }
}

/// Writes `{id}.{ext}` after reporting a few progress steps.
pub struct FakeDownloader {
    pub step: Duration,
    pub ext: &'static str,
    pub write_output: bool,
    pub failures: HashMap<String, String>,
    pub active: AtomicUsize,
    pub peak: AtomicUsize,
    pub calls: AtomicUsize,
}

impl FakeDownloader {
    pub fn new(step: Duration) -> Self {
        Self {
            step,
            ext: "mp3",
            write_output: true,
            failures: HashMap::new(),
            active: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing(mut self, video_id: &str, raw_error: &str) -> Self {
        self.failures
            .insert(video_id.to_string(), raw_error.to_string());
        self
    }

    pub fn without_output(mut self) -> Self {
        self.write_output = false;
        self
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl MediaDownloader for FakeDownloader {
    fn download(&self, request: &DownloadRequest, on_progress: ProgressCallback<'_>) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);

        for percent in [25.0, 50.0, 100.0] {
            std::thread::sleep(self.step);
            on_progress(DownloadProgress::Downloading {
                percent,
                speed: Some("1.00MiB/s".to_string()),
                eta: Some("00:01".to_string()),
            });
        }
        on_progress(DownloadProgress::Merging {
            message: "Extracting audio".to_string(),
        });

        self.active.fetch_sub(1, Ordering::SeqCst);

        if let Some(raw) = self.failures.get(&request.video_id) {
            return Err(anyhow!("{}", raw));
        }
        if self.write_output {
            let path = request
                .output_dir
                .join(format!("{}.{}", request.video_id, self.ext));
            std::fs::write(path, format!("media:{}", request.video_id))?;
        }
        Ok(())
    }

    fn transcoder_available(&self) -> bool {
        true
    }
}

pub fn videos(ids: &[&str]) -> Vec<Video> {
    ids.iter()
        .map(|id| Video::new(id.to_string(), format!("Title {}", id), None, Some(60), None))
        .collect()
}

/// Drain a round's bus until it ends, skipping keepalives.
pub async fn collect_events(round: Round) -> Vec<ProgressEvent> {
    let mut bus = round.bus;
    let mut events = Vec::new();
    while let Some(frame) = bus.next_frame().await {
        if let BusFrame::Event(event) = frame {
            events.push(event);
        }
    }
    events
}

pub fn terminal_count(events: &[ProgressEvent], video_id: &str) -> usize {
    events
        .iter()
        .filter(|e| e.is_terminal() && e.video_id() == Some(video_id))
        .count()
}

pub fn shared(downloader: FakeDownloader) -> Arc<FakeDownloader> {
    Arc::new(downloader)
}
