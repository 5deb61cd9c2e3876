// Session store: per-session catalog and on-disk directory lifecycle.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::stats::RoundStats;
use crate::error::{EngineError, Result};
use crate::source::traits::OutputFormat;

const WATCH_URL_BASE: &str = "https://www.youtube.com/watch?v=";

/// One catalog entry. Immutable once extracted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Video {
    #[serde(rename = "video_id")]
    pub id: String,
    pub title: String,
    pub thumbnail: Option<String>,
    pub duration: Option<u64>,
    pub duration_str: Option<String>,
    pub uploader: Option<String>,
    pub url: String,
}

impl Video {
    pub fn new(
        id: String,
        title: String,
        thumbnail: Option<String>,
        duration: Option<u64>,
        uploader: Option<String>,
    ) -> Self {
        let url = format!("{}{}", WATCH_URL_BASE, id);
        Self {
            duration_str: format_duration(duration),
            id,
            title,
            thumbnail,
            duration,
            uploader,
            url,
        }
    }
}

/// Render seconds as `H:MM:SS` or `M:SS`. Unknown or zero durations have no text.
pub fn format_duration(seconds: Option<u64>) -> Option<String> {
    let total = seconds.filter(|s| *s > 0)?;
    let (minutes, secs) = (total / 60, total % 60);
    let (hours, minutes) = (minutes / 60, minutes % 60);
    if hours > 0 {
        Some(format!("{}:{:02}:{:02}", hours, minutes, secs))
    } else {
        Some(format!("{}:{:02}", minutes, secs))
    }
}

pub struct Session {
    pub id: String,
    pub playlist_id: String,
    pub title: String,
    directory: PathBuf,
    /// Extraction order.
    videos: Vec<Video>,
    index: HashMap<String, usize>,
    /// video_id -> filename inside `directory`.
    downloaded: HashMap<String, String>,
    format: Option<OutputFormat>,
}

impl Session {
    fn new(id: String, playlist_id: String, title: String, directory: PathBuf, videos: Vec<Video>) -> Self {
        let mut index = HashMap::with_capacity(videos.len());
        let mut unique = Vec::with_capacity(videos.len());
        for video in videos {
            // First occurrence wins; ids are unique within a session.
            if index.contains_key(&video.id) {
                continue;
            }
            index.insert(video.id.clone(), unique.len());
            unique.push(video);
        }

        Self {
            id,
            playlist_id,
            title,
            directory,
            videos: unique,
            index,
            downloaded: HashMap::new(),
            format: None,
        }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn videos(&self) -> &[Video] {
        &self.videos
    }

    pub fn video(&self, video_id: &str) -> Option<&Video> {
        self.index.get(video_id).map(|&i| &self.videos[i])
    }

    /// All catalog ids in extraction order.
    pub fn video_ids(&self) -> Vec<String> {
        self.videos.iter().map(|v| v.id.clone()).collect()
    }

    pub fn format(&self) -> Option<OutputFormat> {
        self.format
    }

    pub fn set_format(&mut self, format: OutputFormat) {
        self.format = Some(format);
    }

    /// Record a finished download. Re-downloads overwrite the previous entry.
    pub fn record_download(&mut self, video_id: &str, filename: String) {
        self.downloaded.insert(video_id.to_string(), filename);
    }

    pub fn downloaded_file(&self, video_id: &str) -> Option<&str> {
        self.downloaded.get(video_id).map(String::as_str)
    }

    pub fn downloaded_count(&self) -> usize {
        self.downloaded.len()
    }

    /// Downloaded `(video, filename)` pairs in catalog order.
    pub fn downloaded_entries(&self) -> Vec<(Video, String)> {
        self.videos
            .iter()
            .filter_map(|v| {
                self.downloaded
                    .get(&v.id)
                    .map(|name| (v.clone(), name.clone()))
            })
            .collect()
    }
}

pub type SharedSession = Arc<Mutex<Session>>;

/// Process-wide session registry. Empty on startup, cleared on shutdown.
pub struct SessionStore {
    root: PathBuf,
    sessions: RwLock<HashMap<String, SharedSession>>,
    rounds: RwLock<HashMap<String, Arc<RoundStats>>>,
}

impl SessionStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            sessions: RwLock::new(HashMap::new()),
            rounds: RwLock::new(HashMap::new()),
        }
    }

    /// Directory that holds one sub-directory per session.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create a session with a fresh id and its exclusively owned directory.
    pub async fn create(
        &self,
        playlist_id: String,
        title: String,
        videos: Vec<Video>,
    ) -> Result<SharedSession> {
        let id = Uuid::new_v4().to_string();
        let directory = self.root.join(&id);
        tokio::fs::create_dir_all(&directory).await?;

        let session = Arc::new(Mutex::new(Session::new(
            id.clone(),
            playlist_id,
            title,
            directory,
            videos,
        )));
        self.sessions.write().insert(id.clone(), session.clone());

        info!("session {} created", id);
        Ok(session)
    }

    pub fn get(&self, session_id: &str) -> Option<SharedSession> {
        self.sessions.read().get(session_id).cloned()
    }

    /// Like [`get`](Self::get) but a miss is a `NotFound` error.
    pub fn require(&self, session_id: &str) -> Result<SharedSession> {
        self.get(session_id)
            .ok_or_else(|| EngineError::NotFound("Session not found".to_string()))
    }

    pub fn contains(&self, session_id: &str) -> bool {
        self.sessions.read().contains_key(session_id)
    }

    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }

    /// Drop the in-memory record only. The directory is left untouched.
    pub fn forget(&self, session_id: &str) -> Option<SharedSession> {
        self.rounds.write().remove(session_id);
        self.sessions.write().remove(session_id)
    }

    /// Remove the session record and its directory. Unknown ids are a no-op.
    pub async fn delete(&self, session_id: &str) {
        let Some(session) = self.forget(session_id) else {
            debug!("delete for unknown session {}", session_id);
            return;
        };

        let directory = session.lock().directory.clone();
        match tokio::fs::remove_dir_all(&directory).await {
            Ok(()) => info!("session {} deleted", session_id),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("failed to remove {}: {}", directory.display(), e),
        }
    }

    /// Register the stats of the round now running for a session, replacing
    /// any earlier round.
    pub fn register_round(&self, session_id: &str, stats: Arc<RoundStats>) {
        self.rounds.write().insert(session_id.to_string(), stats);
    }

    pub fn round(&self, session_id: &str) -> Option<Arc<RoundStats>> {
        self.rounds.read().get(session_id).cloned()
    }

    /// Number of registered rounds whose items have not all settled.
    pub fn active_rounds(&self) -> usize {
        self.rounds
            .read()
            .values()
            .filter(|r| !r.is_settled())
            .count()
    }

    /// Drop every record. Used on shutdown; nothing is persisted.
    pub fn clear(&self) {
        self.rounds.write().clear();
        let mut sessions = self.sessions.write();
        info!("clearing {} sessions", sessions.len());
        sessions.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn video(id: &str) -> Video {
        Video::new(id.to_string(), format!("Title {}", id), None, Some(65), None)
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(None), None);
        assert_eq!(format_duration(Some(0)), None);
        assert_eq!(format_duration(Some(65)).as_deref(), Some("1:05"));
        assert_eq!(format_duration(Some(3661)).as_deref(), Some("1:01:01"));
        assert_eq!(format_duration(Some(59)).as_deref(), Some("0:59"));
    }

    #[test]
    fn test_video_url_and_serialization() {
        let v = video("abc");
        assert_eq!(v.url, "https://www.youtube.com/watch?v=abc");
        let json = serde_json::to_value(&v).unwrap();
        assert_eq!(json["video_id"], "abc");
        assert_eq!(json["duration_str"], "1:05");
    }

    #[test]
    fn test_catalog_keeps_order_and_dedupes() {
        let s = Session::new(
            "s".into(),
            "p".into(),
            "t".into(),
            PathBuf::from("/tmp/s"),
            vec![video("b"), video("a"), video("b")],
        );
        assert_eq!(s.video_ids(), vec!["b".to_string(), "a".to_string()]);
        assert!(s.video("a").is_some());
        assert!(s.video("zz").is_none());
    }

    #[test]
    fn test_downloaded_entries_follow_catalog_order() {
        let mut s = Session::new(
            "s".into(),
            "p".into(),
            "t".into(),
            PathBuf::from("/tmp/s"),
            vec![video("a"), video("b"), video("c")],
        );
        s.record_download("c", "c.mp3".into());
        s.record_download("a", "a.mp3".into());
        let ids: Vec<_> = s.downloaded_entries().into_iter().map(|(v, _)| v.id).collect();
        assert_eq!(ids, vec!["a", "c"]);

        s.record_download("a", "a.webm".into());
        assert_eq!(s.downloaded_file("a"), Some("a.webm"));
        assert_eq!(s.downloaded_count(), 2);
    }

    #[tokio::test]
    async fn test_store_create_and_delete() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path());

        let session = store
            .create("pl".into(), "Playlist".into(), vec![video("a")])
            .await
            .unwrap();
        let (id, directory) = {
            let s = session.lock();
            (s.id.clone(), s.directory().to_path_buf())
        };
        assert!(directory.is_dir());
        assert!(store.contains(&id));
        assert_eq!(store.len(), 1);

        store.delete(&id).await;
        assert!(!store.contains(&id));
        assert!(!directory.exists());

        // Unknown ids are a no-op.
        store.delete("missing").await;
        assert!(store.require("missing").is_err());
    }
}
