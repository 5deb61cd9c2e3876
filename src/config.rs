use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Result;
use serde::Deserialize;

/// Maximum number of items downloading at once within a single round.
pub const MAX_CONCURRENT_DOWNLOADS: usize = 3;

/// Idle time on the progress stream before a keepalive frame is emitted.
pub const KEEPALIVE_SECONDS: u64 = 30;

/// Sessions whose directory has not been touched for this long are reaped (1 hour).
pub const SESSION_TTL_SECONDS: u64 = 60 * 60;

/// Interval between reaper sweeps (30 minutes).
pub const REAP_INTERVAL_SECONDS: u64 = 30 * 60;

/// Upper bound for any error message sent to a client.
pub const ERROR_MESSAGE_LIMIT: usize = 200;

/// Upper bound for the raw tool text kept in a generic download failure.
pub const GENERIC_FAILURE_LIMIT: usize = 150;

/// Upper bound for a sanitized title used as a filename.
pub const SAFE_TITLE_LIMIT: usize = 200;

/// Retry counts handed to the download tool.
pub const DEFAULT_RETRIES: u32 = 3;
pub const DEFAULT_FRAGMENT_RETRIES: u32 = 3;

/// Size of each chunk pushed into a streamed zip body (64 KB).
pub const ARCHIVE_CHUNK_BYTES: usize = 64 * 1024;

/// Top-level configuration for the download service.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Address the HTTP server binds to.
    pub bind_addr: String,
    /// Root under which every session gets its own directory.
    pub downloads_dir: PathBuf,
    /// Concurrency cap per download round.
    pub max_concurrent_downloads: usize,
    pub keepalive_secs: u64,
    pub session_ttl_secs: u64,
    pub reap_interval_secs: u64,
    /// Connection retries passed to the download tool.
    pub retries: u32,
    /// Fragment retries passed to the download tool.
    pub fragment_retries: u32,
    /// Path or name of the yt-dlp executable.
    pub ytdlp_bin: String,
    /// Path or name of the ffmpeg executable used for transcoding.
    pub ffmpeg_bin: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8000".to_string(),
            downloads_dir: PathBuf::from("downloads"),
            max_concurrent_downloads: MAX_CONCURRENT_DOWNLOADS,
            keepalive_secs: KEEPALIVE_SECONDS,
            session_ttl_secs: SESSION_TTL_SECONDS,
            reap_interval_secs: REAP_INTERVAL_SECONDS,
            retries: DEFAULT_RETRIES,
            fragment_retries: DEFAULT_FRAGMENT_RETRIES,
            ytdlp_bin: "yt-dlp".to_string(),
            ffmpeg_bin: "ffmpeg".to_string(),
        }
    }
}

impl EngineConfig {
    /// Load config from a TOML file. A missing file yields the defaults.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)?;
        let config: EngineConfig = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn keepalive(&self) -> Duration {
        Duration::from_secs(self.keepalive_secs)
    }

    pub fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.session_ttl_secs)
    }

    pub fn reap_interval(&self) -> Duration {
        Duration::from_secs(self.reap_interval_secs)
    }

    /// Concurrency cap, never below one so a round always makes progress.
    pub fn concurrency(&self) -> usize {
        self.max_concurrent_downloads.max(1)
    }
}
