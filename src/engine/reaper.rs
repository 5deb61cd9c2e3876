// Session reaper: periodic sweep deleting session directories idle past the TTL.

use std::fs::Metadata;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::session::SessionStore;
use crate::config::EngineConfig;

pub struct Reaper {
    store: Arc<SessionStore>,
    ttl: Duration,
    interval: Duration,
}

impl Reaper {
    pub fn new(store: Arc<SessionStore>, config: &EngineConfig) -> Self {
        Self {
            store,
            ttl: config.session_ttl(),
            interval: config.reap_interval(),
        }
    }

    fn is_stale(metadata: &Metadata, now: SystemTime, ttl: Duration) -> std::io::Result<bool> {
        let modified = metadata.modified()?;
        // An mtime in the future counts as fresh.
        Ok(now
            .duration_since(modified)
            .map(|age| age > ttl)
            .unwrap_or(false))
    }

    /// Run one sweep over the downloads root. Returns the number of sessions reaped.
    pub async fn sweep_once(&self) -> usize {
        let root = self.store.root().to_path_buf();
        let mut entries = match tokio::fs::read_dir(&root).await {
            Ok(entries) => entries,
            Err(e) => {
                debug!("reaper cannot read {}: {}", root.display(), e);
                return 0;
            }
        };

        let now = SystemTime::now();
        let mut reaped = 0usize;
        loop {
            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(e) => {
                    debug!("reaper listing error: {}", e);
                    break;
                }
            };

            let path = entry.path();
            let metadata = match entry.metadata().await {
                Ok(md) if md.is_dir() => md,
                Ok(_) => continue,
                Err(e) => {
                    debug!("skipping {}: {}", path.display(), e);
                    continue;
                }
            };

            match Self::is_stale(&metadata, now, self.ttl) {
                Ok(true) => {}
                Ok(false) => continue,
                Err(e) => {
                    debug!("skipping {}: {}", path.display(), e);
                    continue;
                }
            }

            if let Err(e) = tokio::fs::remove_dir_all(&path).await {
                warn!("reaper failed to remove {}: {}", path.display(), e);
                continue;
            }
            if let Some(session_id) = path.file_name().and_then(|n| n.to_str()) {
                self.store.forget(session_id);
                info!("reaped stale session {}", session_id);
            }
            reaped += 1;
        }

        reaped
    }

    /// Sweep every `interval` until `shutdown` fires. The first sweep runs
    /// one interval after start.
    pub fn spawn(self, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let start = tokio::time::Instant::now() + self.interval;
            let mut ticker = tokio::time::interval_at(start, self.interval);
            info!(
                "reaper running every {}s with ttl {}s",
                self.interval.as_secs(),
                self.ttl.as_secs()
            );

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let reaped = self.sweep_once().await;
                        debug!("reaper sweep removed {} sessions", reaped);
                    }
                    _ = shutdown.cancelled() => {
                        debug!("reaper stopped");
                        return;
                    }
                }
            }
        })
    }
}
