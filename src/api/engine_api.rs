use std::sync::Arc;

use anyhow::Result;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::EngineConfig;
use crate::engine::orchestrator::Orchestrator;
use crate::engine::reaper::Reaper;
use crate::engine::session::SessionStore;
use crate::server::handler::{ApiServer, AppState};
use crate::source::traits::{MediaDownloader, MetadataExtractor};
use crate::source::ytdlp::YtDlp;

/// A running service: HTTP server, session store, and reaper.
pub struct Engine {
    server: ApiServer,
    store: Arc<SessionStore>,
    shutdown: CancellationToken,
    reaper: JoinHandle<()>,
}

impl Engine {
    /// Start with yt-dlp as both extractor and downloader.
    pub async fn start(config: EngineConfig) -> Result<Self> {
        let tool = Arc::new(YtDlp::from_config(&config));
        Self::start_with(config, tool.clone(), tool).await
    }

    /// Start with explicit collaborators.
    pub async fn start_with(
        config: EngineConfig,
        extractor: Arc<dyn MetadataExtractor>,
        downloader: Arc<dyn MediaDownloader>,
    ) -> Result<Self> {
        tokio::fs::create_dir_all(&config.downloads_dir).await?;

        let store = Arc::new(SessionStore::new(config.downloads_dir.clone()));
        let orchestrator = Arc::new(Orchestrator::new(store.clone(), downloader, &config));
        let state = AppState {
            store: store.clone(),
            orchestrator,
            extractor,
        };

        let shutdown = CancellationToken::new();
        let reaper = Reaper::new(store.clone(), &config).spawn(shutdown.clone());
        let server = ApiServer::start(state, &config.bind_addr).await?;

        Ok(Self {
            server,
            store,
            shutdown,
            reaper,
        })
    }

    pub fn server(&self) -> &ApiServer {
        &self.server
    }

    pub fn store(&self) -> &Arc<SessionStore> {
        &self.store
    }

    /// Stop the server and reaper and drop every session record.
    pub async fn dispose(self) {
        self.shutdown.cancel();
        self.server.shutdown();
        let _ = self.reaper.await;
        self.store.clear();
        info!("engine disposed");
    }
}
