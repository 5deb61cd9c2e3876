// Axum request handlers.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::path::Path as FsPath;
use std::sync::Arc;

use anyhow::Result;
use axum::{
    body::Body,
    extract::{Path, Query, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{
        sse::{Event, Sse},
        IntoResponse, Response,
    },
    routing::{delete, get, post},
    Json, Router,
};
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::net::TcpListener;
use tokio_util::io::ReaderStream;
use tower_http::trace::TraceLayer;
use tracing::{debug, info};

use crate::detect::container::{content_type_for, content_type_for_extension};
use crate::engine::archive::{dotted_extension, safe_filename, ArchivePlan};
use crate::engine::bus::BusFrame;
use crate::engine::orchestrator::{Orchestrator, VideoSelection};
use crate::engine::session::{SessionStore, Video};
use crate::error::{EngineError, Result as EngineResult};
use crate::source::extract::extract_playlist;
use crate::source::traits::{MetadataExtractor, OutputFormat};

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<SessionStore>,
    pub orchestrator: Arc<Orchestrator>,
    pub extractor: Arc<dyn MetadataExtractor>,
}

pub struct ApiServer {
    addr: SocketAddr,
    state: AppState,
    shutdown_tx: Option<tokio::sync::oneshot::Sender<()>>,
}

impl ApiServer {
    /// Bind `bind_addr` (port 0 picks a free port) and serve in the background.
    pub async fn start(state: AppState, bind_addr: &str) -> Result<Self> {
        let listener = TcpListener::bind(bind_addr).await?;
        let addr = listener.local_addr()?;

        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
        let app = router(state.clone());

        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await
                .ok();
        });

        info!("api listening on http://{}", addr);
        Ok(Self {
            addr,
            state,
            shutdown_tx: Some(shutdown_tx),
        })
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Absolute URL for an API path such as `/api/extract`.
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub fn store(&self) -> &Arc<SessionStore> {
        &self.state.store
    }

    /// Shutdown the server gracefully.
    pub fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(health_handler))
        .route("/api/extract", post(extract_handler))
        .route("/api/download/{session_id}", get(download_handler))
        .route("/api/file/{session_id}/{video_id}", get(file_handler))
        .route("/api/zip/{session_id}", get(zip_handler))
        .route("/api/session/{session_id}", delete(delete_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Debug, Deserialize)]
pub struct ExtractRequest {
    pub url: String,
}

#[derive(Debug, Serialize)]
pub struct PlaylistInfo {
    pub playlist_id: String,
    pub title: String,
    pub video_count: usize,
    pub videos: Vec<Video>,
    pub session_id: String,
}

#[derive(Debug, Deserialize)]
pub struct DownloadQuery {
    pub video_ids: Option<String>,
    pub fmt: Option<String>,
}

/// `attachment` disposition with an ASCII fallback and an RFC 5987 UTF-8 name.
fn content_disposition(filename: &str) -> HeaderValue {
    let fallback: String = filename
        .chars()
        .map(|c| if c.is_ascii() && c != '"' { c } else { '_' })
        .collect();
    let encoded: String = filename
        .bytes()
        .map(|b| match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' => (b as char).to_string(),
            _ => format!("%{:02X}", b),
        })
        .collect();
    let value = format!(
        "attachment; filename=\"{}\"; filename*=UTF-8''{}",
        fallback, encoded
    );
    HeaderValue::from_str(&value).unwrap_or_else(|_| HeaderValue::from_static("attachment"))
}

/// GET /api/health
async fn health_handler(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "sessions": state.store.len(),
        "active_rounds": state.store.active_rounds(),
    }))
}

/// POST /api/extract: resolve a URL and open a session for it.
async fn extract_handler(
    State(state): State<AppState>,
    Json(req): Json<ExtractRequest>,
) -> EngineResult<Json<PlaylistInfo>> {
    let playlist = extract_playlist(state.extractor.as_ref(), &req.url).await?;

    let session = state
        .store
        .create(
            playlist.playlist_id.clone(),
            playlist.title.clone(),
            playlist.videos,
        )
        .await?;

    let info = {
        let s = session.lock();
        PlaylistInfo {
            playlist_id: s.playlist_id.clone(),
            title: s.title.clone(),
            video_count: s.videos().len(),
            videos: s.videos().to_vec(),
            session_id: s.id.clone(),
        }
    };
    Ok(Json(info))
}

/// GET /api/download/{session_id}: start a round and stream its progress as SSE.
async fn download_handler(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Query(query): Query<DownloadQuery>,
) -> EngineResult<Response> {
    if !state.store.contains(&session_id) {
        return Err(EngineError::NotFound("Session not found".to_string()));
    }

    let selection = VideoSelection::parse(
        query
            .video_ids
            .as_deref()
            .ok_or_else(|| EngineError::Validation("video_ids is required".to_string()))?,
    );
    let flag = query.fmt.as_deref().unwrap_or("mp3");
    let format = OutputFormat::from_flag(flag)
        .ok_or_else(|| EngineError::Validation(format!("Unsupported format: {}", flag)))?;

    let round = state
        .orchestrator
        .start_round(&session_id, selection, format)?;

    let events = round.bus.into_stream().map(|frame| {
        let event = match frame {
            BusFrame::Event(ev) => Event::default()
                .json_data(&ev)
                .unwrap_or_else(|_| Event::default().comment("unserializable event")),
            BusFrame::KeepAlive => Event::default().comment("keepalive"),
        };
        Ok::<Event, Infallible>(event)
    });

    let mut headers = HeaderMap::new();
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert("x-accel-buffering", HeaderValue::from_static("no"));

    Ok((headers, Sse::new(events)).into_response())
}

/// GET /api/file/{session_id}/{video_id}: one finished file.
async fn file_handler(
    State(state): State<AppState>,
    Path((session_id, video_id)): Path<(String, String)>,
) -> EngineResult<Response> {
    let session = state.store.require(&session_id)?;

    let (path, download_name) = {
        let s = session.lock();
        let filename = s
            .downloaded_file(&video_id)
            .ok_or_else(|| EngineError::NotFound("File not downloaded yet".to_string()))?;
        let title = s
            .video(&video_id)
            .map(|v| v.title.clone())
            .unwrap_or_else(|| video_id.clone());
        (
            s.directory().join(filename),
            format!("{}{}", safe_filename(&title), dotted_extension(filename)),
        )
    };

    let mut file = match tokio::fs::File::open(&path).await {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(EngineError::NotFound("File not found on disk".to_string()));
        }
        Err(e) => return Err(e.into()),
    };
    let len = file.metadata().await?.len();

    let content_type = if sniff_needed(&path) {
        let mut head = [0u8; 16];
        let n = file.read(&mut head).await?;
        file.seek(std::io::SeekFrom::Start(0)).await?;
        content_type_for(&path, &head[..n])
    } else {
        content_type_for(&path, &[])
    };

    debug!("serving {} ({} bytes) as {}", path.display(), len, download_name);

    let mut headers = HeaderMap::new();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type));
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(len));
    headers.insert(header::CONTENT_DISPOSITION, content_disposition(&download_name));

    Ok((StatusCode::OK, headers, Body::from_stream(ReaderStream::new(file))).into_response())
}

fn sniff_needed(path: &FsPath) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .and_then(content_type_for_extension)
        .is_none()
}

/// GET /api/zip/{session_id}: stream every finished file as one archive.
async fn zip_handler(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> EngineResult<Response> {
    let session = state.store.require(&session_id)?;
    let plan = {
        let s = session.lock();
        ArchivePlan::for_session(&s)?
    };

    let archive_name = plan.archive_name.clone();
    info!(
        "streaming archive {} with {} entries for session {}",
        archive_name,
        plan.entries().len(),
        session_id
    );

    let chunks = stream::unfold(plan.stream(), |mut rx| async move {
        rx.recv().await.map(|chunk| (chunk, rx))
    });

    let mut headers = HeaderMap::new();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/zip"));
    headers.insert(header::CONTENT_DISPOSITION, content_disposition(&archive_name));

    Ok((StatusCode::OK, headers, Body::from_stream(chunks)).into_response())
}

/// DELETE /api/session/{session_id}: always succeeds.
async fn delete_handler(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Json<serde_json::Value> {
    state.store.delete(&session_id).await;
    Json(serde_json::json!({ "status": "cleaned" }))
}
