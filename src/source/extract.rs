// Extraction adapter: normalizes single-video and playlist metadata into a catalog.

use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info};

use super::traits::MetadataExtractor;
use crate::config::ERROR_MESSAGE_LIMIT;
use crate::engine::session::Video;
use crate::error::{truncate_chars, EngineError, Result};

const NO_INFO_MESSAGE: &str = "Could not extract info from URL. Check that the URL is valid.";

#[derive(Debug, Default, Deserialize)]
struct RawThumbnail {
    url: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct RawEntry {
    id: Option<String>,
    title: Option<String>,
    #[serde(rename = "_type")]
    kind: Option<String>,
    thumbnail: Option<String>,
    #[serde(default)]
    thumbnails: Option<Vec<RawThumbnail>>,
    duration: Option<f64>,
    uploader: Option<String>,
    #[serde(default)]
    entries: Option<Vec<Value>>,
}

impl RawEntry {
    fn into_video(self) -> Option<Video> {
        let id = self.id.filter(|id| !id.trim().is_empty())?;
        let thumbnail = self.thumbnail.or_else(|| {
            self.thumbnails
                .and_then(|thumbs| thumbs.into_iter().last())
                .and_then(|t| t.url)
        });
        let duration = self
            .duration
            .filter(|d| d.is_finite() && *d >= 0.0)
            .map(|d| d as u64);

        Some(Video::new(
            id,
            self.title.unwrap_or_else(|| "Unknown".to_string()),
            thumbnail,
            duration,
            self.uploader,
        ))
    }
}

/// Canonical result of extracting a URL.
#[derive(Debug, Clone)]
pub struct ExtractedPlaylist {
    pub playlist_id: String,
    pub title: String,
    pub videos: Vec<Video>,
}

/// Normalize raw extractor output.
///
/// Null entries (unavailable or private items) and entries without an id are
/// dropped; a missing top-level record is an extraction failure.
pub fn normalize(info: Option<Value>) -> Result<ExtractedPlaylist> {
    let info = match info {
        None | Some(Value::Null) => return Err(EngineError::Extraction(NO_INFO_MESSAGE.to_string())),
        Some(v) => v,
    };
    let raw: RawEntry = serde_json::from_value(info)
        .map_err(|e| EngineError::Extraction(format!("Unreadable metadata: {}", e)))?;

    if raw.kind.as_deref() != Some("playlist") {
        let playlist_id = raw.id.clone().unwrap_or_else(|| "single".to_string());
        let title = raw.title.clone().unwrap_or_else(|| "Single Video".to_string());
        let videos = raw.into_video().into_iter().collect();
        return Ok(ExtractedPlaylist {
            playlist_id,
            title,
            videos,
        });
    }

    let mut skipped = 0usize;
    let videos: Vec<Video> = raw
        .entries
        .unwrap_or_default()
        .into_iter()
        .filter_map(|entry| {
            let video = match entry {
                Value::Null => None,
                other => serde_json::from_value::<RawEntry>(other)
                    .ok()
                    .and_then(RawEntry::into_video),
            };
            if video.is_none() {
                skipped += 1;
            }
            video
        })
        .collect();

    if skipped > 0 {
        debug!("skipped {} unavailable playlist entries", skipped);
    }

    Ok(ExtractedPlaylist {
        playlist_id: raw.id.unwrap_or_default(),
        title: raw.title.unwrap_or_else(|| "Playlist".to_string()),
        videos,
    })
}

/// Validate `url`, run the extractor, and normalize what it returns.
pub async fn extract_playlist(
    extractor: &dyn MetadataExtractor,
    url: &str,
) -> Result<ExtractedPlaylist> {
    let url = url.trim();
    if url.is_empty() {
        return Err(EngineError::Validation("URL is required".to_string()));
    }

    let info = extractor
        .extract_info(url)
        .await
        .map_err(|e| EngineError::Extraction(truncate_chars(&e.to_string(), ERROR_MESSAGE_LIMIT)))?;

    let playlist = normalize(info)?;
    info!(
        "extracted {} videos from {} ({})",
        playlist.videos.len(),
        url,
        playlist.playlist_id
    );
    Ok(playlist)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_single_video_wrapped() {
        let out = normalize(Some(json!({
            "id": "abc",
            "title": "One",
            "duration": 65,
            "thumbnails": [{"url": "small"}, {"url": "big"}],
            "uploader": "me"
        })))
        .unwrap();
        assert_eq!(out.playlist_id, "abc");
        assert_eq!(out.title, "One");
        assert_eq!(out.videos.len(), 1);
        let v = &out.videos[0];
        assert_eq!(v.thumbnail.as_deref(), Some("big"));
        assert_eq!(v.duration_str.as_deref(), Some("1:05"));
        assert_eq!(v.url, "https://www.youtube.com/watch?v=abc");
    }

    #[test]
    fn test_playlist_drops_null_entries() {
        let out = normalize(Some(json!({
            "_type": "playlist",
            "id": "PL1",
            "title": "Mix",
            "entries": [
                {"id": "a", "title": "A", "duration": 3661.0},
                null,
                {"id": "b"},
                {"title": "no id"},
                {"id": ""}
            ]
        })))
        .unwrap();
        assert_eq!(out.playlist_id, "PL1");
        let ids: Vec<_> = out.videos.iter().map(|v| v.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert_eq!(out.videos[0].duration_str.as_deref(), Some("1:01:01"));
        assert_eq!(out.videos[1].title, "Unknown");
        assert!(out.videos.iter().all(|v| !v.id.is_empty() && !v.url.is_empty()));
    }

    #[test]
    fn test_playlist_defaults() {
        let out = normalize(Some(json!({"_type": "playlist", "entries": null}))).unwrap();
        assert_eq!(out.playlist_id, "");
        assert_eq!(out.title, "Playlist");
        assert!(out.videos.is_empty());
    }

    #[test]
    fn test_no_info_fails() {
        assert!(matches!(normalize(None), Err(EngineError::Extraction(_))));
        assert!(matches!(
            normalize(Some(Value::Null)),
            Err(EngineError::Extraction(_))
        ));
    }

    #[test]
    fn test_single_video_defaults() {
        let out = normalize(Some(json!({"id": "x", "duration": 0}))).unwrap();
        assert_eq!(out.title, "Single Video");
        assert_eq!(out.videos[0].title, "Unknown");
        assert_eq!(out.videos[0].duration, Some(0));
        assert_eq!(out.videos[0].duration_str, None);
    }
}
