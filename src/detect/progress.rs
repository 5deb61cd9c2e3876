// yt-dlp output line parsing: download progress and post-processing phases.

use crate::source::traits::DownloadProgress;

/// Marker prefix of lines produced by [`DOWNLOAD_TEMPLATE`].
pub const DOWNLOAD_MARKER: &str = "[progress]";
/// Marker prefix of lines produced by [`POSTPROCESS_TEMPLATE`].
pub const POSTPROCESS_MARKER: &str = "[postprocess]";

/// `--progress-template` value for the download phase: percent|speed|eta.
pub const DOWNLOAD_TEMPLATE: &str =
    "download:[progress]%(progress._percent_str)s|%(progress._speed_str)s|%(progress._eta_str)s";

/// `--progress-template` value for post-processors: status|name.
pub const POSTPROCESS_TEMPLATE: &str =
    "postprocess:[postprocess]%(progress.status)s|%(progress.postprocessor)s";

/// Post-processor banners yt-dlp prints on its own.
const MERGE_TAGS: &[(&str, &str)] = &[
    ("[Merger]", "Merging formats"),
    ("[ExtractAudio]", "Extracting audio"),
    ("[VideoConvertor]", "Converting video"),
    ("[VideoRemuxer]", "Remuxing video"),
];

fn non_placeholder(value: &str) -> Option<String> {
    let value = value.trim();
    if value.is_empty() || value.eq_ignore_ascii_case("NA") || value.starts_with("Unknown") {
        None
    } else {
        Some(value.to_string())
    }
}

fn parse_download(rest: &str) -> Option<DownloadProgress> {
    let mut parts = rest.split('|');
    let percent = parts.next()?.trim().trim_end_matches('%').trim().parse::<f64>().ok()?;
    let speed = parts.next().and_then(non_placeholder);
    let eta = parts.next().and_then(non_placeholder);
    Some(DownloadProgress::Downloading {
        percent: percent.clamp(0.0, 100.0),
        speed,
        eta,
    })
}

fn parse_postprocess(rest: &str) -> Option<DownloadProgress> {
    let mut parts = rest.split('|');
    let status = parts.next()?.trim();
    let name = parts.next().map(str::trim).unwrap_or_default();
    if status != "started" {
        return None;
    }
    let message = match name {
        "Merger" => "Merging formats".to_string(),
        "ExtractAudio" => "Extracting audio".to_string(),
        "" => "Post-processing".to_string(),
        other => format!("Running {}", other),
    };
    Some(DownloadProgress::Merging { message })
}

/// Parse one line of tool output into a progress sub-event, if it is one.
pub fn parse_progress_line(line: &str) -> Option<DownloadProgress> {
    let line = line.trim();

    if let Some(rest) = line.strip_prefix(DOWNLOAD_MARKER) {
        return parse_download(rest);
    }
    if let Some(rest) = line.strip_prefix(POSTPROCESS_MARKER) {
        return parse_postprocess(rest);
    }

    MERGE_TAGS
        .iter()
        .find(|(tag, _)| line.starts_with(tag))
        .map(|(_, message)| DownloadProgress::Merging {
            message: message.to_string(),
        })
}
