use std::path::Path;

#[derive(Debug, PartialEq)]
pub enum ContainerFormat {
    Mp4,
    Matroska, // MKV/WebM
    Mp3,
    Ogg,
    Unknown,
}

impl ContainerFormat {
    pub fn content_type(&self) -> &'static str {
        match self {
            ContainerFormat::Mp4 => "video/mp4",
            ContainerFormat::Matroska => "video/webm",
            ContainerFormat::Mp3 => "audio/mpeg",
            ContainerFormat::Ogg => "audio/ogg",
            ContainerFormat::Unknown => "application/octet-stream",
        }
    }
}

/// Detect container format from file header bytes (first few bytes suffice).
pub fn detect_container(header: &[u8]) -> ContainerFormat {
    // MP4/M4A: bytes 4..8 == "ftyp"
    if header.len() >= 8 && &header[4..8] == b"ftyp" {
        return ContainerFormat::Mp4;
    }

    // MKV/WebM: EBML magic bytes at offset 0
    if header.len() >= 4 && header[0..4] == [0x1A, 0x45, 0xDF, 0xA3] {
        return ContainerFormat::Matroska;
    }

    if header.len() >= 4 && &header[0..4] == b"OggS" {
        return ContainerFormat::Ogg;
    }

    // MP3: ID3v2 tag, or a bare MPEG audio frame sync.
    if header.len() >= 3 && &header[0..3] == b"ID3" {
        return ContainerFormat::Mp3;
    }
    if header.len() >= 2 && header[0] == 0xFF && (header[1] & 0xE0) == 0xE0 {
        return ContainerFormat::Mp3;
    }

    ContainerFormat::Unknown
}

/// Content type from a downloaded file's extension.
pub fn content_type_for_extension(ext: &str) -> Option<&'static str> {
    let ext = ext.trim_start_matches('.').to_ascii_lowercase();
    let content_type = match ext.as_str() {
        "mp3" => "audio/mpeg",
        "m4a" => "audio/mp4",
        "opus" | "ogg" => "audio/ogg",
        "webm" => "video/webm",
        "mkv" => "video/x-matroska",
        "mp4" => "video/mp4",
        _ => return None,
    };
    Some(content_type)
}

/// Resolve a content type for `path`, sniffing `header` when the extension is
/// unrecognised. Anything still unknown is served as MP4.
pub fn content_type_for(path: &Path, header: &[u8]) -> &'static str {
    if let Some(ct) = path
        .extension()
        .and_then(|e| e.to_str())
        .and_then(content_type_for_extension)
    {
        return ct;
    }

    match detect_container(header) {
        ContainerFormat::Unknown => "video/mp4",
        format => format.content_type(),
    }
}
