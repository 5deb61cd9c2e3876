// Archive streamer: zip of a session's finished files, named by sanitized titles.

use std::collections::HashSet;
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use bytes::Bytes;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use super::session::Session;
use crate::config::{ARCHIVE_CHUNK_BYTES, SAFE_TITLE_LIMIT};
use crate::error::{EngineError, Result};

/// Keep alphanumerics and ` -_().`, trimmed and capped. Never empty.
pub fn safe_filename(title: &str) -> String {
    let kept: String = title
        .chars()
        .filter(|c| c.is_alphanumeric() || " -_().".contains(*c))
        .collect();
    let trimmed: String = kept.trim().chars().take(SAFE_TITLE_LIMIT).collect();
    if trimmed.is_empty() {
        "download".to_string()
    } else {
        trimmed
    }
}

/// `.ext` of a stored filename, or empty.
pub fn dotted_extension(filename: &str) -> String {
    Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| format!(".{}", e))
        .unwrap_or_default()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveEntry {
    pub path: PathBuf,
    pub name: String,
}

/// Everything needed to build one archive, captured before streaming starts.
#[derive(Debug)]
pub struct ArchivePlan {
    pub archive_name: String,
    entries: Vec<ArchiveEntry>,
}

impl ArchivePlan {
    /// Fails when nothing has been downloaded yet.
    pub fn for_session(session: &Session) -> Result<Self> {
        let downloaded = session.downloaded_entries();
        if downloaded.is_empty() {
            return Err(EngineError::State("No files downloaded yet".to_string()));
        }

        let mut used = HashSet::new();
        let entries = downloaded
            .into_iter()
            .map(|(video, filename)| {
                let base = safe_filename(&video.title);
                let ext = dotted_extension(&filename);
                let mut name = format!("{}{}", base, ext);
                let mut n = 2;
                while !used.insert(name.clone()) {
                    name = format!("{} ({}){}", base, n, ext);
                    n += 1;
                }
                ArchiveEntry {
                    path: session.directory().join(&filename),
                    name,
                }
            })
            .collect();

        Ok(Self {
            archive_name: format!("{}.zip", safe_filename(&session.title)),
            entries,
        })
    }

    pub fn entries(&self) -> &[ArchiveEntry] {
        &self.entries
    }

    /// Produce the archive as a stream of byte chunks on a blocking worker.
    ///
    /// The stream is single-use. Files missing on disk are skipped.
    pub fn stream(self) -> mpsc::Receiver<io::Result<Bytes>> {
        let (tx, rx) = mpsc::channel::<io::Result<Bytes>>(8);
        tokio::task::spawn_blocking(move || {
            if let Err(e) = self.write_to(&tx) {
                warn!("archive {} failed: {}", self.archive_name, e);
                let _ = tx.blocking_send(Err(e));
            }
        });
        rx
    }

    fn write_to(&self, tx: &mpsc::Sender<io::Result<Bytes>>) -> io::Result<()> {
        // Spool to an anonymous temp file; the zip writer needs to seek back
        // into each local header.
        let mut zip = ZipWriter::new(tempfile::tempfile()?);
        let mut written = 0usize;

        for entry in &self.entries {
            let mut source = match File::open(&entry.path) {
                Ok(f) => f,
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    debug!("archive skipping missing {}", entry.path.display());
                    continue;
                }
                Err(e) => return Err(e),
            };
            let len = source.metadata()?.len();
            // Media is already compressed.
            let options = SimpleFileOptions::default()
                .compression_method(CompressionMethod::Stored)
                .large_file(len >= u32::MAX as u64);
            zip.start_file(entry.name.as_str(), options)
                .map_err(io::Error::other)?;
            io::copy(&mut source, &mut zip)?;
            written += 1;
        }

        let mut spool = zip.finish().map_err(io::Error::other)?;
        spool.seek(SeekFrom::Start(0))?;
        debug!("archive {} holds {} entries", self.archive_name, written);

        let mut buf = vec![0u8; ARCHIVE_CHUNK_BYTES];
        loop {
            let n = spool.read(&mut buf)?;
            if n == 0 {
                return Ok(());
            }
            if tx.blocking_send(Ok(Bytes::copy_from_slice(&buf[..n]))).is_err() {
                debug!("archive receiver dropped");
                return Ok(());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::session::{SessionStore, Video};
    use std::io::Cursor;

    fn video(id: &str, title: &str) -> Video {
        Video::new(id.to_string(), title.to_string(), None, None, None)
    }

    async fn collect(plan: ArchivePlan) -> Vec<u8> {
        let mut rx = plan.stream();
        let mut out = Vec::new();
        while let Some(chunk) = rx.recv().await {
            out.extend_from_slice(&chunk.unwrap());
        }
        out
    }

    #[tokio::test]
    async fn test_stream_dedupes_names_and_skips_missing_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path());
        let session = store
            .create(
                "PL".into(),
                "Mix: Tape".into(),
                vec![video("a", "Same"), video("b", "Same?"), video("c", "Gone")],
            )
            .await
            .unwrap();

        let plan = {
            let mut s = session.lock();
            std::fs::write(s.directory().join("a.mp3"), b"first").unwrap();
            std::fs::write(s.directory().join("b.mp3"), b"second").unwrap();
            for id in ["a", "b", "c"] {
                s.record_download(id, format!("{}.mp3", id));
            }
            ArchivePlan::for_session(&s).unwrap()
        };
        assert_eq!(plan.archive_name, "Mix Tape.zip");
        let names: Vec<&str> = plan.entries().iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["Same.mp3", "Same (2).mp3", "Gone.mp3"]);

        let bytes = collect(plan).await;
        let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).unwrap();
        let mut stored: Vec<String> = archive.file_names().map(str::to_string).collect();
        stored.sort();
        assert_eq!(stored, vec!["Same (2).mp3", "Same.mp3"]);

        let mut content = String::new();
        archive
            .by_name("Same (2).mp3")
            .unwrap()
            .read_to_string(&mut content)
            .unwrap();
        assert_eq!(content, "second");
    }

    #[tokio::test]
    async fn test_empty_session_has_no_plan() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path());
        let session = store
            .create("PL".into(), "Mix".into(), vec![video("a", "A")])
            .await
            .unwrap();
        let err = ArchivePlan::for_session(&session.lock()).unwrap_err();
        assert_eq!(err.to_string(), "No files downloaded yet");
    }

    #[test]
    fn test_safe_filename() {
        assert_eq!(safe_filename("  Hello: World / 1?  "), "Hello World  1");
        assert_eq!(safe_filename("a-b_c (d).e"), "a-b_c (d).e");
        assert_eq!(safe_filename("Café ♫"), "Café");
        assert_eq!(safe_filename("///"), "download");
        assert_eq!(safe_filename(&"x".repeat(300)).len(), SAFE_TITLE_LIMIT);
    }

    #[test]
    fn test_dotted_extension() {
        assert_eq!(dotted_extension("abc.mp3"), ".mp3");
        assert_eq!(dotted_extension("abc"), "");
    }
}
