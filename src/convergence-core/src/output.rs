//! Output paths and artifact writes.

use chrono::NaiveDateTime;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, info};

use crate::error::ConvergenceError;

const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

/// `<dir>/convergence_audio_<timestamp>.<ext>`
pub fn default_audio_path(directory: &Path, extension: &str, now: NaiveDateTime) -> PathBuf {
    directory.join(format!(
        "convergence_audio_{}.{}",
        now.format(TIMESTAMP_FORMAT),
        extension
    ))
}

/// `<dir>/conversation_<timestamp>.json`
pub fn default_transcript_path(directory: &Path, now: NaiveDateTime) -> PathBuf {
    directory.join(format!("conversation_{}.json", now.format(TIMESTAMP_FORMAT)))
}

/// Fallback document path: the audio path with a `.json` extension.
pub fn fallback_transcript_path(audio_path: &Path) -> PathBuf {
    audio_path.with_extension("json")
}

/// Write `bytes` to `path`, creating the parent directory if needed.
///
/// The data is staged in a temporary file next to `path` and renamed into
/// place, so a failed write never leaves a partial artifact at `path`.
pub async fn write_artifact(path: &Path, bytes: &[u8]) -> Result<(), ConvergenceError> {
    let parent = match path.parent().filter(|p| !p.as_os_str().is_empty()) {
        Some(parent) => parent.to_path_buf(),
        None => PathBuf::from("."),
    };

    tokio::fs::create_dir_all(&parent).await.map_err(|e| {
        ConvergenceError::PersistenceFailed(format!(
            "Failed to create {}: {}",
            parent.display(),
            e
        ))
    })?;

    let target = path.to_path_buf();
    let data = bytes.to_vec();
    tokio::task::spawn_blocking(move || write_staged(&parent, &target, &data))
        .await
        .map_err(|e| ConvergenceError::PersistenceFailed(format!("Write task failed: {}", e)))??;

    info!(path = %path.display(), bytes = bytes.len(), "artifact written");
    Ok(())
}

fn write_staged(directory: &Path, path: &Path, bytes: &[u8]) -> Result<(), ConvergenceError> {
    let failed = |action: &str, e: std::io::Error| {
        ConvergenceError::PersistenceFailed(format!(
            "Failed to {} {}: {}",
            action,
            path.display(),
            e
        ))
    };

    // Dropping the staged file on any early return removes it.
    let mut staged = NamedTempFile::new_in(directory).map_err(|e| failed("stage", e))?;
    staged
        .write_all(bytes)
        .and_then(|()| staged.as_file().sync_all())
        .map_err(|e| failed("write", e))?;

    let written = staged
        .as_file()
        .metadata()
        .map_err(|e| failed("verify", e))?
        .len();
    if written != bytes.len() as u64 {
        return Err(ConvergenceError::PersistenceFailed(format!(
            "Wrote {} of {} bytes to {}",
            written,
            bytes.len(),
            path.display()
        )));
    }

    staged.persist(path).map_err(|e| failed("move into", e.error))?;
    debug!(path = %path.display(), "staged file moved into place");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn now() -> NaiveDateTime {
        NaiveDateTime::parse_from_str("2024-01-01 12:00:00", "%Y-%m-%d %H:%M:%S").unwrap()
    }

    #[test]
    fn test_default_paths() {
        let dir = Path::new("output");
        assert_eq!(
            default_audio_path(dir, "wav", now()),
            PathBuf::from("output/convergence_audio_20240101_120000.wav")
        );
        assert_eq!(
            default_transcript_path(dir, now()),
            PathBuf::from("output/conversation_20240101_120000.json")
        );
    }

    #[test]
    fn test_fallback_path_swaps_extension() {
        assert_eq!(
            fallback_transcript_path(Path::new("out/podcast.wav")),
            PathBuf::from("out/podcast.json")
        );
        assert_eq!(
            fallback_transcript_path(Path::new("out/podcast")),
            PathBuf::from("out/podcast.json")
        );
    }

    #[tokio::test]
    async fn test_write_creates_directories() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested/deeper/clip.wav");

        write_artifact(&path, b"RIFFdata").await.unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"RIFFdata");

        // Existing directory is fine.
        write_artifact(&path, b"again").await.unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"again");
    }

    #[tokio::test]
    async fn test_write_fails_when_parent_is_a_file() {
        let dir = tempdir().unwrap();
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, b"x").unwrap();

        let err = write_artifact(&blocker.join("clip.wav"), b"data").await.unwrap_err();
        assert!(matches!(err, ConvergenceError::PersistenceFailed(_)));
    }

    #[tokio::test]
    async fn test_failed_write_leaves_nothing_behind() {
        let dir = tempdir().unwrap();
        // A non-empty directory at the target makes the final rename fail.
        let target = dir.path().join("clip.wav");
        std::fs::create_dir(&target).unwrap();
        std::fs::write(target.join("keep"), b"x").unwrap();

        let err = write_artifact(&target, b"RIFFdata").await.unwrap_err();
        assert!(matches!(err, ConvergenceError::PersistenceFailed(_)));

        assert!(target.is_dir());
        let entries: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(entries, vec![std::ffi::OsString::from("clip.wav")]);
    }

    #[tokio::test]
    async fn test_write_replaces_existing_file_whole() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("clip.wav");
        std::fs::write(&path, vec![7u8; 4096]).unwrap();

        write_artifact(&path, b"short").await.unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"short");
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }
}
