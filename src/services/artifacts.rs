//! Ephemeral on-disk storage for result images.
//!
//! A result image is written once and exposed through an [`ImageHandle`].
//! Dropping the handle deletes the file, so a superseded result never
//! outlives the controller state that owned it.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use uuid::Uuid;

use crate::models::job::JobId;

/// Directory-backed store handing out self-releasing image handles.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
    live: Arc<AtomicUsize>,
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> std::io::Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            live: Arc::new(AtomicUsize::new(0)),
        })
    }

    /// Write image bytes for a job and return a handle owning the file.
    pub async fn store_image(&self, job_id: &JobId, bytes: &[u8]) -> std::io::Result<ImageHandle> {
        let extension = image::guess_format(bytes)
            .ok()
            .and_then(|format| format.extensions_str().first().copied())
            .unwrap_or("bin");

        let file_name = format!("{}-{}.{}", sanitize(job_id.as_str()), Uuid::new_v4(), extension);
        let path = self.root.join(file_name);
        tokio::fs::write(&path, bytes).await?;

        self.live.fetch_add(1, Ordering::SeqCst);
        tracing::debug!(job_id = %job_id, path = %path.display(), "Stored result image");

        Ok(ImageHandle {
            path,
            live: Arc::clone(&self.live),
        })
    }

    /// Number of handles that have not been released yet.
    pub fn live_handles(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }
}

fn sanitize(id: &str) -> String {
    id.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

/// Owns one stored result image; the file is removed on drop.
#[derive(Debug)]
pub struct ImageHandle {
    path: PathBuf,
    live: Arc<AtomicUsize>,
}

impl ImageHandle {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for ImageHandle {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "Failed to release result image");
            }
        }
        self.live.fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_handle_releases_file_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path()).unwrap();

        let handle = store
            .store_image(&JobId::new("abc"), b"\x89PNG\r\n\x1a\n")
            .await
            .unwrap();
        let path = handle.path().to_path_buf();

        assert!(path.exists());
        assert_eq!(path.extension().unwrap(), "png");
        assert_eq!(store.live_handles(), 1);

        drop(handle);
        assert!(!path.exists());
        assert_eq!(store.live_handles(), 0);
    }

    #[tokio::test]
    async fn test_unknown_bytes_and_odd_ids() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path()).unwrap();

        let handle = store
            .store_image(&JobId::new("../escape"), b"opaque")
            .await
            .unwrap();

        assert_eq!(handle.path().parent().unwrap(), dir.path());
        assert_eq!(handle.path().extension().unwrap(), "bin");
    }
}
