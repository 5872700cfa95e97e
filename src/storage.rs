//! Ephemeral, request-scoped files.
//!
//! Each file gets a random name from `tempfile`, so concurrent requests never
//! share a path. The [`EphemeralFile`] guard deletes the file when dropped,
//! whichever way the request ends.

use std::io;
use std::path::Path;
use tempfile::TempPath;
use tokio::io::AsyncWriteExt;

#[derive(Debug)]
pub struct EphemeralFile {
    path: TempPath,
}

impl EphemeralFile {
    /// Reserve a new, empty file in `dir`.
    pub fn create_in(dir: &Path, prefix: &str, suffix: &str) -> io::Result<Self> {
        let path = tempfile::Builder::new()
            .prefix(prefix)
            .suffix(suffix)
            .tempfile_in(dir)?
            .into_temp_path();
        Ok(Self { path })
    }

    /// Reserve a file and fill it with `contents`, waiting until the data is
    /// flushed to disk.
    pub async fn write_in(
        dir: &Path,
        prefix: &str,
        suffix: &str,
        contents: &[u8],
    ) -> io::Result<Self> {
        let file = Self::create_in(dir, prefix, suffix)?;
        let mut handle = tokio::fs::File::create(file.path()).await?;
        handle.write_all(contents).await?;
        handle.flush().await?;
        handle.sync_all().await?;
        Ok(file)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn read(&self) -> io::Result<Vec<u8>> {
        tokio::fs::read(self.path()).await
    }
}

impl Drop for EphemeralFile {
    fn drop(&mut self) {
        // TempPath retries the removal silently afterwards; this pass logs.
        match std::fs::remove_file(&self.path) {
            Ok(()) => tracing::trace!("Removed temporary file {}", self.path.display()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!(
                "Failed to remove temporary file {}: {}",
                self.path.display(),
                e
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn file_is_removed_when_guard_drops() {
        let dir = tempfile::tempdir().unwrap();
        let file = EphemeralFile::write_in(dir.path(), "upload_", "", b"leaf")
            .await
            .unwrap();
        let path = file.path().to_path_buf();
        assert_eq!(file.read().await.unwrap(), b"leaf");
        assert!(path.exists());

        drop(file);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn concurrent_files_get_distinct_paths() {
        let dir = tempfile::tempdir().unwrap();
        let (a, b) = tokio::join!(
            EphemeralFile::write_in(dir.path(), "plant_analysis_", ".pdf", b"a"),
            EphemeralFile::write_in(dir.path(), "plant_analysis_", ".pdf", b"b"),
        );
        let (a, b) = (a.unwrap(), b.unwrap());
        assert_ne!(a.path(), b.path());
        assert_eq!(a.read().await.unwrap(), b"a");
        assert_eq!(b.read().await.unwrap(), b"b");
    }

    #[test]
    fn drop_tolerates_an_already_deleted_file() {
        let dir = tempfile::tempdir().unwrap();
        let file = EphemeralFile::create_in(dir.path(), "gone_", ".tmp").unwrap();
        std::fs::remove_file(file.path()).unwrap();
        drop(file);
    }
}
