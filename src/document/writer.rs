//! Shared, lock-guarded document handle
//!
//! Concurrent synthesis units append to the same document and the whole
//! document is rewritten to `main.tf` after every append. One
//! `tokio::sync::Mutex` covers the append → truncate → write → close cycle, so
//! no unit ever observes (or writes) a half-updated file.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::debug;

use super::{Document, ResourceBlock};
use crate::{Error, Result};

/// Name of the generated artifact inside the working directory
pub const MAIN_TF: &str = "main.tf";

struct Inner {
    document: Document,
    path: PathBuf,
}

/// Cloneable handle to a document and the file it is flushed to
#[derive(Clone)]
pub struct SharedDocument {
    inner: Arc<Mutex<Inner>>,
}

impl SharedDocument {
    /// Wrap a document that flushes to `<work_dir>/main.tf`
    pub fn new(document: Document, work_dir: impl AsRef<Path>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                document,
                path: work_dir.as_ref().join(MAIN_TF),
            })),
        }
    }

    /// Path of the generated artifact
    pub async fn path(&self) -> PathBuf {
        self.inner.lock().await.path.clone()
    }

    /// Append blocks as one step and rewrite the artifact
    ///
    /// The lock is held for the whole cycle. The in-memory document only
    /// changes once the file write succeeds, so a rejected append or a failed
    /// write leaves both as they were.
    pub async fn append_and_flush(&self, blocks: Vec<ResourceBlock>) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let count = blocks.len();
        let mut next = inner.document.clone();
        next.append_all(blocks)?;
        write_truncating(&inner.path, &next.serialize()?).await?;
        inner.document = next;
        debug!(blocks = count, total = inner.document.len(), path = %inner.path.display(), "flushed document");
        Ok(())
    }

    /// Replace the whole document and rewrite the artifact
    pub async fn replace_and_flush(&self, document: Document) -> Result<()> {
        let mut inner = self.inner.lock().await;
        write_truncating(&inner.path, &document.serialize()?).await?;
        inner.document = document;
        debug!(total = inner.document.len(), path = %inner.path.display(), "rewrote document");
        Ok(())
    }

    /// Copy of the current document
    pub async fn snapshot(&self) -> Document {
        self.inner.lock().await.document.clone()
    }
}

async fn write_truncating(path: &Path, contents: &str) -> Result<()> {
    let mut file = tokio::fs::File::create(path)
        .await
        .map_err(|e| Error::io(path, e))?;
    file.write_all(contents.as_bytes())
        .await
        .map_err(|e| Error::io(path, e))?;
    file.flush().await.map_err(|e| Error::io(path, e))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::Body;

    fn registry(name: &str) -> ResourceBlock {
        ResourceBlock::resource("null_resource", name, Body::new().attr("host", "10.0.0.1"))
    }

    #[tokio::test]
    async fn flush_rewrites_the_whole_document() {
        let dir = tempfile::tempdir().unwrap();
        let shared = SharedDocument::new(Document::default(), dir.path());

        shared.append_and_flush(vec![registry("auth_registry")]).await.unwrap();
        shared.append_and_flush(vec![registry("global_registry")]).await.unwrap();

        let text = std::fs::read_to_string(dir.path().join(MAIN_TF)).unwrap();
        assert_eq!(text.matches("resource \"null_resource\"").count(), 2);
        assert_eq!(text, shared.snapshot().await.serialize().unwrap());
    }

    #[tokio::test]
    async fn rejected_append_leaves_file_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let shared = SharedDocument::new(Document::default(), dir.path());
        shared.append_and_flush(vec![registry("auth_registry")]).await.unwrap();
        let before = std::fs::read_to_string(dir.path().join(MAIN_TF)).unwrap();

        assert!(shared.append_and_flush(vec![registry("auth_registry")]).await.is_err());

        let after = std::fs::read_to_string(dir.path().join(MAIN_TF)).unwrap();
        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn failed_write_can_be_retried() {
        let dir = tempfile::tempdir().unwrap();
        let work_dir = dir.path().join("not-yet");
        let shared = SharedDocument::new(Document::default(), &work_dir);

        let err = shared.append_and_flush(vec![registry("auth_registry")]).await.unwrap_err();
        assert!(matches!(err, Error::Io { .. }));
        assert!(shared.snapshot().await.is_empty());

        std::fs::create_dir(&work_dir).unwrap();
        shared.append_and_flush(vec![registry("auth_registry")]).await.unwrap();
        let text = std::fs::read_to_string(work_dir.join(MAIN_TF)).unwrap();
        assert!(text.contains("resource \"null_resource\" \"auth_registry\""));
        assert_eq!(shared.snapshot().await.len(), 1);
    }

    #[tokio::test]
    async fn failed_replace_keeps_the_previous_document() {
        let dir = tempfile::tempdir().unwrap();
        let work_dir = dir.path().join("not-yet");
        let shared = SharedDocument::new(Document::default(), &work_dir);

        let mut next = Document::default();
        next.append(registry("global_registry")).unwrap();
        assert!(shared.replace_and_flush(next).await.is_err());
        assert!(shared.snapshot().await.is_empty());
    }

    #[tokio::test]
    async fn concurrent_appends_all_land() {
        let dir = tempfile::tempdir().unwrap();
        let shared = SharedDocument::new(Document::default(), dir.path());

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let shared = shared.clone();
                tokio::spawn(async move {
                    shared
                        .append_and_flush(vec![registry(&format!("registry_{i}"))])
                        .await
                })
            })
            .collect();
        for handle in futures::future::join_all(handles).await {
            handle.unwrap().unwrap();
        }

        assert_eq!(shared.snapshot().await.len(), 8);
        let text = std::fs::read_to_string(dir.path().join(MAIN_TF)).unwrap();
        assert_eq!(text.matches("resource \"null_resource\"").count(), 8);
    }

    #[tokio::test]
    async fn unwritable_path_is_an_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let shared = SharedDocument::new(Document::default(), dir.path().join("missing"));
        let err = shared.append_and_flush(vec![registry("x")]).await.unwrap_err();
        assert!(matches!(err, Error::Io { .. }));
    }
}
