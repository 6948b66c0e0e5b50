use std::path::{Path, PathBuf};

use thiserror::Error;
use tokio::fs;

use llc_core::error::{ErrorCode, LlcError};

#[derive(Debug, Error)]
pub enum BlobError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl LlcError for BlobError {
    fn error_code(&self) -> ErrorCode {
        ErrorCode::IngestFail
    }
}

/// Blob placement kind within a document's tree (§4.3/§4.4 ingest pipeline).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlobKind {
    Original,
    Normalized,
    Thumbnail,
    PdfPage(u32),
}

impl BlobKind {
    fn path_segment(self) -> String {
        match self {
            BlobKind::Original => "original".to_string(),
            BlobKind::Normalized => "normalized".to_string(),
            BlobKind::Thumbnail => "thumbs".to_string(),
            BlobKind::PdfPage(page) => format!("pdf_pages/{page:05}"),
        }
    }
}

/// Content-addressed blob storage rooted at `containers/{container}/{doc}/...`.
/// Writes are idempotent: re-putting identical bytes at the same path is a
/// no-op beyond the rename.
pub struct BlobStore {
    root: PathBuf,
}

impl BlobStore {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    fn path_for(&self, container_id: &str, doc_id: &str, kind: BlobKind, file_name: &str) -> PathBuf {
        self.root
            .join("containers")
            .join(container_id)
            .join(doc_id)
            .join(kind.path_segment())
            .join(file_name)
    }

    pub async fn put(
        &self,
        container_id: &str,
        doc_id: &str,
        kind: BlobKind,
        file_name: &str,
        bytes: &[u8],
    ) -> Result<PathBuf, BlobError> {
        let path = self.path_for(container_id, doc_id, kind, file_name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let tmp_path = path.with_extension("tmp");
        fs::write(&tmp_path, bytes).await?;
        fs::rename(&tmp_path, &path).await?;
        Ok(path)
    }

    pub async fn get(
        &self,
        container_id: &str,
        doc_id: &str,
        kind: BlobKind,
        file_name: &str,
    ) -> Result<Vec<u8>, BlobError> {
        let path = self.path_for(container_id, doc_id, kind, file_name);
        Ok(fs::read(path).await?)
    }

    pub async fn delete_document(&self, container_id: &str, doc_id: &str) -> Result<(), BlobError> {
        let dir = self.root.join("containers").join(container_id).join(doc_id);
        match fs::remove_dir_all(dir).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(BlobError::Io(err)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn put_then_get_round_trips_bytes() {
        let dir = tempdir().unwrap();
        let store = BlobStore::new(dir.path());

        store
            .put("c1", "d1", BlobKind::Original, "source.pdf", b"%PDF-1.4")
            .await
            .unwrap();

        let read_back = store
            .get("c1", "d1", BlobKind::Original, "source.pdf")
            .await
            .unwrap();
        assert_eq!(read_back, b"%PDF-1.4");
    }

    #[tokio::test]
    async fn pdf_page_blobs_are_keyed_by_page_number() {
        let dir = tempdir().unwrap();
        let store = BlobStore::new(dir.path());

        store
            .put("c1", "d1", BlobKind::PdfPage(3), "page.png", b"page-three")
            .await
            .unwrap();
        store
            .put("c1", "d1", BlobKind::PdfPage(4), "page.png", b"page-four")
            .await
            .unwrap();

        assert_eq!(
            store.get("c1", "d1", BlobKind::PdfPage(3), "page.png").await.unwrap(),
            b"page-three"
        );
        assert_eq!(
            store.get("c1", "d1", BlobKind::PdfPage(4), "page.png").await.unwrap(),
            b"page-four"
        );
    }

    #[tokio::test]
    async fn delete_document_removes_all_kinds() {
        let dir = tempdir().unwrap();
        let store = BlobStore::new(dir.path());

        store
            .put("c1", "d1", BlobKind::Original, "a.txt", b"hello")
            .await
            .unwrap();
        store.delete_document("c1", "d1").await.unwrap();

        assert!(store.get("c1", "d1", BlobKind::Original, "a.txt").await.is_err());
    }
}
