use crate::model::Modality;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;

/// `Source.modality` before resolution; `Auto` is resolved by the ingestion
/// pipeline's content-kind detection (§4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceModality {
    Auto,
    Text,
    Pdf,
    Image,
    Web,
}

impl SourceModality {
    pub fn resolved(self) -> Option<Modality> {
        match self {
            SourceModality::Auto => None,
            SourceModality::Text => Some(Modality::Text),
            SourceModality::Pdf => Some(Modality::Pdf),
            SourceModality::Image => Some(Modality::Image),
            SourceModality::Web => Some(Modality::Web),
        }
    }
}

/// `Source = { uri | file_ref, modality, title?, mime?, meta? }` (§4.4).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Source {
    pub uri: Option<String>,
    pub file_ref: Option<Vec<u8>>,
    pub filename: Option<String>,
    pub modality: SourceModality,
    pub title: Option<String>,
    pub mime: Option<String>,
    pub meta: HashMap<String, String>,
}

impl Source {
    pub fn from_uri(uri: impl Into<String>, modality: SourceModality) -> Self {
        Self {
            uri: Some(uri.into()),
            file_ref: None,
            filename: None,
            modality,
            title: None,
            mime: None,
            meta: HashMap::new(),
        }
    }

    pub fn from_bytes(
        filename: impl Into<String>,
        bytes: Vec<u8>,
        mime: impl Into<String>,
        modality: SourceModality,
    ) -> Self {
        Self {
            uri: None,
            file_ref: Some(bytes),
            filename: Some(filename.into()),
            modality,
            title: None,
            mime: Some(mime.into()),
            meta: HashMap::new(),
        }
    }
}

pub trait ContentHash {
    /// SHA-256 of the raw original bytes (§3 `Document.content_hash`,
    /// §4.4 step 1 "content hash (SHA-256 of raw chunk bytes)").
    fn content_hash(&self) -> String;
}

impl ContentHash for Source {
    fn content_hash(&self) -> String {
        let mut hasher = Sha256::new();
        match (&self.uri, &self.file_ref) {
            (Some(uri), _) => {
                hasher.update(b"uri");
                hasher.update(uri.as_bytes());
            }
            (None, Some(bytes)) => {
                hasher.update(b"bytes");
                hasher.update(bytes);
            }
            (None, None) => {}
        }
        format!("{:x}", hasher.finalize())
    }
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_hash_is_stable_for_same_uri() {
        let a = Source::from_uri("https://example.com/a.pdf", SourceModality::Pdf);
        let b = Source::from_uri("https://example.com/a.pdf", SourceModality::Pdf);
        assert_eq!(a.content_hash(), b.content_hash());
    }

    #[test]
    fn content_hash_differs_for_different_bytes() {
        let a = Source::from_bytes("a.txt", b"hello".to_vec(), "text/plain", SourceModality::Text);
        let b = Source::from_bytes("a.txt", b"world".to_vec(), "text/plain", SourceModality::Text);
        assert_ne!(a.content_hash(), b.content_hash());
    }
}
