use std::collections::HashMap;

use llc_core::ingest::{Source, SourceModality};
use serde::{Deserialize, Serialize};

/// JSON-body ingest payload (§4.1 `POST /containers/{id}/ingest`, content
/// passed inline rather than as a multipart file).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonIngestionPayload {
    pub content: String,
    pub content_type: String,
    pub modality: Option<SourceModality>,
    pub title: Option<String>,
    #[serde(default)]
    pub meta: HashMap<String, String>,
}

impl JsonIngestionPayload {
    pub fn into_source(self) -> Source {
        let modality = self.modality.unwrap_or(SourceModality::Auto);
        let mut source = Source::from_bytes("inline", self.content.into_bytes(), self.content_type, modality);
        source.title = self.title;
        source.meta = self.meta;
        source
    }
}

/// Multipart-upload ingest payload carrying raw file bytes.
#[derive(Debug, Clone)]
pub struct MultipartIngestionPayload {
    pub filename: String,
    pub content: Vec<u8>,
    pub mime_type: String,
    pub modality: Option<SourceModality>,
    pub title: Option<String>,
    pub meta: HashMap<String, String>,
}

impl MultipartIngestionPayload {
    pub fn into_source(self) -> Source {
        let modality = self.modality.unwrap_or(SourceModality::Auto);
        let mut source = Source::from_bytes(self.filename, self.content, self.mime_type, modality);
        source.title = self.title;
        source.meta = self.meta;
        source
    }
}

/// Reference-only ingest payload: the caller has already fetched the bytes
/// for a `uri` source (§4.4 "uri-only sources require pre-fetched content"
/// — no outbound network fetching is performed by this crate).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UriIngestionPayload {
    pub uri: String,
    pub modality: Option<SourceModality>,
    pub title: Option<String>,
    #[serde(default)]
    pub meta: HashMap<String, String>,
}

impl UriIngestionPayload {
    pub fn into_source(self) -> Source {
        let modality = self.modality.unwrap_or(SourceModality::Auto);
        let mut source = Source::from_uri(self.uri, modality);
        source.title = self.title;
        source.meta = self.meta;
        source
    }
}
