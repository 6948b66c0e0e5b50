//! In-process facade over `storage`/`ingestion`/`jobs`/`query` implementing
//! the four §6 operations (Search, Ingest, Describe/list, Jobs status) as
//! plain async functions. No network transport lives here — that surface is
//! explicitly out of scope (§2 Non-goals).

pub mod client;
pub mod handler;

pub use client::{
    ContainerSummary, IngestMode, IngestRequest, IngestResponse, JobStub, JobStatusResponse,
    LlcClient, LlcClientConfig, SdkError,
};
pub use handler::IngestJobHandler;
