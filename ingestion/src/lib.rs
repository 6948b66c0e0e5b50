pub mod api;
pub mod chunker;
pub mod embedding;
pub mod extract;
pub mod policy;
pub mod processor;

pub use processor::{IngestOutcome, IngestionError, IngestionPipeline};
