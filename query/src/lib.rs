pub mod dsl;
pub mod engine;

pub use dsl::{SearchMode, SearchRequest, SearchValidationError};
pub use engine::{
    RequestStage, ResponseEnvelope, RetrievalEngine, RetrievalEngineConfig, SearchData,
    SearchError, SearchResponse, SearchResultItem, StageScores,
};
