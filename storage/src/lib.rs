pub mod blob;
pub mod bm25_index;
pub mod crypto;
pub mod index;
pub mod relational;
pub mod snapshot;
pub mod vector;
pub mod wal;

pub use blob::{BlobError, BlobKind, BlobStore};
pub use relational::{RelationalStore, StoreError};
pub use vector::{VectorError, VectorStore};
