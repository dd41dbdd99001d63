//! Serialization and persistence of sealed batches.

pub mod dead_letter;
pub mod key;
pub mod parquet;
pub mod publisher;

pub use dead_letter::encode_ndjson;
pub use key::ArtifactKeyGenerator;
pub use parquet::{Artifact, ColumnarWriter, to_record_batch};
pub use publisher::{ObjectPublisher, StoragePublisher};
