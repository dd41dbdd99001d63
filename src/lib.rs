//! clickstream-sink: consume clickstream events from a stream and persist
//! them as time-partitioned Parquet objects.
//!
//! Events are validated and normalized, accumulated into fixed-size batches,
//! written to object storage, and only then acknowledged to the stream. A
//! crash between upload and commit redelivers the batch (at-least-once).
//!
//! # Example
//!
//! ```ignore
//! use clickstream_sink::{Config, run_pipeline};
//! use clickstream_sink::error::{ConfigSnafu, PipelineError};
//! use snafu::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), PipelineError> {
//!     let config = Config::from_env().context(ConfigSnafu)?;
//!     let stats = run_pipeline(config).await?;
//!     println!("Uploaded {} artifacts", stats.artifacts_uploaded);
//!     Ok(())
//! }
//! ```

pub mod batch;
pub mod config;
pub mod error;
pub mod event;
pub mod generator;
pub mod logging;
pub mod metrics;
pub mod pipeline;
pub mod sink;
pub mod source;
pub mod storage;

// Re-export main types
pub use config::Config;
#[cfg(feature = "kafka")]
pub use pipeline::run_pipeline;
pub use pipeline::{Pipeline, PipelineStats};
pub use storage::{StorageProvider, StorageProviderRef};
