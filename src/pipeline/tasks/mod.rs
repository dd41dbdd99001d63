//! The two cooperating pipeline tasks.
//!
//! The reader consumes and accumulates; the coordinator serializes, uploads
//! and commits. They are joined by a bounded channel of sealed batches.

mod coordinator;
mod reader;

pub use coordinator::{CommitCoordinator, CoordinatorStats, FlushState};
pub use reader::{ReaderStats, StreamReader};
