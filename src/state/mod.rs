//! Snapshot persistence for resumable operations
//!
//! Handles:
//! - Snapshotting every non-terminal operation after each change
//! - Loading them at start-up so polling resumes from the last known state
//! - Dropping operations once they are terminal

mod store;

pub use store::OperationStore;
