// src/lib.rs
// Public library surface for the binaries and integration tests.

pub mod adapters;
pub mod compose;
pub mod config;
pub mod domains;
pub mod identity;
pub mod maintenance;
pub mod pipeline;
pub mod queue;
pub mod registry;
pub mod select;
pub mod store;
pub mod telemetry;
pub mod types;

// ---- Re-exports for stable public API ----
pub use crate::config::PipelineConfig;
pub use crate::pipeline::{Pipeline, RunOutcome, RunReport};
pub use crate::queue::WorkQueue;
pub use crate::registry::{DedupWindows, PostedRegistry};
pub use crate::types::{CandidateItem, PostedEntry, QueueEntry, Summary};
