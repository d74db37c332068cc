//! WalkWorthy scan pipeline.
//!
//! Turns a linked user's upcoming Canvas workload into one pending
//! encouragement: stress heuristics, verse candidate retrieval, a guarded
//! model selection, and a deterministic fallback when anything upstream fails.

pub mod agent;
pub mod candidates;
pub mod canvas;
pub mod config;
pub mod delivery;
pub mod fallback;
pub mod heuristics;
pub mod orchestrator;
pub mod profile;
pub mod secrets;
pub mod store;
pub mod verses;

pub use orchestrator::{BatchReport, BatchStatus, ScanError, ScanOutcome, Scanner};
pub use profile::ProfileCache;
