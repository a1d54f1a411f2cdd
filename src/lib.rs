//! graphmem - Video to knowledge-graph pipeline
//!
//! Moves videos through `acquire -> transcribe -> ingest` with crash-safe
//! claiming, bounded retries, and resumption from on-disk artifacts.
//!
//! # Architecture
//!
//! All pipeline state lives in one SQLite database:
//! - Workers claim items atomically, so any number can share a database
//! - A failed stage requeues the item from the start or marks it failed
//! - Existing media and transcript files are reused instead of recomputed
//!
//! # Modules
//!
//! - `adapters`: External collaborators (yt-dlp, offmute, Deepgram, Graphiti)
//! - `core`: Orchestration logic (Orchestrator, Retry, Resolver, Reporting)
//! - `domain`: Data structures (ItemId, WorkItem, Status, Transcript)
//! - `store`: SQLite work-item store
//! - `cli`: Command-line interface
//!
//! # Usage
//!
//! ```bash
//! # Enqueue a channel's latest videos
//! graphmem prepare --channel-url https://www.youtube.com/@somechannel --limit 10 --scope somechannel
//!
//! # Run the whole pipeline with four workers
//! graphmem run --workers 4
//!
//! # Or scale a single stage
//! graphmem run transcribe
//!
//! # Inspect and recover
//! graphmem status
//! graphmem retry somechannel/abc123 --stage ingest
//! ```

pub mod adapters;
pub mod cli;
pub mod config;
pub mod core;
pub mod domain;
pub mod store;

// Re-export main types at crate root for convenience
pub use core::{Collaborators, Orchestrator, RetryPolicy, RunReport};
pub use domain::{ItemId, NewWorkItem, Source, Stage, Status, WorkItem};
pub use store::WorkItemStore;
