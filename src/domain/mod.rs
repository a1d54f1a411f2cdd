//! Domain types for the graphmem pipeline.
//!
//! This module contains the core data structures:
//! - ItemId: Flat or composite (`scope/leaf`) identifiers
//! - WorkItem: A video moving through the pipeline
//! - Stage/Status: The stage table and item state machine
//! - Transcript: Segments, analysis, and the transcript document

pub mod id;
pub mod item;
pub mod stage;
pub mod transcript;

// Re-export commonly used types
pub use id::{ItemId, ItemIdError};
pub use item::{NewWorkItem, Source, WorkItem};
pub use stage::{Stage, Status};
pub use transcript::{Analysis, Segment, TranscriptOutput};
