//! Core pipeline logic.
//!
//! This module contains:
//! - Resolver: Maps item ids to artifact files
//! - Orchestrator: Claims items and drives them through the stages
//! - Retry: Requeue-or-fail decisions for failed stages
//! - Reporting: Status counts, failures, and operator retry

pub mod error;
pub mod orchestrator;
pub mod reporting;
pub mod resolver;
pub mod retry;

// Re-export commonly used types
pub use error::StageError;
pub use orchestrator::{Collaborators, Orchestrator, RunReport};
pub use reporting::{Reporter, StatusSummary};
pub use resolver::{ArtifactKind, ArtifactLocation, ArtifactResolver};
pub use retry::{RetryDecision, RetryPolicy};
