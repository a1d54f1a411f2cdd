//! Retry policy for failed stages.
//!
//! A failure always bumps the item's retry counter. Below the cap the item
//! goes back to `todo` and restarts from acquisition, whatever stage failed.
//! At or above the cap it becomes `failed` until an operator retries it.

use tracing::{error, warn};

use crate::config::DEFAULT_MAX_RETRIES;
use crate::domain::Status;
use crate::store::{StoreResult, WorkItemStore};

/// Outcome of a retry decision
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Back to `todo` for another attempt
    Requeue,
    /// Terminal `failed`
    Fail,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32) -> Self {
        Self { max_retries }
    }

    /// Decide from the retry count after it has been incremented
    pub fn decide(&self, retries: u32) -> RetryDecision {
        if retries < self.max_retries {
            RetryDecision::Requeue
        } else {
            RetryDecision::Fail
        }
    }

    /// Record a failure for `id` and persist the resulting status
    pub fn apply(&self, store: &WorkItemStore, id: &str, err: &str) -> StoreResult<RetryDecision> {
        let retries = store.record_retry(id)?;
        let decision = self.decide(retries);

        match decision {
            RetryDecision::Requeue => {
                warn!(%id, retries, max = self.max_retries, error = %err, "Stage failed, requeueing");
                store.update_status(id, Status::Todo, Some(err))?;
            }
            RetryDecision::Fail => {
                error!(%id, retries, max = self.max_retries, error = %err, "Stage failed, retries exhausted");
                store.update_status(id, Status::Failed, Some(err))?;
            }
        }

        Ok(decision)
    }
}
