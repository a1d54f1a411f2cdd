//! Read-only views over the store plus the operator retry command.

use std::collections::BTreeMap;

use tracing::info;

use crate::domain::{Stage, Status, WorkItem};
use crate::store::{StoreError, StoreResult, WorkItemStore};

/// Item counts per status
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusSummary {
    /// Every status, including those with no items
    pub counts: BTreeMap<Status, usize>,
}

impl StatusSummary {
    pub fn total(&self) -> usize {
        self.counts.values().sum()
    }

    pub fn count(&self, status: Status) -> usize {
        self.counts.get(&status).copied().unwrap_or(0)
    }
}

pub struct Reporter<'a> {
    store: &'a WorkItemStore,
}

impl<'a> Reporter<'a> {
    pub fn new(store: &'a WorkItemStore) -> Self {
        Self { store }
    }

    pub fn status_summary(&self) -> StoreResult<StatusSummary> {
        let mut counts: BTreeMap<Status, usize> =
            Status::ALL.into_iter().map(|s| (s, 0)).collect();
        counts.extend(self.store.count_by_status()?);
        Ok(StatusSummary { counts })
    }

    /// Up to `n` failed items, most recent first
    pub fn recent_failures(&self, n: usize) -> StoreResult<Vec<WorkItem>> {
        self.store.failures(Some(n))
    }

    /// Every failed item with its error
    pub fn errors(&self) -> StoreResult<Vec<WorkItem>> {
        self.store.failures(None)
    }

    /// Send an item back to the entry state of `stage` (acquire if unset).
    /// The retry counter is left alone.
    pub fn retry(&self, id: &str, stage: Option<Stage>) -> StoreResult<Status> {
        if self.store.get(id)?.is_none() {
            return Err(StoreError::NotFound(id.to_string()));
        }
        let status = self.store.reset_for_stage(id, stage)?;
        info!(%id, %status, "Operator retry");
        Ok(status)
    }
}
