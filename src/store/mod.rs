//! SQLite-backed work-item store.
//!
//! Holds the durable pipeline state: work items, their transcript segments,
//! and one analysis row per item. Any number of workers may open the same
//! database file; `claim_next` is the only operation that needs
//! synchronization and runs inside an exclusive transaction.

pub mod schema;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};
use thiserror::Error;
use tracing::{debug, info};

use crate::domain::{Analysis, NewWorkItem, Segment, Source, Stage, Status, WorkItem};

/// Errors that can occur in the work-item store
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Work item not found: {0}")]
    NotFound(String),

    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Store connection lock poisoned")]
    LockPoisoned,

    #[error("Store task failed: {0}")]
    TaskFailed(#[from] tokio::task::JoinError),
}

pub type StoreResult<T> = Result<T, StoreError>;

const ITEM_COLUMNS: &str = "id, title, source, source_ref, status, retries, duration_sec, \
     media_path, transcript_path, claimed_by, created_at, updated_at, error";

/// Handle to the pipeline database
pub struct WorkItemStore {
    conn: Mutex<Connection>,
    path: PathBuf,
}

impl WorkItemStore {
    /// Open (or create) the store at the given path.
    ///
    /// `busy_timeout` bounds how long a call waits for another worker's
    /// transaction before failing with `SQLITE_BUSY`.
    pub fn open(path: &Path, busy_timeout: Duration) -> StoreResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;
        conn.busy_timeout(busy_timeout)?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA foreign_keys = ON;",
        )?;

        schema::create_schema(&conn)?;

        debug!(path = %path.display(), "Opened work-item store");

        Ok(Self {
            conn: Mutex::new(conn),
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn conn(&self) -> StoreResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StoreError::LockPoisoned)
    }

    /// Insert an item, or re-submit an existing one.
    ///
    /// Re-submission overwrites the metadata and resets status to `todo`,
    /// retries to 0, and clears the error. `created_at` and any segments or
    /// analysis from earlier runs are kept.
    pub fn upsert(&self, item: &NewWorkItem) -> StoreResult<()> {
        let now = Utc::now();
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO work_items
                (id, title, source, source_ref, status, retries, duration_sec, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, 'todo', 0, ?5, ?6, ?6)
             ON CONFLICT(id) DO UPDATE SET
                title = excluded.title,
                source = excluded.source,
                source_ref = excluded.source_ref,
                duration_sec = excluded.duration_sec,
                status = 'todo',
                retries = 0,
                error = NULL,
                claimed_by = NULL,
                updated_at = excluded.updated_at",
            params![
                item.id.to_string(),
                item.title,
                item.source.kind(),
                item.source.reference(),
                item.duration_sec,
                now,
            ],
        )?;
        Ok(())
    }

    /// Atomically claim the oldest item eligible for `stage`.
    ///
    /// `None` means no item is eligible. Two callers never receive the same
    /// item for the same stage.
    pub fn claim_next(&self, stage: Option<Stage>, worker: &str) -> StoreResult<Option<WorkItem>> {
        let (from, to) = Stage::claim_transition(stage);
        let mut conn = self.conn()?;

        let tx = conn.transaction_with_behavior(TransactionBehavior::Exclusive)?;
        let id: Option<String> = tx
            .query_row(
                "SELECT id FROM work_items WHERE status = ?1 ORDER BY created_at, rowid LIMIT 1",
                params![from],
                |row| row.get(0),
            )
            .optional()?;

        let Some(id) = id else {
            tx.commit()?;
            return Ok(None);
        };

        tx.execute(
            "UPDATE work_items SET status = ?1, claimed_by = ?2, updated_at = ?3 WHERE id = ?4",
            params![to, worker, Utc::now(), id],
        )?;
        tx.commit()?;

        debug!(%id, %from, %to, worker, "Claimed work item");
        fetch_item(&conn, &id)
    }

    /// Set the status unconditionally. `None` clears the error.
    pub fn update_status(&self, id: &str, status: Status, error: Option<&str>) -> StoreResult<()> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE work_items SET status = ?1, error = ?2, updated_at = ?3 WHERE id = ?4",
            params![status, error, Utc::now(), id],
        )?;
        expect_row(changed, id)
    }

    pub fn set_media_path(&self, id: &str, path: &Path) -> StoreResult<()> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE work_items SET media_path = ?1, updated_at = ?2 WHERE id = ?3",
            params![path.to_string_lossy(), Utc::now(), id],
        )?;
        expect_row(changed, id)
    }

    pub fn set_transcript_path(&self, id: &str, path: &Path) -> StoreResult<()> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE work_items SET transcript_path = ?1, updated_at = ?2 WHERE id = ?3",
            params![path.to_string_lossy(), Utc::now(), id],
        )?;
        expect_row(changed, id)
    }

    /// Replace all segments for an item
    pub fn save_segments(&self, id: &str, segments: &[Segment]) -> StoreResult<()> {
        let conn = self.conn()?;
        let tx = conn.unchecked_transaction()?;

        tx.execute("DELETE FROM segments WHERE work_item_id = ?1", [id])?;
        {
            let mut stmt = tx.prepare(
                "INSERT OR REPLACE INTO segments (work_item_id, start_sec, end_sec, text)
                 VALUES (?1, ?2, ?3, ?4)",
            )?;
            for seg in segments {
                stmt.execute(params![id, seg.start_sec, seg.end_sec, seg.text])?;
            }
        }

        tx.commit()?;
        Ok(())
    }

    /// Replace the analysis row for an item
    pub fn save_analysis(&self, id: &str, analysis: &Analysis) -> StoreResult<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT OR REPLACE INTO analysis (work_item_id, summary, topics, key_terms, chapters)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                id,
                analysis.summary,
                serde_json::to_string(&analysis.topics)?,
                serde_json::to_string(&analysis.key_terms)?,
                serde_json::to_string(&analysis.chapters)?,
            ],
        )?;
        Ok(())
    }

    /// Increment the retry counter and return the new value
    pub fn record_retry(&self, id: &str) -> StoreResult<u32> {
        let conn = self.conn()?;
        conn.query_row(
            "UPDATE work_items SET retries = retries + 1, updated_at = ?1 WHERE id = ?2
             RETURNING retries",
            params![Utc::now(), id],
            |row| row.get(0),
        )
        .optional()?
        .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    pub fn get(&self, id: &str) -> StoreResult<Option<WorkItem>> {
        let conn = self.conn()?;
        fetch_item(&conn, id)
    }

    /// All items in creation order
    pub fn list(&self) -> StoreResult<Vec<WorkItem>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM work_items ORDER BY created_at, rowid",
            ITEM_COLUMNS
        ))?;
        let items = stmt
            .query_map([], row_to_item)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(items)
    }

    /// Segments for an item, ordered by start time
    pub fn segments(&self, id: &str) -> StoreResult<Vec<Segment>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT start_sec, end_sec, text FROM segments
             WHERE work_item_id = ?1 ORDER BY start_sec",
        )?;
        let segments = stmt
            .query_map([id], |row| {
                Ok(Segment {
                    start_sec: row.get(0)?,
                    end_sec: row.get(1)?,
                    text: row.get(2)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(segments)
    }

    pub fn analysis(&self, id: &str) -> StoreResult<Option<Analysis>> {
        let conn = self.conn()?;
        let row: Option<(String, String, String, String)> = conn
            .query_row(
                "SELECT summary, topics, key_terms, chapters FROM analysis WHERE work_item_id = ?1",
                [id],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
            )
            .optional()?;

        row.map(|(summary, topics, key_terms, chapters)| {
            Ok(Analysis {
                summary,
                topics: serde_json::from_str(&topics)?,
                key_terms: serde_json::from_str(&key_terms)?,
                chapters: serde_json::from_str(&chapters)?,
            })
        })
        .transpose()
    }

    /// Item counts grouped by status
    pub fn count_by_status(&self) -> StoreResult<BTreeMap<Status, usize>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT status, COUNT(*) FROM work_items GROUP BY status")?;
        let counts = stmt
            .query_map([], |row| {
                let status: Status = row.get(0)?;
                let count: i64 = row.get(1)?;
                Ok((status, count as usize))
            })?
            .collect::<Result<BTreeMap<_, _>, _>>()?;
        Ok(counts)
    }

    /// Failed items with an error, most recently updated first
    pub fn failures(&self, limit: Option<usize>) -> StoreResult<Vec<WorkItem>> {
        let limit = limit.map(|n| n as i64).unwrap_or(-1);
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM work_items
             WHERE status = 'failed' AND error IS NOT NULL
             ORDER BY updated_at DESC, rowid DESC
             LIMIT ?1",
            ITEM_COLUMNS
        ))?;
        let items = stmt
            .query_map([limit], row_to_item)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(items)
    }

    /// Put an item back at the entry state of `stage` and clear its error.
    /// The retry counter is kept.
    pub fn reset_for_stage(&self, id: &str, stage: Option<Stage>) -> StoreResult<Status> {
        let target = stage.unwrap_or(Stage::Acquire).precondition();
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE work_items SET status = ?1, error = NULL, claimed_by = NULL, updated_at = ?2
             WHERE id = ?3",
            params![target, Utc::now(), id],
        )?;
        expect_row(changed, id)?;
        Ok(target)
    }

    /// Return items parked in an in-progress status for longer than
    /// `older_than` to the predecessor status of their stage.
    pub fn requeue_stale(&self, older_than: chrono::Duration) -> StoreResult<Vec<(String, Status)>> {
        let now = Utc::now();
        let cutoff = now - older_than;
        let conn = self.conn()?;
        let tx = conn.unchecked_transaction()?;

        let mut requeued = Vec::new();
        for stage in Stage::ALL {
            let mut stmt = tx.prepare(
                "UPDATE work_items SET status = ?1, claimed_by = NULL, updated_at = ?2
                 WHERE status = ?3 AND updated_at <= ?4
                 RETURNING id",
            )?;
            let ids = stmt
                .query_map(
                    params![stage.precondition(), now, stage.in_progress(), cutoff],
                    |row| row.get::<_, String>(0),
                )?
                .collect::<Result<Vec<_>, _>>()?;
            requeued.extend(ids.into_iter().map(|id| (id, stage.precondition())));
        }

        tx.commit()?;
        if !requeued.is_empty() {
            info!(count = requeued.len(), "Requeued stale in-progress items");
        }
        Ok(requeued)
    }
}

fn expect_row(changed: usize, id: &str) -> StoreResult<()> {
    if changed == 0 {
        return Err(StoreError::NotFound(id.to_string()));
    }
    Ok(())
}

fn fetch_item(conn: &Connection, id: &str) -> StoreResult<Option<WorkItem>> {
    let item = conn
        .query_row(
            &format!("SELECT {} FROM work_items WHERE id = ?1", ITEM_COLUMNS),
            [id],
            row_to_item,
        )
        .optional()?;
    Ok(item)
}

fn row_to_item(row: &Row<'_>) -> rusqlite::Result<WorkItem> {
    let kind: String = row.get(2)?;
    let reference: String = row.get(3)?;
    let source = Source::from_columns(&kind, reference).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            2,
            rusqlite::types::Type::Text,
            format!("unknown source kind '{}'", kind).into(),
        )
    })?;

    Ok(WorkItem {
        id: row.get(0)?,
        title: row.get(1)?,
        source,
        status: row.get(4)?,
        retries: row.get(5)?,
        duration_sec: row.get(6)?,
        media_path: row.get::<_, Option<String>>(7)?.map(PathBuf::from),
        transcript_path: row.get::<_, Option<String>>(8)?.map(PathBuf::from),
        claimed_by: row.get(9)?,
        created_at: row.get(10)?,
        updated_at: row.get(11)?,
        error: row.get(12)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ItemId;
    use tempfile::TempDir;

    fn create_test_store() -> (WorkItemStore, TempDir) {
        let temp = TempDir::new().unwrap();
        let store =
            WorkItemStore::open(&temp.path().join("pipeline.db"), Duration::from_secs(5)).unwrap();
        (store, temp)
    }

    fn enqueue(store: &WorkItemStore, id: &str) {
        let item = NewWorkItem::remote(id.parse::<ItemId>().unwrap(), format!("Video {}", id));
        store.upsert(&item).unwrap();
    }

    #[test]
    fn test_upsert_creates_todo_item() {
        let (store, _temp) = create_test_store();
        enqueue(&store, "abc");

        let item = store.get("abc").unwrap().unwrap();
        assert_eq!(item.status, Status::Todo);
        assert_eq!(item.retries, 0);
        assert_eq!(item.title, "Video abc");
        assert!(matches!(item.source, Source::Remote { .. }));
        assert!(item.error.is_none());
    }

    #[test]
    fn test_claim_returns_none_when_empty() {
        let (store, _temp) = create_test_store();
        assert!(store.claim_next(Some(Stage::Acquire), "w1").unwrap().is_none());

        enqueue(&store, "abc");
        // Nothing is acquired yet
        assert!(store.claim_next(Some(Stage::Transcribe), "w1").unwrap().is_none());
    }

    #[test]
    fn test_claim_transitions_status() {
        let (store, _temp) = create_test_store();
        enqueue(&store, "abc");

        let item = store.claim_next(None, "w1").unwrap().unwrap();
        assert_eq!(item.status, Status::Acquiring);
        assert_eq!(item.claimed_by.as_deref(), Some("w1"));

        store.update_status("abc", Status::Acquired, None).unwrap();
        let item = store.claim_next(Some(Stage::Transcribe), "w2").unwrap().unwrap();
        assert_eq!(item.status, Status::Transcribing);
        assert_eq!(item.claimed_by.as_deref(), Some("w2"));
    }

    #[test]
    fn test_update_status_sets_and_clears_error() {
        let (store, _temp) = create_test_store();
        enqueue(&store, "abc");

        store.update_status("abc", Status::Todo, Some("boom")).unwrap();
        assert_eq!(store.get("abc").unwrap().unwrap().error.as_deref(), Some("boom"));

        store.update_status("abc", Status::Acquired, None).unwrap();
        assert!(store.get("abc").unwrap().unwrap().error.is_none());

        assert!(matches!(
            store.update_status("missing", Status::Done, None),
            Err(StoreError::NotFound(_))
        ));
    }

    #[test]
    fn test_record_retry_increments() {
        let (store, _temp) = create_test_store();
        enqueue(&store, "abc");

        assert_eq!(store.record_retry("abc").unwrap(), 1);
        assert_eq!(store.record_retry("abc").unwrap(), 2);
        assert_eq!(store.get("abc").unwrap().unwrap().retries, 2);
        assert!(matches!(store.record_retry("nope"), Err(StoreError::NotFound(_))));
    }

    #[test]
    fn test_save_segments_replaces_previous() {
        let (store, _temp) = create_test_store();
        enqueue(&store, "abc");

        store
            .save_segments(
                "abc",
                &[Segment::new(5.0, 9.0, "second"), Segment::new(0.0, 5.0, "first")],
            )
            .unwrap();
        let segments = store.segments("abc").unwrap();
        assert_eq!(segments.len(), 2);
        assert_eq!(segments[0].text, "first");

        store
            .save_segments("abc", &[Segment::new(0.0, 3.0, "only")])
            .unwrap();
        assert_eq!(store.segments("abc").unwrap(), vec![Segment::new(0.0, 3.0, "only")]);
    }

    #[test]
    fn test_save_analysis_overwrites() {
        let (store, _temp) = create_test_store();
        enqueue(&store, "abc");
        assert!(store.analysis("abc").unwrap().is_none());

        let first = Analysis {
            summary: "first".to_string(),
            topics: vec!["a".to_string(), "b".to_string()],
            ..Default::default()
        };
        store.save_analysis("abc", &first).unwrap();
        assert_eq!(store.analysis("abc").unwrap(), Some(first));

        let second = Analysis {
            summary: "second".to_string(),
            chapters: vec!["Intro".to_string()],
            ..Default::default()
        };
        store.save_analysis("abc", &second).unwrap();
        assert_eq!(store.analysis("abc").unwrap(), Some(second));
    }

    #[test]
    fn test_counts_and_failures() {
        let (store, _temp) = create_test_store();
        for id in ["a", "b", "c"] {
            enqueue(&store, id);
        }
        store.update_status("a", Status::Failed, Some("first failure")).unwrap();
        store.update_status("b", Status::Failed, Some("second failure")).unwrap();

        let counts = store.count_by_status().unwrap();
        assert_eq!(counts.get(&Status::Failed), Some(&2));
        assert_eq!(counts.get(&Status::Todo), Some(&1));

        let failures = store.failures(Some(1)).unwrap();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].id, "b");
        assert_eq!(store.failures(None).unwrap().len(), 2);
    }

    #[test]
    fn test_reset_for_stage_keeps_retries() {
        let (store, _temp) = create_test_store();
        enqueue(&store, "abc");
        store.record_retry("abc").unwrap();
        store.update_status("abc", Status::Failed, Some("gave up")).unwrap();

        let status = store.reset_for_stage("abc", Some(Stage::Ingest)).unwrap();
        assert_eq!(status, Status::Transcribed);

        let item = store.get("abc").unwrap().unwrap();
        assert_eq!(item.status, Status::Transcribed);
        assert_eq!(item.retries, 1);
        assert!(item.error.is_none());

        assert!(matches!(
            store.reset_for_stage("nope", None),
            Err(StoreError::NotFound(_))
        ));
    }

    #[test]
    fn test_requeue_stale_returns_items_to_predecessor() {
        let (store, _temp) = create_test_store();
        enqueue(&store, "a");
        enqueue(&store, "b");
        store.claim_next(None, "crashed").unwrap();
        store.update_status("b", Status::Ingesting, None).unwrap();

        // A generous cutoff leaves fresh claims alone
        assert!(store.requeue_stale(chrono::Duration::hours(1)).unwrap().is_empty());

        let mut requeued = store.requeue_stale(chrono::Duration::zero()).unwrap();
        requeued.sort();
        assert_eq!(
            requeued,
            vec![
                ("a".to_string(), Status::Todo),
                ("b".to_string(), Status::Transcribed)
            ]
        );
        assert!(store.get("a").unwrap().unwrap().claimed_by.is_none());
    }
}
