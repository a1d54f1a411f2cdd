//! Work-item store integration tests
//!
//! Claiming across independent connections to one database file,
//! FIFO order within a status bucket, and re-submission semantics.

mod common;

use std::collections::HashSet;
use std::sync::{Arc, Barrier};
use std::thread;

use graphmem::domain::{Analysis, ItemId, NewWorkItem, Segment, Stage, Status};
use tempfile::TempDir;

use common::open_store;

#[test]
fn test_concurrent_claims_are_exclusive() {
    let temp = TempDir::new().unwrap();
    let db = temp.path().join("graph_memory.db");

    // Create the schema before the workers race for it
    let store = open_store(&db);
    for i in 0..40 {
        store
            .upsert(&NewWorkItem::remote(ItemId::flat(format!("vid{:02}", i)), "video"))
            .unwrap();
    }

    let workers = 6;
    let barrier = Arc::new(Barrier::new(workers));
    let handles: Vec<_> = (0..workers)
        .map(|w| {
            let db = db.clone();
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                let store = open_store(&db);
                barrier.wait();

                let mut claimed = Vec::new();
                while let Some(item) = store
                    .claim_next(Some(Stage::Acquire), &format!("worker-{}", w))
                    .unwrap()
                {
                    assert_eq!(item.status, Status::Acquiring);
                    claimed.push(item.id);
                }
                claimed
            })
        })
        .collect();

    let mut all = Vec::new();
    for handle in handles {
        all.extend(handle.join().unwrap());
    }

    let unique: HashSet<_> = all.iter().cloned().collect();
    assert_eq!(all.len(), 40, "every item claimed exactly once");
    assert_eq!(unique.len(), 40);
    assert!(store.claim_next(Some(Stage::Acquire), "late").unwrap().is_none());
}

#[test]
fn test_claim_is_fifo_within_bucket() {
    let temp = TempDir::new().unwrap();
    let store = open_store(&temp.path().join("graph_memory.db"));

    store.upsert(&NewWorkItem::remote(ItemId::flat("first"), "A")).unwrap();
    store.upsert(&NewWorkItem::remote(ItemId::flat("second"), "B")).unwrap();
    store.upsert(&NewWorkItem::remote(ItemId::flat("third"), "C")).unwrap();

    let order: Vec<String> = std::iter::from_fn(|| store.claim_next(None, "w").unwrap())
        .map(|item| item.id)
        .collect();
    assert_eq!(order, vec!["first", "second", "third"]);
}

#[test]
fn test_claims_only_see_their_stage_bucket() {
    let temp = TempDir::new().unwrap();
    let store = open_store(&temp.path().join("graph_memory.db"));

    store.upsert(&NewWorkItem::remote(ItemId::flat("a"), "A")).unwrap();
    store.upsert(&NewWorkItem::remote(ItemId::flat("b"), "B")).unwrap();
    store.update_status("b", Status::Transcribed, None).unwrap();

    assert!(store.claim_next(Some(Stage::Transcribe), "w").unwrap().is_none());

    let item = store.claim_next(Some(Stage::Ingest), "w").unwrap().unwrap();
    assert_eq!(item.id, "b");
    assert_eq!(item.status, Status::Ingesting);
    assert_eq!(item.claimed_by.as_deref(), Some("w"));

    let item = store.claim_next(Some(Stage::Acquire), "w").unwrap().unwrap();
    assert_eq!(item.id, "a");
}

#[test]
fn test_resubmission_resets_but_keeps_transcript_rows() {
    let temp = TempDir::new().unwrap();
    let store = open_store(&temp.path().join("graph_memory.db"));
    let item = NewWorkItem::remote(ItemId::scoped("chan1", "vid1"), "Video");

    store.upsert(&item).unwrap();
    store.record_retry("chan1/vid1").unwrap();
    store
        .save_segments("chan1/vid1", &[Segment::new(0.0, 1.0, "hi")])
        .unwrap();
    store
        .save_analysis(
            "chan1/vid1",
            &Analysis {
                summary: "s".to_string(),
                ..Default::default()
            },
        )
        .unwrap();
    store
        .update_status("chan1/vid1", Status::Done, Some("stale error"))
        .unwrap();

    store.upsert(&item).unwrap();

    let reloaded = store.get("chan1/vid1").unwrap().unwrap();
    assert_eq!(reloaded.status, Status::Todo);
    assert_eq!(reloaded.retries, 0);
    assert!(reloaded.error.is_none());
    assert_eq!(store.segments("chan1/vid1").unwrap().len(), 1);
    assert!(store.analysis("chan1/vid1").unwrap().is_some());
    assert_eq!(store.list().unwrap().len(), 1);
}

#[test]
fn test_recover_requeues_stuck_items() {
    let temp = TempDir::new().unwrap();
    let store = open_store(&temp.path().join("graph_memory.db"));

    store.upsert(&NewWorkItem::remote(ItemId::flat("stuck"), "A")).unwrap();
    store.upsert(&NewWorkItem::remote(ItemId::flat("fine"), "B")).unwrap();
    store.update_status("stuck", Status::Transcribing, None).unwrap();

    let requeued = store.requeue_stale(chrono::Duration::zero()).unwrap();
    assert_eq!(requeued, vec![("stuck".to_string(), Status::Acquired)]);
    assert_eq!(store.get("fine").unwrap().unwrap().status, Status::Todo);

    // Recently touched items are left alone
    store.update_status("stuck", Status::Ingesting, None).unwrap();
    assert!(store.requeue_stale(chrono::Duration::hours(1)).unwrap().is_empty());
}
