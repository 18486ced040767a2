//! Archiving moves the oldest entries to cold storage without breaking the
//! chain; verification and export read straight across the seam.

mod common;

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use common::{Deployment, signer};
use vigil_audit::{AuditEvent, AuditLog, EntryStore, ExportFilter, ExportFormat, MemoryEntryStore, RetentionPolicy};
use vigil_crypto::KeyPair;

fn days_from_now(days: i64) -> DateTime<Utc> {
    Utc::now().checked_add_signed(Duration::days(days)).unwrap()
}

async fn open(deployment: &Deployment, key: &KeyPair, cold: Arc<MemoryEntryStore>, batch_limit: u64) -> AuditLog {
    deployment
        .builder(signer(key, 1))
        .cold_store(cold)
        .retention(RetentionPolicy::from_days(30, 365), batch_limit)
        .build()
        .await
        .unwrap()
}

#[tokio::test]
async fn elevated_entry_holds_the_seam() {
    let deployment = Deployment::new();
    let cold = Arc::new(MemoryEntryStore::new());
    let log = open(&deployment, &KeyPair::generate(), cold.clone(), 100).await;

    for _ in 0..5 {
        log.log_event(AuditEvent::info("app", "view"));
    }
    log.log(AuditEvent::security("auth", "lockout")).await.unwrap();
    for _ in 0..4 {
        log.log_event(AuditEvent::info("app", "view"));
    }
    log.flush().await.unwrap();

    let later = days_from_now(60);
    let report = log.archive(later).await.unwrap();
    assert_eq!(report.archived, 5);
    assert_eq!(report.through, Some(5));
    assert_eq!(report.held_back_by, Some(6));
    assert_eq!(cold.count().await.unwrap(), 5);
    assert_eq!(deployment.hot().count().await.unwrap(), 5);

    let report = log.verify_integrity(None, None).await.unwrap();
    assert!(report.valid, "issues: {:?}", report.issues);
    assert_eq!(report.stats.entries_checked, 10);

    let bundle = log
        .export(&ExportFilter::new().sequences(3, 8), ExportFormat::Jsonl)
        .await
        .unwrap();
    assert_eq!(bundle.entry_count, 6);
    assert!(bundle.verify_checksum());

    let much_later = days_from_now(400);
    let report = log.archive(much_later).await.unwrap();
    assert_eq!(report.archived, 5);
    assert_eq!(deployment.hot().count().await.unwrap(), 0);
    assert!(log.verify_integrity(None, None).await.unwrap().valid);
}

#[tokio::test]
async fn batched_passes_keep_both_segments_verifiable() {
    let deployment = Deployment::new();
    let cold = Arc::new(MemoryEntryStore::new());
    let log = open(&deployment, &KeyPair::generate(), cold.clone(), 3).await;
    for _ in 0..10 {
        log.log_event(AuditEvent::info("app", "view"));
    }
    log.flush().await.unwrap();

    let later = days_from_now(60);
    let mut moved = 0_u64;
    while moved < 10 {
        let report = log.archive(later).await.unwrap();
        assert!(report.archived > 0);
        moved = moved.saturating_add(report.archived);
        assert!(log.verify_integrity(None, None).await.unwrap().valid);
    }
    assert_eq!(cold.count().await.unwrap(), 10);
}

#[tokio::test]
async fn restart_resumes_from_cold_when_hot_is_empty() {
    let deployment = Deployment::new();
    let cold = Arc::new(MemoryEntryStore::new());
    let key = KeyPair::generate();
    {
        let log = open(&deployment, &key, cold.clone(), 100).await;
        for _ in 0..4 {
            log.log_event(AuditEvent::info("app", "view"));
        }
        log.flush().await.unwrap();
        log.archive(days_from_now(60)).await.unwrap();
    }
    assert_eq!(deployment.hot().count().await.unwrap(), 0);

    let log = open(&deployment, &key, cold, 100).await;
    assert_eq!(log.chain_state().last_sequence, 4);
    log.log_event(AuditEvent::info("app", "view"));
    log.flush().await.unwrap();
    assert!(log.verify_integrity(None, None).await.unwrap().valid);
}
