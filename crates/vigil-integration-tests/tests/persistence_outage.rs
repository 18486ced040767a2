//! Primary store outages: nothing is lost and the store never develops holes.

mod common;

use std::sync::Arc;

use common::{Deployment, FlakyStore, signer};
use vigil_audit::{
    AlertKind, Alerter, AuditEvent, EmergencyRecord, EntryStore, RecordingAlertHook, read_journal,
};
use vigil_crypto::KeyPair;

#[tokio::test]
async fn outage_falls_back_then_backlog_drains() {
    let deployment = Deployment::new();
    let flaky = Arc::new(FlakyStore::new(deployment.hot()));
    let hook = Arc::new(RecordingAlertHook::new());
    let log = deployment
        .builder_with_hot(signer(&KeyPair::generate(), 1), flaky.clone())
        .alerter(Alerter::new().with_hook(hook.clone()))
        .build()
        .await
        .unwrap();

    for i in 0..3_u64 {
        log.log_event(AuditEvent::info("batch", "one").detail("n", i));
    }
    log.flush().await.unwrap();

    flaky.set_offline(true);
    for i in 0..4_u64 {
        log.log_event(AuditEvent::info("batch", "two").detail("n", i));
    }
    let degraded = log.flush().await.unwrap();
    assert!(!degraded.primary);
    assert!(degraded.journal);
    assert!(degraded.emergency);
    assert_eq!(degraded.backlog, 4);
    assert!(hook.saw(AlertKind::PersistenceDegraded));
    assert_eq!(log.persisted_state().last_sequence, 3);

    // Everything is on disk somewhere while the store is down.
    let journal = read_journal(&deployment.journal_dir()).unwrap();
    assert_eq!(journal.len(), 7);
    let emergency = std::fs::read_to_string(deployment.emergency_path()).unwrap();
    assert_eq!(emergency.lines().count(), 4);

    flaky.set_offline(false);
    log.log_event(AuditEvent::info("batch", "three"));
    let recovered = log.flush().await.unwrap();
    assert!(recovered.primary);
    assert_eq!(recovered.backlog, 0);

    let stored = deployment.hot().range(1, 100).await.unwrap();
    let sequences: Vec<u64> = stored.iter().map(|e| e.sequence).collect();
    assert_eq!(sequences, (1..=8).collect::<Vec<_>>());
    assert_eq!(log.persisted_state().last_sequence, 8);
    assert!(log.verify_integrity(None, None).await.unwrap().valid);
}

#[tokio::test]
async fn event_during_shutdown_is_preserved_in_emergency_file() {
    let deployment = Deployment::new();
    let log = deployment.builder(signer(&KeyPair::generate(), 1)).build().await.unwrap();
    log.log_event(AuditEvent::info("a", "b"));
    log.shutdown().await.unwrap();

    assert!(log.log_event(AuditEvent::warning("a", "late")).sequence().is_none());

    let raw = std::fs::read_to_string(deployment.emergency_path()).unwrap();
    let records: Vec<EmergencyRecord> = raw.lines().map(|l| serde_json::from_str(l).unwrap()).collect();
    assert!(matches!(
        records.as_slice(),
        [EmergencyRecord::Unsequenced { entry, .. }] if entry.action == "late"
    ));
    assert_eq!(deployment.hot().count().await.unwrap(), 1);
}

#[tokio::test]
async fn shutdown_during_outage_keeps_entries() {
    let deployment = Deployment::new();
    let flaky = Arc::new(FlakyStore::new(deployment.hot()));
    let log = deployment
        .builder_with_hot(signer(&KeyPair::generate(), 1), flaky.clone())
        .build()
        .await
        .unwrap();

    flaky.set_offline(true);
    for _ in 0..5 {
        log.log_event(AuditEvent::info("a", "b"));
    }
    let report = log.shutdown().await.unwrap();
    assert!(report.emergency);

    let raw = std::fs::read_to_string(deployment.emergency_path()).unwrap();
    assert_eq!(raw.lines().count(), 5);
}
