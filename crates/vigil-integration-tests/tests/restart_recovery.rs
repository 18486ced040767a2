//! Restart recovery: resume the chain, merge the emergency file, and record
//! reserved sequences that never reached storage.

mod common;

use std::sync::Arc;

use common::{Deployment, FlakyStore, signer};
use vigil_audit::{
    AlertKind, Alerter, AuditEvent, ChainState, Checkpoint, CheckpointStore, EntryStore, GAP_ACTION,
    INTEGRITY_CATEGORY, MemoryReplica, RecordingAlertHook, Reservations, SequenceGap, Value,
};
use vigil_config::{Config, Secret};
use vigil_core::Severity;
use vigil_crypto::{KeyPair, KeyVersion};

#[tokio::test]
async fn clean_restart_continues_chain() {
    let deployment = Deployment::new();
    let key = KeyPair::generate();
    {
        let log = deployment.builder(signer(&key, 1)).build().await.unwrap();
        for _ in 0..5 {
            log.log_event(AuditEvent::info("a", "first_run"));
        }
        log.shutdown().await.unwrap();
    }

    let log = deployment.builder(signer(&key, 1)).build().await.unwrap();
    assert_eq!(log.chain_state().last_sequence, 5);
    for _ in 0..3 {
        log.log_event(AuditEvent::info("a", "second_run"));
    }
    log.flush().await.unwrap();

    let report = log.verify_integrity(None, None).await.unwrap();
    assert!(report.valid);
    assert_eq!(report.stats.last_sequence, Some(8));
}

#[tokio::test]
async fn reserved_but_lost_sequences_get_a_marker() {
    let deployment = Deployment::new();
    let key = KeyPair::generate();
    let persisted = {
        let log = deployment.builder(signer(&key, 1)).build().await.unwrap();
        for _ in 0..5 {
            log.log_event(AuditEvent::info("a", "b"));
        }
        log.flush().await.unwrap();
        log.persisted_state()
    };

    // Simulate a crash after sequences 6..=8 were handed out.
    let checkpoints = CheckpointStore::new(deployment.kv.clone()).unwrap();
    checkpoints
        .save(&Checkpoint::new(persisted, 8, KeyVersion::INITIAL))
        .await
        .unwrap();

    let hook = Arc::new(RecordingAlertHook::new());
    let log = deployment
        .builder(signer(&key, 1))
        .alerter(Alerter::new().with_hook(hook.clone()))
        .build()
        .await
        .unwrap();
    assert!(hook.saw(AlertKind::SequenceGap));

    // The lost numbers stay unused; the marker follows them.
    for lost in 6..=8 {
        assert!(deployment.hot().get(lost).await.unwrap().is_none());
    }
    let marker = deployment.stored(9).await;
    assert_eq!(marker.category, INTEGRITY_CATEGORY);
    assert_eq!(marker.action, GAP_ACTION);
    assert_eq!(marker.level, Severity::Security);
    assert_eq!(marker.previous_hash, persisted.last_hash);
    let details = marker.details.as_clear().unwrap();
    assert_eq!(details.get("lost_from").and_then(Value::as_u64), Some(6));
    assert_eq!(details.get("lost_through").and_then(Value::as_u64), Some(8));

    let next = log.log_event(AuditEvent::info("a", "after_gap"));
    assert_eq!(next.sequence(), Some(10));
    log.flush().await.unwrap();
    let report = log.verify_integrity(None, None).await.unwrap();
    assert!(report.valid, "issues: {:?}", report.issues);

    // The marker settles the gap; a second restart adds nothing.
    drop(log);
    let log = deployment.builder(signer(&key, 1)).build().await.unwrap();
    assert_eq!(log.chain_state().last_sequence, 10);
}

#[tokio::test]
async fn crash_before_flush_never_reuses_sequences() {
    let deployment = Deployment::new();
    let key = KeyPair::generate();
    let replica = Arc::new(MemoryReplica::new("forensic"));
    {
        let log = deployment
            .builder(signer(&key, 1))
            .batch_size(4)
            .replica(replica.clone())
            .build()
            .await
            .unwrap();
        for _ in 0..3 {
            log.log_event(AuditEvent::info("a", "flushed"));
        }
        log.flush().await.unwrap();
        log.log_event(AuditEvent::info("a", "buffered"));
        let granted = log
            .log_critical(AuditEvent::critical("auth", "privilege_grant"))
            .await
            .unwrap();
        assert_eq!(granted.sequence, 5);
        // Dropped without a flush: sequences 4 and 5 never reach the store.
    }
    assert_eq!(
        Reservations::file(deployment.reservation_path()).load().unwrap(),
        Some(7)
    );

    let hook = Arc::new(RecordingAlertHook::new());
    let log = deployment
        .builder(signer(&key, 1))
        .batch_size(4)
        .replica(replica.clone())
        .alerter(Alerter::new().with_hook(hook.clone()))
        .build()
        .await
        .unwrap();
    assert!(hook.saw(AlertKind::SequenceGap));
    assert_eq!(log.persisted_state().last_sequence, 8);

    let marker = deployment.stored(8).await;
    let gap = SequenceGap::from_marker(&marker).unwrap();
    assert_eq!((gap.from, gap.through), (4, 7));

    let again = log
        .log_critical(AuditEvent::critical("auth", "privilege_grant"))
        .await
        .unwrap();
    assert_eq!(again.sequence, 9);
    let replicated_at_five = replica.entries().iter().filter(|e| e.sequence == 5).count();
    assert_eq!(replicated_at_five, 1);

    log.flush().await.unwrap();
    let report = log.verify_integrity(None, None).await.unwrap();
    assert!(report.valid, "issues: {:?}", report.issues);
}

#[tokio::test]
async fn emergency_entries_merged_on_restart() {
    let deployment = Deployment::new();
    let key = KeyPair::generate();
    {
        let flaky = Arc::new(FlakyStore::new(deployment.hot()));
        let log = deployment
            .builder_with_hot(signer(&key, 1), flaky.clone())
            .build()
            .await
            .unwrap();
        for _ in 0..3 {
            log.log_event(AuditEvent::info("a", "stored"));
        }
        log.flush().await.unwrap();
        flaky.set_offline(true);
        for _ in 0..2 {
            log.log_event(AuditEvent::info("a", "emergency"));
        }
        log.flush().await.unwrap();
    }
    assert!(deployment.emergency_path().exists());

    let log = deployment.builder(signer(&key, 1)).build().await.unwrap();
    assert_eq!(log.chain_state().last_sequence, 5);
    assert_eq!(deployment.stored(5).await.action, "emergency");
    assert!(!deployment.emergency_path().exists());
    assert!(log.verify_integrity(None, None).await.unwrap().valid);
}

#[tokio::test]
async fn contradicting_checkpoint_refuses_start() {
    let deployment = Deployment::new();
    let key = KeyPair::generate();
    {
        let log = deployment.builder(signer(&key, 1)).build().await.unwrap();
        log.log_event(AuditEvent::info("a", "b"));
        log.flush().await.unwrap();
    }
    let checkpoints = CheckpointStore::new(deployment.kv.clone()).unwrap();
    checkpoints
        .save(&Checkpoint::new(
            ChainState {
                last_sequence: 40,
                ..ChainState::genesis()
            },
            40,
            KeyVersion::INITIAL,
        ))
        .await
        .unwrap();

    assert!(deployment.builder(signer(&key, 1)).build().await.is_err());
}

#[tokio::test]
async fn config_wired_log_writes_every_sink() {
    let dir = tempfile::tempdir().unwrap();
    let key = KeyPair::generate();
    let mut config = Config::default();
    config.persistence.data_dir = Some(dir.path().display().to_string());
    config.secrets.signing_key = Some(Secret::new(key.secret_key_base64().as_str()));

    let paths = config.paths();
    {
        let log = vigil_audit::AuditLog::from_config(&config).await.unwrap();
        log.log_event(AuditEvent::info("a", "routine"));
        log.log_critical(AuditEvent::critical("a", "grant")).await.unwrap();
        log.shutdown().await.unwrap();
    }

    let journal = vigil_audit::read_journal(&paths.journal_dir).unwrap();
    assert_eq!(journal.len(), 2);
    let forensic = std::fs::read_to_string(&paths.forensic_path).unwrap();
    assert_eq!(forensic.lines().count(), 1);

    let log = vigil_audit::AuditLog::from_config(&config).await.unwrap();
    assert_eq!(log.chain_state().last_sequence, 2);
    assert_eq!(log.public_key(), key.public_key());
}
