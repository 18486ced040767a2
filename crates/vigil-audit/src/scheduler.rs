//! Background jobs: periodic flush, verification and archiving.

use chrono::Utc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::AuditResult;
use crate::log::AuditLog;
use crate::writer::FlushReport;

/// Handle to the background jobs of one [`AuditLog`].
#[derive(Debug)]
pub struct AuditScheduler {
    log: AuditLog,
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl AuditScheduler {
    /// Spawn the jobs for `log` on the current runtime.
    ///
    /// Flushes run when the batch is full, an elevated entry arrives, or the
    /// flush interval passes. A backlog left by a failed flush is retried on
    /// every interval even when nothing new is buffered. Verification and archiving run on their own
    /// periods; verification is skipped when disabled.
    #[must_use]
    pub fn start(log: AuditLog) -> Self {
        let cancel = CancellationToken::new();
        let mut tasks = vec![tokio::spawn(flush_loop(log.clone(), cancel.clone()))];
        if log.schedule().verify_interval.is_some() {
            tasks.push(tokio::spawn(verify_loop(log.clone(), cancel.clone())));
        }
        if log.has_archiver() {
            tasks.push(tokio::spawn(archive_loop(log.clone(), cancel.clone())));
        }
        info!(jobs = tasks.len(), "audit scheduler started");
        Self { log, cancel, tasks }
    }

    /// The log these jobs serve.
    #[must_use]
    pub fn log(&self) -> &AuditLog {
        &self.log
    }

    /// Stop every job, then shut the log down with a final flush.
    ///
    /// # Errors
    ///
    /// See [`AuditLog::shutdown`].
    pub async fn shutdown(self) -> AuditResult<FlushReport> {
        self.cancel.cancel();
        for task in self.tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "audit job ended abnormally");
            }
        }
        self.log.shutdown().await
    }
}

async fn flush_loop(log: AuditLog, cancel: CancellationToken) {
    let interval = log.schedule().flush_interval;
    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            () = log.batch_ready() => {},
            () = tokio::time::sleep(interval) => {},
        }
        if log.buffered() == 0 && log.backlog_len().await == 0 {
            continue;
        }
        // Failures are already alerted; entries stay in the backlog.
        if let Err(e) = log.flush().await {
            warn!(error = %e, "scheduled flush failed");
        }
    }
    debug!("flush job stopped");
}

async fn verify_loop(log: AuditLog, cancel: CancellationToken) {
    let schedule = log.schedule();
    let Some(period) = schedule.verify_interval else {
        return;
    };
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // The first tick completes immediately.
    ticker.tick().await;
    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            _ = ticker.tick() => {},
        }
        match log.verify_recent(schedule.verify_window).await {
            Ok(report) if report.valid => debug!(checked = report.stats.entries_checked, "periodic verification passed"),
            Ok(report) => warn!(issues = report.issues.len(), "periodic verification found issues"),
            Err(e) => warn!(error = %e, "periodic verification could not run"),
        }
    }
    debug!("verification job stopped");
}

async fn archive_loop(log: AuditLog, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(log.schedule().archive_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    ticker.tick().await;
    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            _ = ticker.tick() => {},
        }
        match log.archive(Utc::now()).await {
            Ok(report) if report.archived > 0 => info!(archived = report.archived, "scheduled archive pass"),
            Ok(_) => {},
            Err(e) => warn!(error = %e, "scheduled archive pass failed"),
        }
    }
    debug!("archive job stopped");
}
