//! Verify commands - check chain integrity in the stores or the journal.

use std::path::Path;

use anyhow::{Context, Result, bail};
use vigil_audit::{IntegrityVerifier, VerificationReport, read_journal};
use vigil_config::Config;
use vigil_crypto::ContentHash;

use super::{open_stores, trusted_keys};
use crate::theme::Theme;

/// Verify the hot and cold stores.
pub(crate) async fn verify_stores(config: &Config, from: Option<u64>, to: Option<u64>, json: bool) -> Result<()> {
    let stores = open_stores(config)?;
    let head = stores
        .checkpoints
        .load()
        .await
        .context("could not read the chain checkpoint")?
        .map(|cp| cp.last_sequence);
    let verifier = IntegrityVerifier::new(trusted_keys(config)?);
    let report = verifier
        .verify_range(stores.hot.as_ref(), stores.cold.as_deref(), from, to, head)
        .await
        .context("could not read the audit store")?;
    finish(&report, json, "Audit chain")
}

/// Verify the daily journal files in `dir` on their own.
pub(crate) fn verify_journal(config: &Config, dir: &Path, json: bool) -> Result<()> {
    let entries = read_journal(dir).with_context(|| format!("could not read journal at {}", dir.display()))?;
    let anchor = entries
        .first()
        .filter(|first| first.sequence == 1)
        .map(|_| ContentHash::GENESIS);
    let report = IntegrityVerifier::new(trusted_keys(config)?).verify_entries(anchor, &entries);
    finish(&report, json, "Journal")
}

fn finish(report: &VerificationReport, json: bool, what: &str) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
    } else {
        print_report(report, what);
    }
    if !report.valid {
        bail!("{what} failed verification with {} issues", report.issues.len());
    }
    Ok(())
}

fn print_report(report: &VerificationReport, what: &str) {
    let stats = &report.stats;
    let range = match (stats.first_sequence, stats.last_sequence) {
        (Some(first), Some(last)) => format!("{first}..={last}"),
        _ => "empty".to_owned(),
    };
    let versions = stats
        .key_versions
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ");

    println!("\n{}", Theme::title(&format!("{what} Verification")));
    println!("{}", Theme::field("Range", &range));
    println!("{}", Theme::field("Entries", &stats.entries_checked.to_string()));
    println!("{}", Theme::field("Key versions", &versions));
    println!("{}", Theme::field("Anchored", &stats.anchored.to_string()));
    println!("{}", Theme::field("Elapsed", &format!("{} ms", stats.elapsed_ms)));
    println!("{}", Theme::rule());

    if report.valid {
        println!("{}", Theme::passed(&format!("{what} verified: no issues")));
    } else {
        println!("{}", Theme::failed(&format!("{} issues found:", report.issues.len())));
        for issue in &report.issues {
            println!("{}", Theme::issue(issue));
        }
    }
    println!();
}
