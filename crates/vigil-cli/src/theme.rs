//! Terminal styling for operator output.

use colored::Colorize;
use vigil_audit::IntegrityIssue;

/// Styling helpers shared by every command.
pub(crate) struct Theme;

impl Theme {
    /// Section title.
    pub(crate) fn title(text: &str) -> String {
        text.bold().cyan().to_string()
    }

    /// Completed operation.
    pub(crate) fn passed(text: &str) -> String {
        format!("{} {text}", "✓".green().bold())
    }

    /// Failed check.
    pub(crate) fn failed(text: &str) -> String {
        format!("{} {}", "✗".red().bold(), text.red())
    }

    /// Something the operator should act on.
    pub(crate) fn caution(text: &str) -> String {
        format!("{} {}", "!".yellow().bold(), text.yellow())
    }

    /// Neutral remark.
    pub(crate) fn note(text: &str) -> String {
        format!("{} {}", "·".blue(), text.dimmed())
    }

    /// Horizontal rule under a title block.
    pub(crate) fn rule() -> String {
        "─".repeat(48).dimmed().to_string()
    }

    /// Aligned label and value.
    pub(crate) fn field(label: &str, value: &str) -> String {
        format!("  {:<14} {value}", label.bold())
    }

    /// One verifier finding, tagged by kind.
    pub(crate) fn issue(issue: &IntegrityIssue) -> String {
        let (tag, detail) = match issue {
            IntegrityIssue::ChainBreak { expected, found, .. } => (
                "chain-break".red(),
                format!("previous hash {} should be {}", found.short(), expected.short()),
            ),
            IntegrityIssue::Tamper { stored, computed, .. } => (
                "tamper".red(),
                format!("stored {} but fields hash to {}", stored.short(), computed.short()),
            ),
            IntegrityIssue::Signature { key_version, reason, .. } => {
                ("signature".magenta(), format!("key {key_version}: {reason}"))
            },
            IntegrityIssue::SequenceGap { expected, found } => {
                ("gap".yellow(), format!("expected {expected}, found {found}"))
            },
            IntegrityIssue::Truncated { expected, through } => {
                ("truncated".yellow(), format!("sequences {expected}..={through} missing"))
            },
        };
        format!("  {:>8} {:<12} {detail}", format!("#{}", issue.sequence()).bold(), tag.bold())
    }
}
