//! Export command - write filtered entries with a checksum.

use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, Utc};
use vigil_audit::{ExportFilter, ExportFormat, Exporter};
use vigil_config::Config;
use vigil_core::Severity;

use super::open_stores;
use crate::theme::Theme;

/// Raw filter arguments from the command line.
#[derive(Debug, Default)]
pub(crate) struct FilterArgs {
    pub(crate) from: Option<u64>,
    pub(crate) to: Option<u64>,
    pub(crate) since: Option<String>,
    pub(crate) until: Option<String>,
    pub(crate) min_level: Option<String>,
    pub(crate) categories: Vec<String>,
    pub(crate) actor: Option<String>,
}

fn parse_time(raw: Option<&str>, flag: &str) -> Result<Option<DateTime<Utc>>> {
    raw.map(|raw| {
        DateTime::parse_from_rfc3339(raw)
            .map(|dt| dt.with_timezone(&Utc))
            .with_context(|| format!("--{flag} must be an RFC 3339 timestamp"))
    })
    .transpose()
}

/// Turn command-line arguments into an [`ExportFilter`].
pub(crate) fn build_filter(args: FilterArgs) -> Result<ExportFilter> {
    let mut filter = ExportFilter::new().between(
        parse_time(args.since.as_deref(), "since")?,
        parse_time(args.until.as_deref(), "until")?,
    );
    filter.from_sequence = args.from;
    filter.to_sequence = args.to;
    if let Some(level) = args.min_level {
        let level: Severity = level.parse().map_err(|_| anyhow!("unknown level: {level}"))?;
        filter = filter.min_level(level);
    }
    for category in args.categories {
        filter = filter.category(category);
    }
    if let Some(actor) = args.actor {
        filter = filter.actor(actor);
    }
    Ok(filter)
}

/// Export to `out`, or to stdout. The summary goes to stderr.
pub(crate) async fn run_export(config: &Config, filter: &ExportFilter, format: &str, out: Option<&Path>) -> Result<()> {
    let format: ExportFormat = format.parse()?;
    let stores = open_stores(config)?;
    let bundle = Exporter::new(stores.hot, stores.cold)
        .export(filter, format)
        .await
        .context("export failed")?;

    match out {
        Some(path) => std::fs::write(path, &bundle.bytes).with_context(|| format!("could not write {}", path.display()))?,
        None => {
            let mut stdout = std::io::stdout().lock();
            stdout.write_all(&bundle.bytes)?;
            stdout.flush()?;
        },
    }

    let range = match (bundle.first_sequence, bundle.last_sequence) {
        (Some(first), Some(last)) => format!("{first}..={last}"),
        _ => "none".to_owned(),
    };
    eprintln!(
        "{}",
        Theme::passed(&format!("Exported {} entries ({range}) as {}", bundle.entry_count, format.as_str()))
    );
    eprintln!("{}", Theme::field("SHA-256", &bundle.checksum));
    Ok(())
}
