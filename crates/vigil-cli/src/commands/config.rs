//! Config command - show the merged configuration.

use anyhow::{Result, bail};
use vigil_config::Config;

use crate::theme::Theme;

/// Print the merged configuration. Secrets are skipped by serialization.
pub(crate) fn show_config(config: &Config, format: &str) -> Result<()> {
    let rendered = match format {
        "toml" => toml::to_string_pretty(config)?,
        "json" => serde_json::to_string_pretty(config)?,
        other => bail!("unknown format: {other} (expected toml or json)"),
    };
    println!("{rendered}");

    let signing = if config.secrets.signing_key.is_some() {
        "configured"
    } else if config.allows_ephemeral_key() {
        "ephemeral (development)"
    } else {
        "missing"
    };
    eprintln!("{}", Theme::field("Signing key", signing));
    eprintln!(
        "{}",
        Theme::field(
            "Sealing key",
            if config.secrets.sealing_key.is_some() { "configured" } else { "none" }
        )
    );
    Ok(())
}

/// Print every resolved on-disk location.
pub(crate) fn show_paths(config: &Config) {
    let paths = config.paths();
    println!("\n{}", Theme::title("Storage Paths"));
    println!("{}", Theme::field("Hot store", &paths.hot_dir.display().to_string()));
    println!("{}", Theme::field("Cold store", &paths.cold_dir.display().to_string()));
    println!("{}", Theme::field("Journal", &paths.journal_dir.display().to_string()));
    println!("{}", Theme::field("Emergency", &paths.emergency_path.display().to_string()));
    println!("{}", Theme::field("Forensic", &paths.forensic_path.display().to_string()));
    println!("{}", Theme::field("Reservation", &paths.reservation_path.display().to_string()));
    println!();
}
