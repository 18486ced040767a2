//! Keys command - manage signing keys.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use vigil_config::Config;
use vigil_crypto::KeyPair;

use crate::theme::Theme;

fn default_key_path(config: &Config) -> PathBuf {
    config.signing.key_path.as_deref().map_or_else(
        || {
            config
                .paths()
                .hot_dir
                .parent()
                .map_or_else(|| PathBuf::from("signing.key"), |dir| dir.join("signing.key"))
        },
        PathBuf::from,
    )
}

/// Generate a new key file.
///
/// Existing files are only replaced with `force`. Replacing a key never
/// invalidates old entries as long as its public half stays in
/// `signing.trusted_keys`.
pub(crate) fn generate_key(config: &Config, out: Option<PathBuf>, force: bool) -> Result<()> {
    let path = out.unwrap_or_else(|| default_key_path(config));
    if path.exists() {
        if !force {
            bail!("{} already exists; pass --force to replace it", path.display());
        }
        println!(
            "{}",
            Theme::caution("Replacing an existing key. Keep its public key in signing.trusted_keys.")
        );
        if let Ok(previous) = KeyPair::load(&path) {
            println!("{}", Theme::field("Previous key", &previous.public_key().to_base64()));
        }
        std::fs::remove_file(&path).with_context(|| format!("could not remove {}", path.display()))?;
    }

    let key = KeyPair::generate();
    key.write_new(&path)
        .with_context(|| format!("could not write {}", path.display()))?;

    println!("{}", Theme::passed("New signing key generated."));
    print_key(&key, &path);
    Ok(())
}

/// Show the active key and every trusted key.
pub(crate) fn show_key(config: &Config, path: Option<&Path>) -> Result<()> {
    let key = match path {
        Some(path) => Some(KeyPair::load(path).with_context(|| format!("could not read {}", path.display()))?),
        None => config
            .secrets
            .signing_key
            .as_ref()
            .map(|secret| KeyPair::from_base64_secret(secret.expose()))
            .transpose()
            .context("configured signing key is malformed")?,
    };

    println!("\n{}", Theme::title("Signing Key"));
    match &key {
        Some(key) => {
            println!("{}", Theme::field("Version", &config.signing.key_version.to_string()));
            print_key(key, &path.map_or_else(|| default_key_path(config), Path::to_path_buf));
        },
        None => println!("{}", Theme::note("No signing key configured")),
    }

    if !config.signing.trusted_keys.is_empty() {
        println!("\n{}", Theme::title("Trusted Keys"));
        println!("{}", Theme::rule());
        for trusted in &config.signing.trusted_keys {
            println!("  v{:<6} {}", trusted.version, trusted.public_key);
        }
    }
    println!();
    Ok(())
}

fn print_key(key: &KeyPair, path: &Path) {
    println!("{}", Theme::field("Key ID", &key.key_id_hex()));
    println!("{}", Theme::field("Public key", &key.public_key().to_base64()));
    println!("{}", Theme::field("Key file", &path.display().to_string()));
}
