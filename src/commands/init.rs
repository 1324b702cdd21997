//! Init command: write a starter configuration file

use std::fs;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use tracing::info;

use mcookbook::config::Config;

pub fn run(dir: PathBuf, force: bool) -> Result<()> {
    fs::create_dir_all(&dir)
        .with_context(|| format!("Failed to create directory {}", dir.display()))?;

    let target = dir.join(super::DEFAULT_CONFIG_FILE);
    if target.exists() && !force {
        bail!(
            "Refusing to overwrite existing configuration {}. Pass --force to overwrite.",
            target.display()
        );
    }

    let config = Config::default_config();
    let contents = serde_json::to_string_pretty(&config)?;
    fs::write(&target, contents + "\n")
        .with_context(|| format!("Failed to write {}", target.display()))?;

    info!("Wrote configuration to {}", target.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_loadable_default_config() {
        let dir = tempfile::tempdir().unwrap();
        run(dir.path().to_path_buf(), false).unwrap();

        let target = dir.path().join(crate::commands::DEFAULT_CONFIG_FILE);
        let config = Config::from_file(&target).unwrap();
        assert_eq!(config.exchange.name, "binance");
        assert!(!config.pairlists.is_empty());
    }

    #[test]
    fn refuses_to_overwrite_without_force() {
        let dir = tempfile::tempdir().unwrap();
        run(dir.path().to_path_buf(), false).unwrap();

        let err = run(dir.path().to_path_buf(), false).unwrap_err();
        assert!(err.to_string().contains("Refusing to overwrite"));

        run(dir.path().to_path_buf(), true).unwrap();
    }
}
