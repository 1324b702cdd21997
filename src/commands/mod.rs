//! CLI command implementations

pub mod init;
pub mod live;
pub mod pairs;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Result};
use tracing::warn;

use mcookbook::config::Config;
use mcookbook::events::Events;
use mcookbook::exchange::MarketData;
use mcookbook::pairlist::PairListManager;

pub const DEFAULT_CONFIG_FILE: &str = "default.json";

/// Resolve the configuration files to load.
///
/// Explicitly passed files win; missing ones are warned about and skipped.
/// Without explicit files, `default.json` in `basedir` is used.
pub fn resolve_config_files(explicit: &[PathBuf], basedir: &Path) -> Result<Vec<PathBuf>> {
    if !explicit.is_empty() {
        let mut existing: Vec<PathBuf> = Vec::new();
        for path in explicit {
            if path.is_file() {
                existing.push(path.clone());
            } else {
                warn!("Config file {} does not exist, skipping", path.display());
            }
        }
        if existing.is_empty() {
            bail!("None of the passed config files exist");
        }
        return Ok(existing);
    }

    let default = basedir.join(DEFAULT_CONFIG_FILE);
    if default.is_file() {
        Ok(vec![default])
    } else {
        bail!(
            "No configuration file found at {}. Run 'mcookbook init' to create one.",
            default.display()
        );
    }
}

/// The runtime pieces every exchange-facing command needs.
pub struct Runtime {
    pub config: Arc<Config>,
    pub events: Events,
    pub market_data: Arc<MarketData>,
    pub pairlists: Arc<PairListManager>,
}

pub fn bootstrap(config: Config) -> Result<Runtime> {
    let config = Arc::new(config);
    let events = Events::new();
    let exchange = mcookbook::exchange::resolve(&config.exchange)?;
    let market_data = Arc::new(MarketData::new(
        exchange,
        Arc::clone(&config),
        events.clone(),
    ));
    let pairlists = Arc::new(PairListManager::new(
        Arc::clone(&config),
        Arc::clone(&market_data),
        events.clone(),
    )?);
    Ok(Runtime {
        config,
        events,
        market_data,
        pairlists,
    })
}
