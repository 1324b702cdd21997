//! Live command: run the pair list service until interrupted

use std::time::Duration;

use anyhow::Result;
use tracing::info;

use mcookbook::config::Config;
use mcookbook::service::LiveService;

pub async fn run(config: Config, interval: u64) -> Result<()> {
    let runtime = super::bootstrap(config)?;
    info!(
        "Starting live service on {}({}), refreshing every {interval}s",
        runtime.config.exchange.name, runtime.config.exchange.market
    );

    let service = LiveService::new(
        runtime.config,
        runtime.events,
        runtime.market_data,
        runtime.pairlists,
        Duration::from_secs(interval),
    );
    service.run().await
}
