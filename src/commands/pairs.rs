//! Pairs command: resolve the configured pair lists once and print them

use anyhow::{Context, Result};

use mcookbook::config::Config;

pub async fn run(config: Config) -> Result<()> {
    let runtime = super::bootstrap(config)?;

    runtime
        .market_data
        .get_markets()
        .await
        .context("Failed to load markets")?;
    runtime.pairlists.refresh_pairlist().await?;

    let allow_list = runtime.pairlists.allow_list().await;
    println!(
        "{} pairs on {}({}):",
        allow_list.len(),
        runtime.config.exchange.name,
        runtime.config.exchange.market
    );
    for pair in &allow_list {
        println!("{pair}");
    }
    Ok(())
}
