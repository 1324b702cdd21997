//! Live pair list service
//!
//! Wires the event bus to the exchange layer: market loading kicks off the
//! first pair list refresh, resolved pair lists warm up the candle cache,
//! and a timer keeps the list fresh until shutdown.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::events::{AppEvent, Events};
use crate::exchange::MarketData;
use crate::pairlist::PairListManager;
use crate::timeframe::Timeframe;
use crate::types::Pair;

const WARMUP_TIMEFRAME: Timeframe = Timeframe::MIN_1;

pub struct LiveService {
    config: Arc<Config>,
    events: Events,
    market_data: Arc<MarketData>,
    pairlists: Arc<PairListManager>,
    refresh_interval: Duration,
}

impl LiveService {
    pub fn new(
        config: Arc<Config>,
        events: Events,
        market_data: Arc<MarketData>,
        pairlists: Arc<PairListManager>,
        refresh_interval: Duration,
    ) -> Self {
        LiveService {
            config,
            events,
            market_data,
            pairlists,
            refresh_interval,
        }
    }

    /// Run until ctrl-c.
    pub async fn run(&self) -> Result<()> {
        if self.config.exchange.has_credentials() {
            self.log_balances().await?;
        }

        let mut receiver = self.events.subscribe();
        self.events.emit(AppEvent::Start);

        let mut ticker = tokio::time::interval(self.refresh_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        ticker.tick().await; // the first tick fires immediately

        loop {
            tokio::select! {
                event = receiver.recv() => match event {
                    Ok(event) => self.handle_event(event).await?,
                    Err(RecvError::Lagged(missed)) => {
                        warn!("Event loop lagged, {missed} events dropped");
                    }
                    Err(RecvError::Closed) => break,
                },
                _ = ticker.tick() => {
                    if let Err(err) = self.pairlists.refresh_pairlist().await {
                        error!("Pair list refresh failed: {err:#}");
                    }
                }
                _ = tokio::signal::ctrl_c() => {
                    info!("Shutdown requested");
                    self.events.emit(AppEvent::Stop);
                    break;
                }
            }
        }
        Ok(())
    }

    async fn handle_event(&self, event: AppEvent) -> Result<()> {
        debug!("Handling {} event", event.name());
        match event {
            AppEvent::Start => {
                self.market_data
                    .get_markets()
                    .await
                    .context("Failed to load markets")?;
            }
            AppEvent::MarketsAvailable(markets) => {
                info!("Loaded {} markets", markets.len());
                self.pairlists.refresh_pairlist().await?;
            }
            AppEvent::PairsAvailable(pairs) => {
                self.warm_up_candles(&pairs).await;
            }
            AppEvent::TickersAvailable(_) => {}
            AppEvent::Stop => {}
        }
        Ok(())
    }

    /// Pre-load a day of minute candles for the resolved pairs so later
    /// lookups hit the cache.
    async fn warm_up_candles(&self, pairs: &[Pair]) {
        let pair_list: Vec<(Pair, Timeframe)> = pairs
            .iter()
            .map(|pair| (pair.clone(), WARMUP_TIMEFRAME))
            .collect();
        let since_ms = Self::warmup_window_start(Utc::now());
        if let Err(err) = self
            .market_data
            .refresh_latest_ohlcv(&pair_list, Some(since_ms), true)
            .await
        {
            error!("Candle warm-up failed: {err}");
        }
    }

    /// Midnight UTC of the previous day, the start of the warm-up window.
    fn warmup_window_start(now: chrono::DateTime<chrono::Utc>) -> i64 {
        (Timeframe::DAY_1.prev_date(now) - chrono::Duration::days(1)).timestamp_millis()
    }

    async fn log_balances(&self) -> Result<()> {
        let balances = crate::exchange::with_retries("fetch_balances", || {
            let exchange = Arc::clone(self.market_data.exchange());
            async move { exchange.fetch_balances().await }
        })
        .await
        .context("Failed to fetch account balances")?;

        for balance in &balances {
            info!(
                "Balance {}: total {}, available {}",
                balance.currency, balance.total, balance.available
            );
        }
        if balances.is_empty() {
            info!("No non-zero account balances");
        }
        Ok(())
    }
}
