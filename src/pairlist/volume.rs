//! Volume ranked pair list

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;
use tracing::info;

use crate::candles::rolling_quote_volume;
use crate::config::{Config, VolumePairListConfig};
use crate::exchange::MarketData;
use crate::pairlist::{
    allow_list_for_active_markets, verify_block_list, PairListHandler, Tickers,
};
use crate::timeframe::{format_ms_time, Timeframe};
use crate::types::Pair;

/// Ranks pairs quoted in the stake currency by quote volume and keeps the
/// top `number_assets`.
///
/// Volumes come from the 24h ticker, or from a rolling candle window when a
/// lookback is configured. Generated lists are cached for `refresh_period`
/// seconds.
pub struct VolumePairList {
    config: VolumePairListConfig,
    app_config: Arc<Config>,
    market_data: Arc<MarketData>,
    pair_cache: Mutex<Option<(Instant, Vec<Pair>)>>,
}

impl VolumePairList {
    pub fn new(
        config: VolumePairListConfig,
        app_config: Arc<Config>,
        market_data: Arc<MarketData>,
    ) -> Result<Self> {
        if config.use_range() {
            let candle_limit = market_data.candle_limit(config.lookback_timeframe);
            if config.lookback_period > candle_limit {
                bail!(
                    "VolumeFilter requires lookback_period to not exceed the exchange \
                     request size ({candle_limit})"
                );
            }
        }
        Ok(VolumePairList {
            config,
            app_config,
            market_data,
            pair_cache: Mutex::new(None),
        })
    }

    /// Quote volume per pair, from candles when range mode is on, from the
    /// ticker otherwise.
    async fn pair_volumes(
        &self,
        pairlist: Vec<Pair>,
        tickers: &Tickers,
    ) -> Result<Vec<(Pair, f64)>> {
        let mut volumes: Vec<(Pair, f64)> = pairlist
            .into_iter()
            .filter(|pair| tickers.contains_key(pair))
            .map(|pair| {
                let quote_volume = tickers
                    .get(&pair)
                    .and_then(|ticker| ticker.quote_volume)
                    .unwrap_or(0.0);
                (pair, quote_volume)
            })
            .collect();

        if self.config.use_range() {
            let timeframe = self.config.lookback_timeframe;
            let window_minutes =
                i64::from(self.config.lookback_period + 1) * i64::from(timeframe.as_minutes());
            let now = Utc::now();
            let since_ms = timeframe
                .prev_date(now - chrono::Duration::minutes(window_minutes))
                .timestamp_millis();
            let to_ms = timeframe.prev_date(now).timestamp_millis();
            info!(
                "Using volume range of {} candles, timeframe: {}, starting from {} till {}",
                self.config.lookback_period,
                timeframe,
                format_ms_time(since_ms),
                format_ms_time(to_ms)
            );

            let needed: Vec<(Pair, Timeframe)> = volumes
                .iter()
                .map(|(pair, _)| (pair.clone(), timeframe))
                .collect();
            let candles = self
                .market_data
                .refresh_latest_ohlcv(&needed, Some(since_ms), false)
                .await?;

            for (pair, quote_volume) in &mut volumes {
                *quote_volume = candles
                    .get(&(pair.clone(), timeframe))
                    .map(|series| {
                        rolling_quote_volume(series, self.config.lookback_period as usize)
                    })
                    .unwrap_or(0.0);
            }
        }
        Ok(volumes)
    }
}

#[async_trait]
impl PairListHandler for VolumePairList {
    fn name(&self) -> &'static str {
        "VolumePairList"
    }

    fn needs_tickers(&self) -> bool {
        true
    }

    async fn gen_pairlist(&self, tickers: &Tickers) -> Result<Vec<Pair>> {
        let mut cache = self.pair_cache.lock().await;
        if let Some((generated_at, pairlist)) = cache.as_ref() {
            // An empty resolution is a miss, not a result to keep serving
            if !pairlist.is_empty()
                && generated_at.elapsed() < Duration::from_secs(self.config.refresh_period)
            {
                return Ok(pairlist.clone());
            }
        }

        let stake = &self.app_config.stake_currency;
        let mut candidates: Vec<Pair> = Vec::new();
        for (pair, ticker) in tickers.iter() {
            let quote = self.market_data.pair_quote_currency(pair).await;
            if quote.as_deref() == Some(stake.as_str())
                && (self.config.use_range() || ticker.quote_volume.is_some())
            {
                candidates.push(pair.clone());
            }
        }

        let pairlist = self.filter_pairlist(candidates, tickers).await?;
        *cache = Some((Instant::now(), pairlist.clone()));
        Ok(pairlist)
    }

    async fn filter_pairlist(&self, pairlist: Vec<Pair>, tickers: &Tickers) -> Result<Vec<Pair>> {
        let mut volumes = self.pair_volumes(pairlist, tickers).await?;

        if self.config.min_value > 0.0 {
            volumes.retain(|(_, quote_volume)| *quote_volume > self.config.min_value);
        }
        volumes.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

        let markets = self.market_data.markets().await;
        let mut pairs: Vec<Pair> = volumes.into_iter().map(|(pair, _)| pair).collect();
        pairs = allow_list_for_active_markets(
            pairs,
            &self.app_config.exchange.name,
            &markets,
        )?;
        pairs = verify_block_list(pairs, &self.app_config.exchange.pair_block_list, &markets);
        pairs.truncate(self.config.number_assets);

        info!("Searching {} pairs: {pairs:?}", pairs.len());
        Ok(pairs)
    }
}
