//! Exchange connectivity
//!
//! The [`Exchange`] trait is the low level REST surface of one exchange.
//! [`MarketData`] wraps it with the caching and refresh machinery the rest
//! of the bot uses: markets loaded once, per (pair, timeframe) candle caches
//! and batched, retried OHLCV downloads.

pub mod binance;

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::candles::clean_candles;
use crate::config::{Config, ExchangeConfig, MarketKind};
use crate::error::{ExchangeError, ExchangeResult};
use crate::events::Events;
use crate::timeframe::{format_ms_time, Timeframe};
use crate::types::{Balance, Candle, Market, Pair, Ticker};

/// Maximum retry count. Calls are made API_RETRY_COUNT + 1 times in total.
pub const API_RETRY_COUNT: u32 = 4;

/// How many OHLCV requests are in flight at once during batch refreshes
const FETCH_BATCH_SIZE: usize = 100;

/// Per-exchange capability and limit table
#[derive(Debug, Clone)]
pub struct ExchangeFeatures {
    /// Maximum candles a single OHLCV call may return
    pub candle_limit: u32,
    /// Exchanges with per-timeframe limits override the default here
    pub candle_limit_per_timeframe: HashMap<Timeframe, u32>,
}

impl Default for ExchangeFeatures {
    fn default() -> Self {
        ExchangeFeatures {
            candle_limit: 500,
            candle_limit_per_timeframe: HashMap::new(),
        }
    }
}

impl ExchangeFeatures {
    pub fn candle_limit(&self, timeframe: Timeframe) -> u32 {
        self.candle_limit_per_timeframe
            .get(&timeframe)
            .copied()
            .unwrap_or(self.candle_limit)
    }
}

/// Low level exchange REST API
#[async_trait]
pub trait Exchange: Send + Sync {
    fn name(&self) -> &'static str;

    fn market_kind(&self) -> MarketKind;

    fn features(&self) -> &ExchangeFeatures;

    /// All markets listed on the exchange, keyed by unified pair
    async fn fetch_markets(&self) -> ExchangeResult<HashMap<Pair, Market>>;

    /// 24h tickers for every market
    async fn fetch_tickers(&self) -> ExchangeResult<HashMap<Pair, Ticker>>;

    /// Candle history for one pair, oldest first not guaranteed
    async fn fetch_ohlcv(
        &self,
        pair: &Pair,
        timeframe: Timeframe,
        since_ms: Option<i64>,
        limit: u32,
    ) -> ExchangeResult<Vec<Candle>>;

    /// Account balances; requires configured credentials. Exchanges without
    /// a balance endpoint keep the default.
    async fn fetch_balances(&self) -> ExchangeResult<Vec<Balance>> {
        Err(ExchangeError::NotSupported {
            exchange: self.name(),
            operation: "fetch_balances",
        })
    }
}

/// Exchanges this crate implements, as (name, market) combinations
const SUPPORTED: &[(&str, MarketKind)] = &[("binance", MarketKind::Futures)];

pub fn is_supported(name: &str, market: MarketKind) -> bool {
    SUPPORTED
        .iter()
        .any(|(n, m)| *n == name && *m == market)
}

pub fn supported_exchanges() -> Vec<String> {
    SUPPORTED
        .iter()
        .map(|(n, m)| format!("{n} ({m})"))
        .collect()
}

/// Resolve the exchange implementation for the configuration.
pub fn resolve(config: &ExchangeConfig) -> anyhow::Result<Arc<dyn Exchange>> {
    let mut log_config = serde_json::json!({
        "name": config.name,
        "market": config.market.to_string(),
        "apiKey": config.key,
        "secret": config.secret,
    });
    crate::config::mask_secrets(&mut log_config, &["apiKey", "secret", "password", "uid"]);
    info!(
        "Instantiating API for the {}({}) exchange with the following configuration:\n{}",
        config.name,
        config.market,
        serde_json::to_string_pretty(&log_config).unwrap_or_default()
    );

    match (config.name.as_str(), config.market) {
        ("binance", MarketKind::Futures) => Ok(Arc::new(binance::BinanceFutures::new(config)?)),
        (name, market) => anyhow::bail!(
            "Could not resolve the exchange class based on exchange name '{name}' and \
             market '{market}'. Supported: {}",
            supported_exchanges().join(", ")
        ),
    }
}

/// Backoff delay in seconds for the given remaining retry budget.
pub fn calculate_backoff(retry_count: u32, max_retries: u32) -> u64 {
    u64::from((max_retries - retry_count).pow(2) + 1)
}

/// Run an exchange call with retries for transient failures.
///
/// Rate limit responses additionally sleep a growing backoff delay before
/// the next attempt. Operational errors are returned immediately.
pub async fn with_retries<T, F, Fut>(operation: &str, call: F) -> ExchangeResult<T>
where
    F: Fn() -> Fut,
    Fut: Future<Output = ExchangeResult<T>>,
{
    let mut retries_left = API_RETRY_COUNT;
    loop {
        match call().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() && retries_left > 0 => {
                retries_left -= 1;
                if err.is_rate_limit() {
                    let delay = calculate_backoff(retries_left + 1, API_RETRY_COUNT);
                    info!("Applying rate limit backoff delay: {delay}s");
                    tokio::time::sleep(std::time::Duration::from_secs(delay)).await;
                }
                warn!(
                    "{operation} returned exception: \"{err}\". Retrying still for \
                     {retries_left} times."
                );
            }
            Err(err) => {
                if err.is_retryable() {
                    warn!("{operation} returned exception: \"{err}\". Giving up.");
                }
                return Err(err);
            }
        }
    }
}

type KlineKey = (Pair, Timeframe);

/// Cached market data on top of one exchange connection
pub struct MarketData {
    exchange: Arc<dyn Exchange>,
    config: Arc<Config>,
    events: Events,
    markets: RwLock<Arc<HashMap<Pair, Market>>>,
    klines: RwLock<HashMap<KlineKey, Arc<Vec<Candle>>>>,
    last_refresh: RwLock<HashMap<KlineKey, i64>>,
}

impl MarketData {
    pub fn new(exchange: Arc<dyn Exchange>, config: Arc<Config>, events: Events) -> Self {
        MarketData {
            exchange,
            config,
            events,
            markets: RwLock::new(Arc::new(HashMap::new())),
            klines: RwLock::new(HashMap::new()),
            last_refresh: RwLock::new(HashMap::new()),
        }
    }

    pub fn exchange(&self) -> &Arc<dyn Exchange> {
        &self.exchange
    }

    pub fn candle_limit(&self, timeframe: Timeframe) -> u32 {
        self.exchange.features().candle_limit(timeframe)
    }

    /// Load the exchange markets, once. Emits MarketsAvailable on first load.
    pub async fn get_markets(&self) -> ExchangeResult<Arc<HashMap<Pair, Market>>> {
        {
            let markets = self.markets.read().await;
            if !markets.is_empty() {
                return Ok(Arc::clone(&markets));
            }
        }
        info!("Loading markets");
        let loaded = Arc::new(self.exchange.fetch_markets().await?);
        *self.markets.write().await = Arc::clone(&loaded);
        self.events.emit_markets(Arc::clone(&loaded));
        Ok(loaded)
    }

    /// The markets loaded so far; empty before the first `get_markets` call.
    pub async fn markets(&self) -> Arc<HashMap<Pair, Market>> {
        Arc::clone(&*self.markets.read().await)
    }

    /// Fetch fresh tickers. Emits TickersAvailable.
    pub async fn get_tickers(&self) -> ExchangeResult<Arc<HashMap<Pair, Ticker>>> {
        info!(
            "Fetching tickers for exchange {}({})",
            self.exchange.name(),
            self.exchange.market_kind()
        );
        let tickers = Arc::new(self.exchange.fetch_tickers().await?);
        debug!(
            "Fetched {} tickers from {}({})",
            tickers.len(),
            self.exchange.name(),
            self.exchange.market_kind()
        );
        self.events.emit_tickers(Arc::clone(&tickers));
        Ok(tickers)
    }

    /// Quote currency of a known market pair.
    pub async fn pair_quote_currency(&self, pair: &Pair) -> Option<String> {
        self.markets
            .read()
            .await
            .get(pair)
            .map(|market| market.quote.clone())
    }

    /// Cached candles for one pair and timeframe.
    pub async fn klines(&self, pair: &Pair, timeframe: Timeframe) -> Option<Arc<Vec<Candle>>> {
        self.klines
            .read()
            .await
            .get(&(pair.clone(), timeframe))
            .cloned()
    }

    /// Refresh in-memory OHLCV data for a set of pair/timeframe combinations.
    ///
    /// Entries whose cached series is still inside the current candle are
    /// reused. The rest is downloaded in bounded concurrent batches; a
    /// failing pair is logged and skipped without aborting the batch.
    pub async fn refresh_latest_ohlcv(
        &self,
        pair_list: &[(Pair, Timeframe)],
        since_ms: Option<i64>,
        cache: bool,
    ) -> ExchangeResult<HashMap<KlineKey, Arc<Vec<Candle>>>> {
        debug!("Refreshing candle (OHLCV) data for {} pairs", pair_list.len());

        let unique: HashSet<KlineKey> = pair_list.iter().cloned().collect();
        let mut to_fetch: Vec<KlineKey> = Vec::new();
        let mut results: HashMap<KlineKey, Arc<Vec<Candle>>> = HashMap::new();

        for key in unique {
            let cached = cache
                && !self.now_is_time_to_refresh(&key).await
                && self.klines.read().await.contains_key(&key);
            if cached {
                debug!(
                    "Using cached candle (OHLCV) data for pair {}, timeframe {}",
                    key.0, key.1
                );
                if let Some(series) = self.klines.read().await.get(&key) {
                    results.insert(key, Arc::clone(series));
                }
            } else {
                to_fetch.push(key);
            }
        }

        for batch in to_fetch.chunks(FETCH_BATCH_SIZE) {
            let futures = batch.iter().map(|(pair, timeframe)| async move {
                let outcome = self
                    .fetch_series(pair, *timeframe, since_ms)
                    .await;
                ((pair.clone(), *timeframe), outcome)
            });

            for (key, outcome) in futures::future::join_all(futures).await {
                let candles = match outcome {
                    Ok(candles) => candles,
                    Err(err) => {
                        warn!(
                            "Failed refreshing candle (OHLCV) data for pair {}: {err}",
                            key.0
                        );
                        continue;
                    }
                };
                if let Some(last) = candles.last() {
                    self.last_refresh
                        .write()
                        .await
                        .insert(key.clone(), last.open_time.timestamp());
                }
                let cleaned = Arc::new(clean_candles(candles, key.1, &key.0, true, true));
                if cache {
                    self.klines
                        .write()
                        .await
                        .insert(key.clone(), Arc::clone(&cleaned));
                }
                results.insert(key, cleaned);
            }
        }

        Ok(results)
    }

    async fn fetch_series(
        &self,
        pair: &Pair,
        timeframe: Timeframe,
        since_ms: Option<i64>,
    ) -> ExchangeResult<Vec<Candle>> {
        let mut since_ms = since_ms;
        let call_count = self.config.exchange.required_candle_call_count;
        if since_ms.is_none() && call_count > 1 {
            // Multiple calls for one pair, to reach further back in history
            let one_call = timeframe.as_millis() * i64::from(self.candle_limit(timeframe));
            let now = timeframe.next_date(Utc::now()).timestamp_millis();
            since_ms = Some(now - one_call * i64::from(call_count));
        }

        match since_ms {
            Some(since) => self.get_historic_ohlcv(pair, timeframe, since).await,
            None => self.candle_history(pair, timeframe, None).await,
        }
    }

    /// Download candle history from `since_ms` to now, paging by the
    /// exchange candle limit and fetching pages concurrently.
    pub async fn get_historic_ohlcv(
        &self,
        pair: &Pair,
        timeframe: Timeframe,
        since_ms: i64,
    ) -> ExchangeResult<Vec<Candle>> {
        let one_call = timeframe.as_millis() * i64::from(self.candle_limit(timeframe));
        debug!(
            "Fetching history for {pair} {timeframe} since {} in pages of {} candles",
            format_ms_time(since_ms),
            self.candle_limit(timeframe)
        );

        let now_ms = Utc::now().timestamp_millis();
        let pages: Vec<i64> = (0..)
            .map(|page| since_ms + page * one_call)
            .take_while(|start| *start < now_ms)
            .collect();

        let mut data: Vec<Candle> = Vec::new();
        for batch in pages.chunks(FETCH_BATCH_SIZE) {
            let futures = batch
                .iter()
                .map(|start| self.candle_history(pair, timeframe, Some(*start)));
            for page in futures::future::join_all(futures).await {
                data.extend(page?);
            }
        }

        // Pages complete in arbitrary order
        data.sort_by_key(|c| c.open_time);
        Ok(data)
    }

    /// Single retried OHLCV call, candles returned oldest first.
    pub async fn candle_history(
        &self,
        pair: &Pair,
        timeframe: Timeframe,
        since_ms: Option<i64>,
    ) -> ExchangeResult<Vec<Candle>> {
        let limit = self.candle_limit(timeframe);
        let mut candles = with_retries("candle_history", || async move {
            debug!(
                "Fetching pair {pair}, interval {timeframe}, since {:?}",
                since_ms.map(format_ms_time)
            );
            self.exchange
                .fetch_ohlcv(pair, timeframe, since_ms, limit)
                .await
        })
        .await?;

        // Some exchanges return candles newest first
        if candles
            .first()
            .zip(candles.last())
            .is_some_and(|(first, last)| first.open_time > last.open_time)
        {
            candles.sort_by_key(|c| c.open_time);
        }
        Ok(candles)
    }

    /// Whether the cached series for `key` has fallen behind by at least one
    /// full candle.
    async fn now_is_time_to_refresh(&self, key: &KlineKey) -> bool {
        let last_refresh = self
            .last_refresh
            .read()
            .await
            .get(key)
            .copied()
            .unwrap_or(0);
        last_refresh + (key.1.as_secs() as i64) < Utc::now().timestamp()
    }
}
