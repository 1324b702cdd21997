//! Integration tests for the pair list pipeline
//!
//! These tests drive the market data layer and the pair list handler chain
//! against a mock exchange, end to end from configuration to resolved
//! allow list.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::{Duration, Utc};
use serde_json::json;

use async_trait::async_trait;
use mcookbook::config::{Config, MarketKind};
use mcookbook::events::{AppEvent, Events};
use mcookbook::exchange::{Exchange, ExchangeFeatures, MarketData};
use mcookbook::pairlist::PairListManager;
use mcookbook::{Candle, ExchangeResult, Market, Pair, Ticker, Timeframe};

// =============================================================================
// Test Utilities
// =============================================================================

/// In-memory exchange with canned data
struct MockExchange {
    features: ExchangeFeatures,
    markets: HashMap<Pair, Market>,
    tickers: HashMap<Pair, Ticker>,
    candles: HashMap<Pair, Vec<Candle>>,
    ohlcv_calls: AtomicUsize,
}

impl MockExchange {
    fn new() -> Self {
        MockExchange {
            features: ExchangeFeatures::default(),
            markets: HashMap::new(),
            tickers: HashMap::new(),
            candles: HashMap::new(),
            ohlcv_calls: AtomicUsize::new(0),
        }
    }

    fn with_market(mut self, pair: &str, active: bool) -> Self {
        let pair = Pair::new(pair);
        let market = Market {
            pair: pair.clone(),
            id: pair.as_str().replace('/', ""),
            base: pair.as_str().split('/').next().unwrap_or_default().to_string(),
            quote: pair.quote().unwrap_or_default().to_string(),
            active,
        };
        self.markets.insert(pair, market);
        self
    }

    fn with_ticker(mut self, pair: &str, quote_volume: Option<f64>) -> Self {
        let pair = Pair::new(pair);
        let ticker = Ticker {
            pair: pair.clone(),
            last: 100.0,
            bid: Some(99.5),
            ask: Some(100.5),
            base_volume: 1_000.0,
            quote_volume,
        };
        self.tickers.insert(pair, ticker);
        self
    }

    fn with_candles(mut self, pair: &str, candles: Vec<Candle>) -> Self {
        self.candles.insert(Pair::new(pair), candles);
        self
    }

    fn with_candle_limit(mut self, limit: u32) -> Self {
        self.features.candle_limit = limit;
        self
    }
}

#[async_trait]
impl Exchange for MockExchange {
    fn name(&self) -> &'static str {
        "binance"
    }

    fn market_kind(&self) -> MarketKind {
        MarketKind::Futures
    }

    fn features(&self) -> &ExchangeFeatures {
        &self.features
    }

    async fn fetch_markets(&self) -> ExchangeResult<HashMap<Pair, Market>> {
        Ok(self.markets.clone())
    }

    async fn fetch_tickers(&self) -> ExchangeResult<HashMap<Pair, Ticker>> {
        Ok(self.tickers.clone())
    }

    async fn fetch_ohlcv(
        &self,
        pair: &Pair,
        _timeframe: Timeframe,
        since_ms: Option<i64>,
        limit: u32,
    ) -> ExchangeResult<Vec<Candle>> {
        self.ohlcv_calls.fetch_add(1, Ordering::SeqCst);
        let mut series = self.candles.get(pair).cloned().unwrap_or_default();
        if let Some(since) = since_ms {
            series.retain(|candle| candle.open_time.timestamp_millis() >= since);
        }
        series.truncate(limit as usize);
        // Newest first, like exchanges that return descending klines
        series.reverse();
        Ok(series)
    }

    async fn fetch_balances(&self) -> ExchangeResult<Vec<mcookbook::Balance>> {
        Ok(Vec::new())
    }
}

/// Hourly candles with the given volumes, ending at the current hour.
///
/// The newest candle is the incomplete one the cleaning step drops.
fn hourly_candles(volumes: &[f64]) -> Vec<Candle> {
    let timeframe: Timeframe = "1h".parse().unwrap();
    let end = timeframe.prev_date(Utc::now());
    volumes
        .iter()
        .enumerate()
        .map(|(i, volume)| {
            let offset = (volumes.len() - 1 - i) as i64;
            Candle::new_unchecked(
                end - Duration::hours(offset),
                100.0,
                101.0,
                99.0,
                100.0,
                *volume,
            )
        })
        .collect()
}

fn build(
    config_value: serde_json::Value,
    exchange: MockExchange,
) -> (Arc<MarketData>, PairListManager, Events) {
    build_with(config_value, Arc::new(exchange))
}

fn build_with(
    config_value: serde_json::Value,
    exchange: Arc<MockExchange>,
) -> (Arc<MarketData>, PairListManager, Events) {
    let config = Arc::new(Config::from_value(config_value).unwrap());
    let events = Events::new();
    let market_data = Arc::new(MarketData::new(
        exchange,
        Arc::clone(&config),
        events.clone(),
    ));
    let manager =
        PairListManager::new(config, Arc::clone(&market_data), events.clone()).unwrap();
    (market_data, manager, events)
}

fn pairs(names: &[&str]) -> Vec<Pair> {
    names.iter().map(Pair::new).collect()
}

// =============================================================================
// Static pair list
// =============================================================================

#[tokio::test]
async fn static_pairlist_keeps_only_active_markets() {
    let exchange = MockExchange::new()
        .with_market("BTC/USDT", true)
        .with_market("ETH/USDT", true)
        .with_market("XRP/USDT", false);
    let (market_data, manager, _) = build(
        json!({
            "exchange": {
                "name": "binance",
                "market": "futures",
                "pair_allow_list": ["BTC/USDT", "ETH/USDT", "XRP/USDT", "DOGE/USDT"]
            },
            "pairlists": [{"name": "StaticPairList"}]
        }),
        exchange,
    );

    market_data.get_markets().await.unwrap();
    manager.refresh_pairlist().await.unwrap();

    assert_eq!(manager.allow_list().await, pairs(&["BTC/USDT", "ETH/USDT"]));
}

#[tokio::test]
async fn static_pairlist_expands_wildcards() {
    let exchange = MockExchange::new()
        .with_market("BTC/USDT", true)
        .with_market("ETH/USDT", true)
        .with_market("ETH/BTC", true);
    let (market_data, manager, _) = build(
        json!({
            "exchange": {
                "name": "binance",
                "market": "futures",
                "pair_allow_list": [".*/USDT"]
            },
            "pairlists": [{"name": "StaticPairList"}]
        }),
        exchange,
    );

    market_data.get_markets().await.unwrap();
    manager.refresh_pairlist().await.unwrap();

    let mut allow_list = manager.allow_list().await;
    allow_list.sort();
    assert_eq!(allow_list, pairs(&["BTC/USDT", "ETH/USDT"]));
}

#[tokio::test]
async fn block_list_wins_over_allow_list() {
    let exchange = MockExchange::new()
        .with_market("BTC/USDT", true)
        .with_market("DOGE/USDT", true);
    let (market_data, manager, _) = build(
        json!({
            "exchange": {
                "name": "binance",
                "market": "futures",
                "pair_allow_list": ["BTC/USDT", "DOGE/USDT"],
                "pair_block_list": ["DOGE/.*"]
            },
            "pairlists": [{"name": "StaticPairList"}]
        }),
        exchange,
    );

    market_data.get_markets().await.unwrap();
    manager.refresh_pairlist().await.unwrap();

    assert_eq!(manager.allow_list().await, pairs(&["BTC/USDT"]));
}

// =============================================================================
// Volume pair list
// =============================================================================

#[tokio::test]
async fn volume_pairlist_ranks_by_ticker_quote_volume() {
    let exchange = MockExchange::new()
        .with_market("BTC/USDT", true)
        .with_market("ETH/USDT", true)
        .with_market("XRP/USDT", true)
        .with_market("ETH/BTC", true)
        .with_ticker("BTC/USDT", Some(5_000.0))
        .with_ticker("ETH/USDT", Some(9_000.0))
        .with_ticker("XRP/USDT", Some(1_000.0))
        .with_ticker("ETH/BTC", Some(50_000.0));
    let (market_data, manager, _) = build(
        json!({
            "exchange": {"name": "binance", "market": "futures"},
            "stake_currency": "USDT",
            "pairlists": [{"name": "VolumePairList", "number_assets": 2}]
        }),
        exchange,
    );

    market_data.get_markets().await.unwrap();
    manager.refresh_pairlist().await.unwrap();

    // ETH/BTC is ignored: not quoted in the stake currency
    assert_eq!(manager.allow_list().await, pairs(&["ETH/USDT", "BTC/USDT"]));
}

#[tokio::test]
async fn volume_pairlist_applies_min_value() {
    let exchange = MockExchange::new()
        .with_market("BTC/USDT", true)
        .with_market("XRP/USDT", true)
        .with_ticker("BTC/USDT", Some(5_000.0))
        .with_ticker("XRP/USDT", Some(100.0));
    let (market_data, manager, _) = build(
        json!({
            "exchange": {"name": "binance", "market": "futures"},
            "pairlists": [{
                "name": "VolumePairList",
                "number_assets": 10,
                "min_value": 500.0
            }]
        }),
        exchange,
    );

    market_data.get_markets().await.unwrap();
    manager.refresh_pairlist().await.unwrap();

    assert_eq!(manager.allow_list().await, pairs(&["BTC/USDT"]));
}

#[tokio::test]
async fn volume_pairlist_range_mode_ranks_by_candle_volume() {
    // Ticker quote volumes say XRP > BTC, the candle lookback says otherwise
    let exchange = MockExchange::new()
        .with_market("BTC/USDT", true)
        .with_market("XRP/USDT", true)
        .with_ticker("BTC/USDT", Some(10.0))
        .with_ticker("XRP/USDT", Some(90_000.0))
        .with_candles("BTC/USDT", hourly_candles(&[50.0, 50.0, 50.0, 50.0]))
        .with_candles("XRP/USDT", hourly_candles(&[1.0, 1.0, 1.0, 1.0]));
    let (market_data, manager, _) = build(
        json!({
            "exchange": {"name": "binance", "market": "futures"},
            "pairlists": [{
                "name": "VolumePairList",
                "number_assets": 2,
                "lookback_timeframe": "1h",
                "lookback_period": 2,
                "refresh_period": 3600
            }]
        }),
        exchange,
    );

    market_data.get_markets().await.unwrap();
    manager.refresh_pairlist().await.unwrap();

    assert_eq!(manager.allow_list().await, pairs(&["BTC/USDT", "XRP/USDT"]));
}

#[tokio::test]
async fn chained_handlers_filter_the_generated_list() {
    // VolumePairList generates, StaticPairList appends its configured pairs
    let exchange = MockExchange::new()
        .with_market("BTC/USDT", true)
        .with_market("ETH/USDT", true)
        .with_market("LTC/USDT", true)
        .with_ticker("BTC/USDT", Some(5_000.0))
        .with_ticker("ETH/USDT", Some(9_000.0))
        .with_ticker("LTC/USDT", Some(10.0));
    let (market_data, manager, _) = build(
        json!({
            "exchange": {
                "name": "binance",
                "market": "futures",
                "pair_allow_list": ["LTC/USDT"]
            },
            "pairlists": [
                {"name": "VolumePairList", "number_assets": 2},
                {"name": "StaticPairList"}
            ]
        }),
        exchange,
    );

    market_data.get_markets().await.unwrap();
    manager.refresh_pairlist().await.unwrap();

    assert_eq!(
        manager.allow_list().await,
        pairs(&["ETH/USDT", "BTC/USDT", "LTC/USDT"])
    );
}

// =============================================================================
// Events
// =============================================================================

#[tokio::test]
async fn refresh_emits_markets_tickers_and_pairs_events() {
    let exchange = MockExchange::new()
        .with_market("BTC/USDT", true)
        .with_ticker("BTC/USDT", Some(5_000.0));
    let (market_data, manager, events) = build(
        json!({
            "exchange": {"name": "binance", "market": "futures"},
            "pairlists": [{"name": "VolumePairList", "number_assets": 5}]
        }),
        exchange,
    );
    let mut receiver = events.subscribe();

    market_data.get_markets().await.unwrap();
    manager.refresh_pairlist().await.unwrap();

    let mut seen = Vec::new();
    while let Ok(event) = receiver.try_recv() {
        seen.push(event.name());
        if let AppEvent::PairsAvailable(resolved) = event {
            assert_eq!(*resolved, pairs(&["BTC/USDT"]));
        }
    }
    assert_eq!(
        seen,
        vec!["MarketsAvailable", "TickersAvailable", "PairsAvailable"]
    );
}

// =============================================================================
// Candle cache
// =============================================================================

#[tokio::test]
async fn refresh_latest_ohlcv_reuses_cached_series() {
    let timeframe: Timeframe = "1h".parse().unwrap();
    let exchange = Arc::new(
        MockExchange::new()
            .with_market("BTC/USDT", true)
            .with_candles("BTC/USDT", hourly_candles(&[10.0, 20.0, 30.0, 40.0])),
    );
    let (market_data, _, _) = build_with(
        json!({
            "exchange": {"name": "binance", "market": "futures"},
            "pairlists": [{"name": "StaticPairList"}]
        }),
        Arc::clone(&exchange),
    );

    let wanted = vec![(Pair::new("BTC/USDT"), timeframe)];
    let first = market_data
        .refresh_latest_ohlcv(&wanted, None, true)
        .await
        .unwrap();
    // The newest candle is dropped as incomplete
    let series = first.get(&(Pair::new("BTC/USDT"), timeframe)).unwrap();
    assert_eq!(series.len(), 3);
    assert_eq!(series.last().unwrap().volume, 30.0);

    // A second refresh inside the same candle is served from the cache
    let second = market_data
        .refresh_latest_ohlcv(&wanted, None, true)
        .await
        .unwrap();
    assert_eq!(
        second.get(&(Pair::new("BTC/USDT"), timeframe)).unwrap().len(),
        3
    );
    assert_eq!(exchange.ohlcv_calls.load(Ordering::SeqCst), 1);

    let cached = market_data
        .klines(&Pair::new("BTC/USDT"), timeframe)
        .await
        .unwrap();
    assert_eq!(cached.len(), 3);
}

#[tokio::test]
async fn refresh_handles_pairs_without_candle_data() {
    // DOGE/USDT has no candle data; its series comes back empty while the
    // other pair is unaffected
    let timeframe: Timeframe = "1h".parse().unwrap();
    let exchange = MockExchange::new()
        .with_market("BTC/USDT", true)
        .with_candles("BTC/USDT", hourly_candles(&[10.0, 20.0, 30.0]));
    let (market_data, _, _) = build(
        json!({
            "exchange": {"name": "binance", "market": "futures"},
            "pairlists": [{"name": "StaticPairList"}]
        }),
        exchange,
    );

    let wanted = vec![
        (Pair::new("BTC/USDT"), timeframe),
        (Pair::new("DOGE/USDT"), timeframe),
    ];
    let result = market_data
        .refresh_latest_ohlcv(&wanted, None, false)
        .await
        .unwrap();

    assert_eq!(
        result.get(&(Pair::new("BTC/USDT"), timeframe)).unwrap().len(),
        2
    );
    assert!(result
        .get(&(Pair::new("DOGE/USDT"), timeframe))
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn historic_ohlcv_assembles_pages_in_order() {
    // candle_limit 3 forces paging; the mock returns each page newest first
    let timeframe: Timeframe = "1h".parse().unwrap();
    let volumes: Vec<f64> = (1..=8).map(f64::from).collect();
    let exchange = MockExchange::new()
        .with_market("BTC/USDT", true)
        .with_candles("BTC/USDT", hourly_candles(&volumes))
        .with_candle_limit(3);
    let since_ms = timeframe
        .prev_date(Utc::now() - Duration::hours(7))
        .timestamp_millis();
    let (market_data, _, _) = build(
        json!({
            "exchange": {"name": "binance", "market": "futures"},
            "pairlists": [{"name": "StaticPairList"}]
        }),
        exchange,
    );

    let history = market_data
        .get_historic_ohlcv(&Pair::new("BTC/USDT"), timeframe, since_ms)
        .await
        .unwrap();

    assert_eq!(history.len(), 8);
    assert!(history
        .windows(2)
        .all(|pair| pair[0].open_time < pair[1].open_time));
    let fetched: Vec<f64> = history.iter().map(|candle| candle.volume).collect();
    assert_eq!(fetched, volumes);
}

#[tokio::test]
async fn empty_volume_resolution_is_not_cached() {
    use mcookbook::config::VolumePairListConfig;
    use mcookbook::pairlist::volume::VolumePairList;
    use mcookbook::pairlist::PairListHandler;

    let config = Arc::new(
        Config::from_value(json!({
            "exchange": {"name": "binance", "market": "futures"},
            "pairlists": [{"name": "VolumePairList", "number_assets": 5}]
        }))
        .unwrap(),
    );
    let events = Events::new();
    let market_data = Arc::new(MarketData::new(
        Arc::new(MockExchange::new().with_market("BTC/USDT", true)),
        Arc::clone(&config),
        events.clone(),
    ));
    market_data.get_markets().await.unwrap();

    let handler_config: VolumePairListConfig =
        serde_json::from_value(json!({"number_assets": 5})).unwrap();
    let handler =
        VolumePairList::new(handler_config, Arc::clone(&config), market_data).unwrap();

    // No tickers yet: the resolution is empty and must not stick
    let first = handler.gen_pairlist(&HashMap::new()).await.unwrap();
    assert!(first.is_empty());

    let mut tickers = HashMap::new();
    tickers.insert(
        Pair::new("BTC/USDT"),
        Ticker {
            pair: Pair::new("BTC/USDT"),
            last: 100.0,
            bid: None,
            ask: None,
            base_volume: 1_000.0,
            quote_volume: Some(5_000.0),
        },
    );
    let second = handler.gen_pairlist(&tickers).await.unwrap();
    assert_eq!(second, pairs(&["BTC/USDT"]));
}

// =============================================================================
// Configuration files
// =============================================================================

#[tokio::test]
async fn config_files_merge_with_later_files_overriding() {
    let dir = tempfile::tempdir().unwrap();
    let base = dir.path().join("base.json");
    let overlay = dir.path().join("overlay.json");
    std::fs::write(
        &base,
        json!({
            "exchange": {
                "name": "binance",
                "market": "futures",
                "pair_allow_list": ["BTC/USDT"]
            },
            "stake_currency": "USDT",
            "pairlists": [{"name": "StaticPairList"}]
        })
        .to_string(),
    )
    .unwrap();
    std::fs::write(
        &overlay,
        json!({
            "stake_currency": "BUSD",
            "exchange": {"pair_allow_list": ["ETH/BUSD"]}
        })
        .to_string(),
    )
    .unwrap();

    let config = Config::from_files(&[base, overlay]).unwrap();
    assert_eq!(config.stake_currency, "BUSD");
    assert_eq!(config.exchange.name, "binance");
    assert_eq!(config.exchange.pair_allow_list, pairs(&["ETH/BUSD"]));
}
