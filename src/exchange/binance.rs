//! Binance USD-M futures exchange implementation
//!
//! Talks to the `fapi.binance.com` REST API: exchange info for markets, the
//! 24h ticker feed, klines for OHLCV, and the signed balance endpoint for a
//! credential check.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use hmac::{Hmac, Mac};
use reqwest::StatusCode;
use serde::Deserialize;
use sha2::Sha256;
use tokio::sync::RwLock;
use tracing::debug;

use crate::config::{ExchangeConfig, MarketKind};
use crate::error::{ExchangeError, ExchangeResult};
use crate::exchange::{Exchange, ExchangeFeatures};
use crate::timeframe::{timestamp_ms, Timeframe};
use crate::types::{Balance, Candle, Market, Pair, Ticker};

type HmacSha256 = Hmac<Sha256>;

const FAPI_BASE_URL: &str = "https://fapi.binance.com";
const HTTP_TIMEOUT: Duration = Duration::from_secs(30);
const RECV_WINDOW_MS: u64 = 5_000;

pub struct BinanceFutures {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    api_secret: Option<String>,
    features: ExchangeFeatures,
    /// Exchange native symbol -> unified pair, filled on the first
    /// `fetch_markets` call and needed to label tickers
    symbol_pairs: RwLock<HashMap<String, Pair>>,
}

impl BinanceFutures {
    pub fn new(config: &ExchangeConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .map_err(|err| anyhow::anyhow!("Failed to build HTTP client: {err}"))?;

        Ok(BinanceFutures {
            client,
            base_url: config
                .base_url
                .clone()
                .unwrap_or_else(|| FAPI_BASE_URL.to_string()),
            api_key: config.key.clone(),
            api_secret: config.secret.clone(),
            features: ExchangeFeatures::default(),
            symbol_pairs: RwLock::new(HashMap::new()),
        })
    }

    /// Unified pair to Binance symbol: BTC/USDT -> BTCUSDT
    pub fn symbol_id(pair: &Pair) -> String {
        pair.as_str().replace('/', "")
    }

    fn generate_signature(&self, payload: &str) -> ExchangeResult<String> {
        let secret = self.api_secret.as_deref().ok_or_else(|| {
            ExchangeError::Operational("API credentials are not configured".to_string())
        })?;
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
            .map_err(|err| ExchangeError::Operational(format!("Invalid API secret: {err}")))?;
        mac.update(payload.as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: String) -> ExchangeResult<T> {
        let response = self.client.get(&url).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(map_error_status(status, &body));
        }
        response
            .json()
            .await
            .map_err(|err| ExchangeError::Operational(format!("Failed to parse response: {err}")))
    }
}

/// Classify a non-success HTTP status into the exchange error taxonomy.
fn map_error_status(status: StatusCode, body: &str) -> ExchangeError {
    match status.as_u16() {
        // 418 is Binance's "auto-banned for repeated 429s"
        429 | 418 => ExchangeError::DdosProtection(format!("HTTP {status}: {body}")),
        500..=599 => ExchangeError::Temporary(format!("HTTP {status}: {body}")),
        _ => ExchangeError::Operational(format!("HTTP {status}: {body}")),
    }
}

fn parse_f64(value: &str, field: &str) -> ExchangeResult<f64> {
    value
        .parse()
        .map_err(|_| ExchangeError::Operational(format!("Invalid {field} value '{value}'")))
}

/// Parse one kline row. Binance returns arrays:
/// [openTime, open, high, low, close, volume, closeTime, ...]
fn parse_kline(row: &serde_json::Value) -> ExchangeResult<Candle> {
    let invalid = || ExchangeError::Operational(format!("Invalid kline row: {row}"));
    let open_time = row.get(0).and_then(|v| v.as_i64()).ok_or_else(invalid)?;
    let mut fields = [0.0_f64; 5];
    for (idx, field) in fields.iter_mut().enumerate() {
        let value = row
            .get(idx + 1)
            .and_then(|v| v.as_str())
            .ok_or_else(invalid)?;
        *field = parse_f64(value, "kline")?;
    }
    let [open, high, low, close, volume] = fields;
    Ok(Candle::new_unchecked(
        timestamp_ms(open_time),
        open,
        high,
        low,
        close,
        volume,
    ))
}

#[derive(Debug, Deserialize)]
struct ExchangeInfo {
    symbols: Vec<SymbolInfo>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SymbolInfo {
    symbol: String,
    base_asset: String,
    quote_asset: String,
    status: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Ticker24h {
    symbol: String,
    last_price: String,
    volume: String,
    quote_volume: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BalanceEntry {
    asset: String,
    balance: String,
    available_balance: String,
}

#[async_trait]
impl Exchange for BinanceFutures {
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
        let info: ExchangeInfo = self
            .get_json(format!("{}/fapi/v1/exchangeInfo", self.base_url))
            .await?;

        let mut markets = HashMap::with_capacity(info.symbols.len());
        let mut symbol_pairs = HashMap::with_capacity(info.symbols.len());
        for symbol in info.symbols {
            let pair = Pair::new(format!("{}/{}", symbol.base_asset, symbol.quote_asset));
            symbol_pairs.insert(symbol.symbol.clone(), pair.clone());
            markets.insert(
                pair.clone(),
                Market {
                    pair,
                    id: symbol.symbol,
                    base: symbol.base_asset,
                    quote: symbol.quote_asset,
                    active: symbol.status == "TRADING",
                },
            );
        }
        *self.symbol_pairs.write().await = symbol_pairs;
        Ok(markets)
    }

    async fn fetch_tickers(&self) -> ExchangeResult<HashMap<Pair, Ticker>> {
        if self.symbol_pairs.read().await.is_empty() {
            // Tickers are keyed by native symbol; markets give us the mapping
            self.fetch_markets().await?;
        }

        let tickers: Vec<Ticker24h> = self
            .get_json(format!("{}/fapi/v1/ticker/24hr", self.base_url))
            .await?;

        let symbol_pairs = self.symbol_pairs.read().await;
        let mut result = HashMap::with_capacity(tickers.len());
        for ticker in tickers {
            let Some(pair) = symbol_pairs.get(&ticker.symbol) else {
                debug!("Skipping ticker for unknown symbol {}", ticker.symbol);
                continue;
            };
            result.insert(
                pair.clone(),
                Ticker {
                    pair: pair.clone(),
                    last: parse_f64(&ticker.last_price, "lastPrice")?,
                    bid: None,
                    ask: None,
                    base_volume: parse_f64(&ticker.volume, "volume")?,
                    quote_volume: Some(parse_f64(&ticker.quote_volume, "quoteVolume")?),
                },
            );
        }
        Ok(result)
    }

    async fn fetch_ohlcv(
        &self,
        pair: &Pair,
        timeframe: Timeframe,
        since_ms: Option<i64>,
        limit: u32,
    ) -> ExchangeResult<Vec<Candle>> {
        let mut url = format!(
            "{}/fapi/v1/klines?symbol={}&interval={}&limit={}",
            self.base_url,
            Self::symbol_id(pair),
            timeframe,
            limit
        );
        if let Some(since) = since_ms {
            url.push_str(&format!("&startTime={since}"));
        }

        let rows: Vec<serde_json::Value> = self.get_json(url).await?;
        rows.iter().map(parse_kline).collect()
    }

    async fn fetch_balances(&self) -> ExchangeResult<Vec<Balance>> {
        let api_key = self.api_key.as_deref().ok_or_else(|| {
            ExchangeError::Operational("API credentials are not configured".to_string())
        })?;

        let query = format!(
            "timestamp={}&recvWindow={}",
            Utc::now().timestamp_millis(),
            RECV_WINDOW_MS
        );
        let signature = self.generate_signature(&query)?;
        let url = format!(
            "{}/fapi/v2/balance?{query}&signature={signature}",
            self.base_url
        );

        let response = self
            .client
            .get(&url)
            .header("X-MBX-APIKEY", api_key)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(map_error_status(status, &body));
        }

        let entries: Vec<BalanceEntry> = response.json().await.map_err(|err| {
            ExchangeError::Operational(format!("Failed to parse balances: {err}"))
        })?;

        entries
            .into_iter()
            .map(|entry| {
                Ok(Balance {
                    total: parse_f64(&entry.balance, "balance")?,
                    available: parse_f64(&entry.available_balance, "availableBalance")?,
                    currency: entry.asset,
                })
            })
            .collect()
    }
}
