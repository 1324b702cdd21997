//! mcookbook
//!
//! Crypto exchange connectivity with dynamic pair list resolution:
//! loads markets and tickers from an exchange, ranks and filters trading
//! pairs through a configurable handler chain, and keeps an OHLCV cache
//! warm for the resolved pairs.

pub mod candles;
pub mod config;
pub mod error;
pub mod events;
pub mod exchange;
pub mod pairlist;
pub mod service;
pub mod timeframe;
pub mod types;

pub use config::Config;
pub use error::{ExchangeError, ExchangeResult};
pub use timeframe::Timeframe;
pub use types::{Balance, Candle, Market, Pair, Ticker};
