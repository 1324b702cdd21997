//! Pair list resolution
//!
//! The allow list of tradable pairs is produced by a configurable chain of
//! handlers: the first handler generates a candidate list, every following
//! handler filters or reorders it, and the manager applies the block list
//! last so nothing can sneak a blocked pair back in.

pub mod static_list;
pub mod volume;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use regex::RegexBuilder;
use tokio::sync::{Mutex, RwLock};
use tracing::{error, info, warn};

use crate::config::{Config, PairListConfig, DEFAULT_REFRESH_PERIOD};
use crate::events::Events;
use crate::exchange::MarketData;
use crate::types::{Market, Pair, Ticker};

pub type Tickers = HashMap<Pair, Ticker>;

/// One handler in the pair list chain
#[async_trait]
pub trait PairListHandler: Send + Sync {
    fn name(&self) -> &'static str;

    /// Whether this handler needs tickers; when no handler does, the chain
    /// runs with an empty ticker map and no exchange call is made.
    fn needs_tickers(&self) -> bool {
        false
    }

    /// Produce the starting pair list. Only the first handler in the chain
    /// is asked; pure filters keep this default.
    async fn gen_pairlist(&self, _tickers: &Tickers) -> Result<Vec<Pair>> {
        bail!(
            "{} should not be used at the first position in the list of pair list handlers.",
            self.name()
        );
    }

    /// Filter and sort an incoming pair list.
    async fn filter_pairlist(&self, pairlist: Vec<Pair>, tickers: &Tickers) -> Result<Vec<Pair>>;
}

/// Expand a pair list that may contain wildcards against available markets.
///
/// Each entry is treated as an anchored case-insensitive regex. With
/// `keep_invalid`, entries matching no market are kept verbatim as long as
/// they look like plain pairs; regex leftovers are dropped.
pub fn expand_pairlist(
    wildcards: &[Pair],
    available_pairs: &[Pair],
    keep_invalid: bool,
) -> Result<Vec<Pair>> {
    let mut result: Vec<Pair> = Vec::new();
    for wildcard in wildcards {
        let regex = RegexBuilder::new(&format!("^(?:{})$", wildcard.as_str()))
            .case_insensitive(true)
            .build()
            .with_context(|| format!("Wildcard error in {wildcard}"))?;

        let matches: Vec<Pair> = available_pairs
            .iter()
            .filter(|pair| regex.is_match(pair.as_str()))
            .cloned()
            .collect();

        if matches.is_empty() && keep_invalid {
            // Keep the entry itself when it names a pair not on the exchange
            result.push(wildcard.clone());
        } else {
            result.extend(matches);
        }
    }

    if keep_invalid {
        // Entries kept verbatim must look like plain pairs, not regexes
        result.retain(|pair| {
            pair.as_str()
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '/' || c == '-')
        });
    }
    Ok(result)
}

/// Remove block-listed pairs from a pair list.
///
/// An invalid wildcard in the block list empties the result rather than
/// letting blocked pairs through.
pub fn verify_block_list(
    pairlist: Vec<Pair>,
    block_list: &[Pair],
    markets: &HashMap<Pair, Market>,
) -> Vec<Pair> {
    let available: Vec<Pair> = markets.keys().cloned().collect();
    let expanded = match expand_pairlist(block_list, &available, false) {
        Ok(expanded) => expanded,
        Err(err) => {
            error!("Pair block list contains an invalid wildcard: {err:#}");
            return Vec::new();
        }
    };
    pairlist
        .into_iter()
        .filter(|pair| {
            let blocked = expanded.contains(pair);
            if blocked {
                warn!("Pair {pair} in your block list. Removing it from allow list...");
            }
            !blocked
        })
        .collect()
}

/// Expand an allow list against available markets.
pub fn verify_allow_list(
    pairlist: &[Pair],
    markets: &HashMap<Pair, Market>,
    keep_invalid: bool,
) -> Vec<Pair> {
    let available: Vec<Pair> = markets.keys().cloned().collect();
    match expand_pairlist(pairlist, &available, keep_invalid) {
        Ok(expanded) => expanded,
        Err(err) => {
            error!("Pair allow list contains an invalid wildcard: {err:#}");
            Vec::new()
        }
    }
}

/// Restrict a pair list to pairs with an active known market, dropping
/// duplicates along the way.
pub fn allow_list_for_active_markets(
    pairlist: Vec<Pair>,
    exchange_name: &str,
    markets: &HashMap<Pair, Market>,
) -> Result<Vec<Pair>> {
    if markets.is_empty() {
        bail!("Markets not loaded. Make sure that the exchange is initialized correctly.");
    }
    let mut sanitized: Vec<Pair> = Vec::new();
    for pair in pairlist {
        match markets.get(&pair) {
            Some(market) if market.active => {
                if !sanitized.contains(&pair) {
                    sanitized.push(pair);
                }
            }
            Some(_) => {
                warn!("Pair '{pair}' market is not active. Removing it from allow list...");
            }
            None => {
                warn!(
                    "Pair '{pair}' is not compatible with exchange {exchange_name}. \
                     Removing it from allow list..."
                );
            }
        }
    }
    Ok(sanitized)
}

/// Pair list manager driving the handler chain
pub struct PairListManager {
    events: Events,
    market_data: Arc<MarketData>,
    handlers: Vec<Box<dyn PairListHandler>>,
    allow_list: RwLock<Vec<Pair>>,
    block_list: Vec<Pair>,
    tickers_needed: bool,
    ticker_cache: Mutex<Option<(Instant, Arc<Tickers>)>>,
    ticker_ttl: Duration,
}

impl PairListManager {
    pub fn new(
        config: Arc<Config>,
        market_data: Arc<MarketData>,
        events: Events,
    ) -> Result<Self> {
        let mut handlers: Vec<Box<dyn PairListHandler>> = Vec::new();
        for handler_config in &config.pairlists {
            handlers.push(build_handler(handler_config, &config, &market_data)?);
        }
        let tickers_needed = handlers.iter().any(|handler| handler.needs_tickers());

        Ok(PairListManager {
            allow_list: RwLock::new(config.exchange.pair_allow_list.clone()),
            block_list: config.exchange.pair_block_list.clone(),
            events,
            market_data,
            handlers,
            tickers_needed,
            ticker_cache: Mutex::new(None),
            ticker_ttl: Duration::from_secs(DEFAULT_REFRESH_PERIOD),
        })
    }

    /// The most recently resolved allow list.
    pub async fn allow_list(&self) -> Vec<Pair> {
        self.allow_list.read().await.clone()
    }

    async fn cached_tickers(&self) -> Result<Arc<Tickers>> {
        let mut cache = self.ticker_cache.lock().await;
        if let Some((fetched_at, tickers)) = cache.as_ref() {
            if fetched_at.elapsed() < self.ticker_ttl {
                return Ok(Arc::clone(tickers));
            }
        }
        let tickers = self.market_data.get_tickers().await?;
        *cache = Some((Instant::now(), Arc::clone(&tickers)));
        Ok(tickers)
    }

    /// Run the pair list through all configured handlers.
    pub async fn refresh_pairlist(&self) -> Result<()> {
        info!("Refreshing pairlist...");

        let tickers = if self.tickers_needed {
            self.cached_tickers().await?
        } else {
            Arc::new(Tickers::new())
        };

        let (first, rest) = self
            .handlers
            .split_first()
            .context("No pair list handlers configured")?;

        let mut pairlist = first.gen_pairlist(&tickers).await?;
        for handler in rest {
            pairlist = handler.filter_pairlist(pairlist, &tickers).await?;
        }

        // Block list wins over whatever the handlers produced
        let markets = self.market_data.markets().await;
        pairlist = verify_block_list(pairlist, &self.block_list, &markets);

        info!("Loaded pair list: {pairlist:?}");
        *self.allow_list.write().await = pairlist.clone();
        self.events.emit_pairs(pairlist);
        Ok(())
    }
}

fn build_handler(
    handler_config: &PairListConfig,
    config: &Arc<Config>,
    market_data: &Arc<MarketData>,
) -> Result<Box<dyn PairListHandler>> {
    match handler_config {
        PairListConfig::StaticPairList(static_config) => {
            Ok(Box::new(static_list::StaticPairList::new(
                static_config.clone(),
                Arc::clone(config),
                Arc::clone(market_data),
            )))
        }
        PairListConfig::VolumePairList(volume_config) => {
            Ok(Box::new(volume::VolumePairList::new(
                volume_config.clone(),
                Arc::clone(config),
                Arc::clone(market_data),
            )?))
        }
    }
}
