//! Static pair list from configuration

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;

use crate::config::{Config, StaticPairListConfig};
use crate::exchange::MarketData;
use crate::pairlist::{
    allow_list_for_active_markets, verify_allow_list, PairListHandler, Tickers,
};
use crate::types::Pair;

/// Hands out the configured allow list, expanding wildcards against the
/// exchange markets. As a filter it appends its configured pairs to whatever
/// the preceding handlers produced.
pub struct StaticPairList {
    config: StaticPairListConfig,
    app_config: Arc<Config>,
    market_data: Arc<MarketData>,
}

impl StaticPairList {
    pub fn new(
        config: StaticPairListConfig,
        app_config: Arc<Config>,
        market_data: Arc<MarketData>,
    ) -> Self {
        StaticPairList {
            config,
            app_config,
            market_data,
        }
    }
}

#[async_trait]
impl PairListHandler for StaticPairList {
    fn name(&self) -> &'static str {
        "StaticPairList"
    }

    async fn gen_pairlist(&self, _tickers: &Tickers) -> Result<Vec<Pair>> {
        let markets = self.market_data.markets().await;
        let configured = &self.app_config.exchange.pair_allow_list;
        if self.config.allow_inactive {
            Ok(verify_allow_list(configured, &markets, true))
        } else {
            allow_list_for_active_markets(
                verify_allow_list(configured, &markets, false),
                &self.app_config.exchange.name,
                &markets,
            )
        }
    }

    async fn filter_pairlist(&self, pairlist: Vec<Pair>, _tickers: &Tickers) -> Result<Vec<Pair>> {
        let mut result = pairlist;
        for pair in &self.app_config.exchange.pair_allow_list {
            if !result.contains(pair) {
                result.push(pair.clone());
            }
        }
        Ok(result)
    }
}
