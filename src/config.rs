//! Configuration management
//!
//! Loads JSON configuration files with recursive multi-file merging, later
//! files overriding earlier ones key by key. API credentials can also come
//! from the environment so they stay out of committed config files.

use std::fmt;
use std::fs;
use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::timeframe::Timeframe;
use crate::types::Pair;

/// Log levels understood by the `logging` section and the CLI flags.
pub const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Default ticker/pairlist cache lifetime, in seconds
pub const DEFAULT_REFRESH_PERIOD: u64 = 1800;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub exchange: ExchangeConfig,
    /// Currency the bot trades against; pairs quoted in anything else are
    /// filtered out by the volume pair list.
    #[serde(default = "default_stake_currency")]
    pub stake_currency: String,
    pub pairlists: Vec<PairListConfig>,
    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_stake_currency() -> String {
    "USDT".to_string()
}

impl Config {
    /// Load configuration from a single JSON file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_files(&[path.as_ref().to_path_buf()])
    }

    /// Load configuration from multiple JSON files.
    ///
    /// Each subsequent file is merged into the previous ones: objects merge
    /// recursively, scalar and array values overwrite.
    pub fn from_files(paths: &[std::path::PathBuf]) -> Result<Self> {
        if paths.is_empty() {
            bail!("No configuration files provided");
        }
        let mut merged = Value::Null;
        for path in paths {
            let contents = fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file {}", path.display()))?;
            let value: Value = serde_json::from_str(&contents)
                .with_context(|| format!("Failed to parse config JSON {}", path.display()))?;
            if merged.is_null() {
                merged = value;
            } else {
                merge_json(&mut merged, value);
            }
        }
        Self::from_value(merged)
    }

    /// Build a configuration from an already merged JSON value
    pub fn from_value(value: Value) -> Result<Self> {
        let mut config: Config =
            serde_json::from_value(value).context("Invalid configuration")?;

        // Credentials from the environment take precedence over the files
        dotenv::dotenv().ok();
        if let Ok(key) = std::env::var("MCOOKBOOK_API_KEY") {
            config.exchange.key = Some(key);
        }
        if let Ok(secret) = std::env::var("MCOOKBOOK_API_SECRET") {
            config.exchange.secret = Some(secret);
        }

        config.validate()?;
        Ok(config)
    }

    fn validate(&mut self) -> Result<()> {
        if self.pairlists.is_empty() {
            bail!("At least one pair list handler must be configured");
        }
        for pairlist in &mut self.pairlists {
            pairlist.validate()?;
        }
        self.logging.validate()?;
        self.exchange.validate()?;
        Ok(())
    }

    /// Default configuration written by the `init` command
    pub fn default_config() -> Self {
        Config {
            exchange: ExchangeConfig {
                name: "binance".to_string(),
                market: MarketKind::Futures,
                key: None,
                secret: None,
                password: None,
                uid: None,
                base_url: None,
                pair_allow_list: vec![Pair::new("BTC/USDT")],
                pair_block_list: Vec::new(),
                required_candle_call_count: 1,
            },
            stake_currency: default_stake_currency(),
            pairlists: vec![PairListConfig::StaticPairList(StaticPairListConfig::default())],
            logging: LoggingConfig::default(),
        }
    }
}

/// Market segment an exchange connection targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MarketKind {
    #[default]
    #[serde(alias = "future")]
    Futures,
    Spot,
}

impl fmt::Display for MarketKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Futures => f.write_str("futures"),
            Self::Spot => f.write_str("spot"),
        }
    }
}

/// Exchange configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExchangeConfig {
    pub name: String,
    #[serde(default)]
    pub market: MarketKind,

    // Credentials are never serialized back out
    #[serde(default, skip_serializing)]
    pub key: Option<String>,
    #[serde(default, skip_serializing)]
    pub secret: Option<String>,
    #[serde(default, skip_serializing)]
    pub password: Option<String>,
    #[serde(default, skip_serializing)]
    pub uid: Option<String>,

    /// Override the REST endpoint, mainly for tests
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,

    #[serde(default)]
    pub pair_allow_list: Vec<Pair>,
    #[serde(default)]
    pub pair_block_list: Vec<Pair>,

    /// How many paged candle calls to make when no explicit start is given
    #[serde(default = "default_candle_call_count")]
    pub required_candle_call_count: u32,
}

fn default_candle_call_count() -> u32 {
    1
}

impl ExchangeConfig {
    fn validate(&mut self) -> Result<()> {
        self.name = self.name.to_lowercase();
        if !crate::exchange::is_supported(&self.name, self.market) {
            bail!(
                "The exchange '{}' ({}) is not supported. Supported: {}",
                self.name,
                self.market,
                crate::exchange::supported_exchanges().join(", ")
            );
        }
        if self.required_candle_call_count == 0 {
            bail!("'required_candle_call_count' must be at least 1");
        }
        Ok(())
    }

    pub fn has_credentials(&self) -> bool {
        self.key.is_some() && self.secret.is_some()
    }
}

/// Pair list handler configuration, tagged by handler name
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "name")]
pub enum PairListConfig {
    StaticPairList(StaticPairListConfig),
    VolumePairList(VolumePairListConfig),
}

impl PairListConfig {
    pub fn handler_name(&self) -> &'static str {
        match self {
            Self::StaticPairList(_) => "StaticPairList",
            Self::VolumePairList(_) => "VolumePairList",
        }
    }

    fn validate(&mut self) -> Result<()> {
        match self {
            Self::StaticPairList(_) => Ok(()),
            Self::VolumePairList(config) => config.validate(),
        }
    }
}

/// Static pair list configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StaticPairListConfig {
    /// Keep configured pairs even when they match no active market
    #[serde(default)]
    pub allow_inactive: bool,
}

/// Volume pair list configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VolumePairListConfig {
    /// Number of pairs to keep after ranking
    pub number_assets: usize,
    #[serde(default = "default_sort_key")]
    pub sort_key: String,
    /// Minimum quote volume a pair must have to stay listed
    #[serde(default)]
    pub min_value: f64,
    /// Seconds the generated pair list stays cached
    #[serde(default = "default_refresh_period")]
    pub refresh_period: u64,
    /// Shorthand for a daily range lookback of this many days
    #[serde(default)]
    pub lookback_days: u32,
    #[serde(default = "default_lookback_timeframe")]
    pub lookback_timeframe: Timeframe,
    /// Candles in the range lookback window; 0 disables range mode
    #[serde(default)]
    pub lookback_period: u32,
}

fn default_sort_key() -> String {
    "quoteVolume".to_string()
}

fn default_refresh_period() -> u64 {
    DEFAULT_REFRESH_PERIOD
}

fn default_lookback_timeframe() -> Timeframe {
    Timeframe::DAY_1
}

impl VolumePairListConfig {
    fn validate(&mut self) -> Result<()> {
        if self.sort_key != "quoteVolume" {
            bail!("'sort_key' needs to be set to 'quoteVolume'");
        }
        if self.number_assets == 0 {
            bail!("'number_assets' must be at least 1");
        }
        if self.min_value < 0.0 {
            bail!("'min_value' must not be negative");
        }
        if self.lookback_days > 0 && self.lookback_period > 0 {
            bail!(
                "Ambiguous configuration: lookback_days and lookback_period both set in \
                 pairlist config. Please set lookback_days only or lookback_period and \
                 lookback_timeframe and restart."
            );
        }
        // lookback_days is a shorthand for a daily range window
        if self.lookback_days > 0 {
            self.lookback_timeframe = Timeframe::DAY_1;
            self.lookback_period = self.lookback_days;
        }
        if self.use_range() && self.refresh_period < self.lookback_timeframe.as_secs() {
            bail!(
                "Refresh period of {} seconds is smaller than one timeframe of {}. \
                 Please adjust refresh_period to at least {} and restart.",
                self.refresh_period,
                self.lookback_timeframe,
                self.lookback_timeframe.as_secs()
            );
        }
        Ok(())
    }

    /// Whether quote volumes come from a candle lookback window instead of
    /// the 24h ticker value.
    pub fn use_range(&self) -> bool {
        self.lookback_period > 0
    }
}

/// Logging configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default)]
    pub cli: ConsoleLogConfig,
    #[serde(default)]
    pub file: FileLogConfig,
}

impl LoggingConfig {
    fn validate(&self) -> Result<()> {
        validate_log_level(&self.cli.level)?;
        validate_log_level(&self.file.level)?;
        Ok(())
    }
}

/// Console logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsoleLogConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for ConsoleLogConfig {
    fn default() -> Self {
        ConsoleLogConfig {
            level: default_log_level(),
        }
    }
}

/// Log file configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileLogConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<std::path::PathBuf>,
}

impl Default for FileLogConfig {
    fn default() -> Self {
        FileLogConfig {
            level: default_log_level(),
            path: None,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn validate_log_level(level: &str) -> Result<()> {
    if !LOG_LEVELS.contains(&level.to_lowercase().as_str()) {
        bail!(
            "The log level '{}' is not valid. Available levels: {}",
            level,
            LOG_LEVELS.join(", ")
        );
    }
    Ok(())
}

/// Recursively merge `source` into `target`.
///
/// Objects merge key by key; any other value in `source` replaces the
/// corresponding value in `target`.
pub fn merge_json(target: &mut Value, source: Value) {
    match (target, source) {
        (Value::Object(target_map), Value::Object(source_map)) => {
            for (key, value) in source_map {
                match target_map.get_mut(&key) {
                    Some(existing) => merge_json(existing, value),
                    None => {
                        target_map.insert(key, value);
                    }
                }
            }
        }
        (target, source) => *target = source,
    }
}

/// Obfuscate the values of sensitive keys anywhere in a JSON tree.
pub fn mask_secrets(value: &mut Value, keys: &[&str]) {
    if let Value::Object(map) = value {
        for (key, entry) in map.iter_mut() {
            if entry.is_object() {
                mask_secrets(entry, keys);
            } else if keys.contains(&key.as_str()) {
                *entry = Value::String("******".to_string());
            }
        }
    }
}
