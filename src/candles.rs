//! Candle series cleaning and aggregation
//!
//! Normalizes raw OHLCV data as returned by exchange APIs: sorts by open
//! time, collapses duplicate ticks, drops the trailing incomplete candle and
//! fills gaps with zero-volume placeholder candles.

use chrono::Duration;
use tracing::{debug, info};

use crate::timeframe::Timeframe;
use crate::types::{Candle, Pair};

/// Clean a raw candle series for one pair.
///
/// Duplicate open times are aggregated (first open, max high, min low, last
/// close, max volume). With `drop_incomplete` the newest candle is removed,
/// assuming the exchange returned a partial one.
pub fn clean_candles(
    mut candles: Vec<Candle>,
    timeframe: Timeframe,
    pair: &Pair,
    drop_incomplete: bool,
    fill_missing: bool,
) -> Vec<Candle> {
    debug!("Cleaning {} candles for pair {pair}", candles.len());
    candles.sort_by_key(|c| c.open_time);

    let mut cleaned: Vec<Candle> = Vec::with_capacity(candles.len());
    for candle in candles {
        match cleaned.last_mut() {
            Some(last) if last.open_time == candle.open_time => {
                last.high = last.high.max(candle.high);
                last.low = last.low.min(candle.low);
                last.close = candle.close;
                last.volume = last.volume.max(candle.volume);
            }
            _ => cleaned.push(candle),
        }
    }

    if drop_incomplete {
        cleaned.pop();
        debug!("Dropping last candle");
    }

    if fill_missing {
        fill_up_missing(cleaned, timeframe, pair)
    } else {
        cleaned
    }
}

/// Fill holes in the series with flat zero-volume candles.
///
/// Missing candles take the previous close as open/high/low/close, so
/// downstream rolling computations see a contiguous series.
fn fill_up_missing(candles: Vec<Candle>, timeframe: Timeframe, pair: &Pair) -> Vec<Candle> {
    let step = Duration::milliseconds(timeframe.as_millis());
    let len_before = candles.len();

    let mut filled: Vec<Candle> = Vec::with_capacity(candles.len());
    for candle in candles {
        if let Some(last) = filled.last() {
            let mut expected = last.open_time + step;
            let price = last.close;
            while expected < candle.open_time {
                filled.push(Candle::new_unchecked(expected, price, price, price, price, 0.0));
                expected += step;
            }
        }
        filled.push(candle);
    }

    let len_after = filled.len();
    if len_before != len_after && len_before > 0 {
        let pct_missing = (len_after - len_before) as f64 / len_before as f64;
        let message = format!(
            "Missing data fill-up for {pair}: before: {len_before} - after: {len_after} - {:.2}%",
            pct_missing * 100.0
        );
        if pct_missing > 0.01 {
            info!("{message}");
        } else {
            debug!("{message}");
        }
    }
    filled
}

/// Quote volume summed over the trailing `lookback` candles.
///
/// Each candle contributes `volume * typical_price`, the approximation used
/// when the exchange ticker does not report a quote volume for the window.
pub fn rolling_quote_volume(candles: &[Candle], lookback: usize) -> f64 {
    if lookback == 0 || candles.is_empty() {
        return 0.0;
    }
    candles
        .iter()
        .rev()
        .take(lookback)
        .map(|c| c.volume * c.typical_price())
        .sum()
}
