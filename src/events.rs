//! Internal event pub/sub
//!
//! Loosely couples the live service, the market data layer and the pair
//! list manager: components subscribe to the events they care about instead
//! of calling each other directly. Built on a tokio broadcast channel with
//! Arc'd payloads so emitting never blocks on slow subscribers.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::debug;

use crate::types::{Market, Pair, Ticker};

const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Application lifecycle and data availability events
#[derive(Debug, Clone)]
pub enum AppEvent {
    /// The service is starting
    Start,
    /// The service is shutting down
    Stop,
    /// Exchange markets have been loaded
    MarketsAvailable(Arc<HashMap<Pair, Market>>),
    /// Exchange tickers have been fetched
    TickersAvailable(Arc<HashMap<Pair, Ticker>>),
    /// The pair allow list has been resolved
    PairsAvailable(Arc<Vec<Pair>>),
}

impl AppEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Start => "Start",
            Self::Stop => "Stop",
            Self::MarketsAvailable(_) => "MarketsAvailable",
            Self::TickersAvailable(_) => "TickersAvailable",
            Self::PairsAvailable(_) => "PairsAvailable",
        }
    }
}

/// Application events support
#[derive(Debug, Clone)]
pub struct Events {
    tx: broadcast::Sender<AppEvent>,
}

impl Events {
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Events { tx }
    }

    /// Subscribe to all events emitted from this point on.
    pub fn subscribe(&self) -> broadcast::Receiver<AppEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to every current subscriber.
    ///
    /// An event with no subscribers is dropped silently; emitters must not
    /// care who, if anyone, is listening.
    pub fn emit(&self, event: AppEvent) {
        debug!("Emitting {} event", event.name());
        let _ = self.tx.send(event);
    }

    pub fn emit_markets(&self, markets: Arc<HashMap<Pair, Market>>) {
        self.emit(AppEvent::MarketsAvailable(markets));
    }

    pub fn emit_tickers(&self, tickers: Arc<HashMap<Pair, Ticker>>) {
        self.emit(AppEvent::TickersAvailable(tickers));
    }

    pub fn emit_pairs(&self, pairs: Vec<Pair>) {
        self.emit(AppEvent::PairsAvailable(Arc::new(pairs)));
    }
}

impl Default for Events {
    fn default() -> Self {
        Self::new()
    }
}
