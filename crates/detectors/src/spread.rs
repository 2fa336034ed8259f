//! Two-sided ask spread detection for maker entries.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use tracing::debug;

use engine_core::config::DetectorConfig;
use engine_core::types::{Instrument, OrderBookSnapshot, Signal, SignalKind};

struct SpreadState {
    yes_token: String,
    no_token: String,
    expiry_time: DateTime<Utc>,
    yes_ask: Option<Decimal>,
    no_ask: Option<Decimal>,
}

/// Watches both outcome books of a binary instrument and flags instruments
/// whose combined best asks leave room under the $1.00 payout.
pub struct SpreadDetector {
    min_spread: Decimal,
    min_time_remaining: Duration,
    signal_ttl: Duration,
    instruments: HashMap<String, SpreadState>,
}

impl SpreadDetector {
    pub fn new(config: &DetectorConfig) -> Self {
        Self {
            min_spread: config.min_spread_to_trade,
            min_time_remaining: Duration::seconds(config.min_time_remaining_secs),
            signal_ttl: Duration::seconds(config.signal_ttl_secs),
            instruments: HashMap::new(),
        }
    }

    pub fn register(&mut self, instrument: &Instrument) {
        let (Some(yes), Some(no)) = (instrument.yes_token(), instrument.no_token()) else {
            debug!(instrument = %instrument.id, "Not a binary instrument, skipping");
            return;
        };
        self.instruments.insert(
            instrument.id.clone(),
            SpreadState {
                yes_token: yes.token_id.clone(),
                no_token: no.token_id.clone(),
                expiry_time: instrument.expiry_time,
                yes_ask: None,
                no_ask: None,
            },
        );
    }

    pub fn purge(&mut self, instrument_id: &str) {
        self.instruments.remove(instrument_id);
    }

    pub fn on_book(&mut self, book: &OrderBookSnapshot, now: DateTime<Utc>) -> Option<Signal> {
        let state = self.instruments.get_mut(&book.instrument_id)?;
        if book.token_id == state.yes_token {
            state.yes_ask = book.best_ask;
        } else if book.token_id == state.no_token {
            state.no_ask = book.best_ask;
        } else {
            return None;
        }

        let (yes_ask, no_ask) = (state.yes_ask?, state.no_ask?);
        let spread = Decimal::ONE - (yes_ask + no_ask);
        if spread < self.min_spread {
            return None;
        }
        if state.expiry_time - now < self.min_time_remaining {
            return None;
        }

        debug!(
            instrument = %book.instrument_id,
            spread = %spread,
            "Spread opportunity"
        );
        let mut signal = Signal::new(
            SignalKind::Spread,
            vec![book.instrument_id.clone()],
            spread,
            now,
            self.signal_ttl,
        );
        signal.yes_ask = Some(yes_ask);
        signal.no_ask = Some(no_ask);
        Some(signal)
    }
}
