//! Outcome-sum mispricing detection.
//!
//! Buying every outcome of a mutually exclusive binary market locks in the
//! $1.00 payout. When the asks sum below the fee-adjusted payout ceiling,
//! the gap is risk-free edge.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tracing::info;

use engine_core::config::DetectorConfig;
use engine_core::types::{Instrument, OrderBookSnapshot, Signal, SignalKind};

struct SumState {
    yes_token: String,
    no_token: String,
    yes_ask: Option<Decimal>,
    no_ask: Option<Decimal>,
}

pub struct SumDetector {
    /// `1.0 − fee_buffer`; sums at or above this leave no edge after fees.
    payout_ceiling: Decimal,
    min_profit: Decimal,
    signal_ttl: chrono::Duration,
    instruments: HashMap<String, SumState>,
}

impl SumDetector {
    pub fn new(config: &DetectorConfig) -> Self {
        Self {
            payout_ceiling: Decimal::ONE - config.sum_fee_buffer,
            min_profit: config.sum_min_profit,
            signal_ttl: chrono::Duration::seconds(config.signal_ttl_secs),
            instruments: HashMap::new(),
        }
    }

    pub fn register(&mut self, instrument: &Instrument) {
        let (Some(yes), Some(no)) = (instrument.yes_token(), instrument.no_token()) else {
            return;
        };
        self.instruments.insert(
            instrument.id.clone(),
            SumState {
                yes_token: yes.token_id.clone(),
                no_token: no.token_id.clone(),
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
        let sum = yes_ask + no_ask;
        let edge = self.payout_ceiling - sum;
        if edge < self.min_profit {
            return None;
        }

        info!(
            instrument = %book.instrument_id,
            sum = %sum,
            edge = %edge,
            "Sum mispricing"
        );
        let mut signal = Signal::new(
            SignalKind::Sum,
            vec![book.instrument_id.clone()],
            edge,
            now,
            self.signal_ttl,
        );
        signal.yes_ask = Some(yes_ask);
        signal.no_ask = Some(no_ask);
        Some(signal)
    }
}
