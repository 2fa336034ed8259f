//! Learned-pattern detection behind an injected predictor.
//!
//! The engine never depends on model internals. A [`Predictor`] consumes
//! hand-built features and returns a direction with a confidence score; the
//! detector only gates on confidence and cooldown.

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use tracing::debug;

use engine_core::config::DetectorConfig;
use engine_core::types::{Instrument, MoveDirection, OrderBookSnapshot, Signal, SignalKind, Tick};

const MID_SAMPLE_CAP: usize = 30;
const REFERENCE_SAMPLE_CAP: usize = 100;

/// Feature vector handed to the predictor.
#[derive(Debug, Clone, PartialEq)]
pub struct PatternFeatures {
    /// Mid-price change across the instrument's recent book history.
    pub momentum: Decimal,
    /// Reference-feed price change across its recent history.
    pub reference_momentum: Decimal,
    /// Best ask minus best bid.
    pub spread_width: Decimal,
    /// `(bid_size − ask_size) / (bid_size + ask_size)`, zero when empty.
    pub book_imbalance: Decimal,
    pub time_to_expiry_secs: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Prediction {
    pub direction: MoveDirection,
    pub confidence: Decimal,
}

pub trait Predictor: Send + Sync {
    fn predict(&self, features: &PatternFeatures) -> Option<Prediction>;
}

struct InstrumentState {
    expiry_time: DateTime<Utc>,
    mids: VecDeque<Decimal>,
    cooldown_until: Option<DateTime<Utc>>,
}

pub struct PatternDetector {
    predictor: Box<dyn Predictor>,
    min_confidence: Decimal,
    cooldown: Duration,
    signal_ttl: Duration,
    reference: VecDeque<Decimal>,
    instruments: HashMap<String, InstrumentState>,
}

impl PatternDetector {
    pub fn new(predictor: Box<dyn Predictor>, config: &DetectorConfig) -> Self {
        Self {
            predictor,
            min_confidence: config.pattern_min_confidence,
            cooldown: Duration::seconds(config.pattern_cooldown_secs),
            signal_ttl: Duration::seconds(config.signal_ttl_secs),
            reference: VecDeque::with_capacity(REFERENCE_SAMPLE_CAP),
            instruments: HashMap::new(),
        }
    }

    pub fn register(&mut self, instrument: &Instrument) {
        self.instruments.insert(
            instrument.id.clone(),
            InstrumentState {
                expiry_time: instrument.expiry_time,
                mids: VecDeque::with_capacity(MID_SAMPLE_CAP),
                cooldown_until: None,
            },
        );
    }

    pub fn purge(&mut self, instrument_id: &str) {
        self.instruments.remove(instrument_id);
    }

    /// Reference ticks only feed the reference-momentum feature.
    pub fn on_tick(&mut self, tick: &Tick) {
        if self.reference.len() == REFERENCE_SAMPLE_CAP {
            self.reference.pop_front();
        }
        self.reference.push_back(tick.price);
    }

    pub fn on_book(&mut self, book: &OrderBookSnapshot, now: DateTime<Utc>) -> Option<Signal> {
        let state = self.instruments.get_mut(&book.instrument_id)?;
        let (bid, ask) = (book.best_bid?, book.best_ask?);
        let mid = (bid + ask) / Decimal::TWO;
        if state.mids.len() == MID_SAMPLE_CAP {
            state.mids.pop_front();
        }
        state.mids.push_back(mid);
        if state.mids.len() < 2 {
            return None;
        }

        let size_total = book.bid_size + book.ask_size;
        let features = PatternFeatures {
            momentum: mid - *state.mids.front()?,
            reference_momentum: match (self.reference.back(), self.reference.front()) {
                (Some(last), Some(first)) => *last - *first,
                _ => Decimal::ZERO,
            },
            spread_width: ask - bid,
            book_imbalance: if size_total.is_zero() {
                Decimal::ZERO
            } else {
                (book.bid_size - book.ask_size) / size_total
            },
            time_to_expiry_secs: (state.expiry_time - now).num_seconds().max(0),
        };

        let prediction = self.predictor.predict(&features)?;
        if prediction.confidence < self.min_confidence {
            return None;
        }
        if let Some(until) = state.cooldown_until {
            if now < until {
                return None;
            }
        }
        state.cooldown_until = Some(now + self.cooldown);

        debug!(
            instrument = %book.instrument_id,
            confidence = %prediction.confidence,
            "Pattern prediction"
        );
        let mut signal = Signal::new(
            SignalKind::Pattern,
            vec![book.instrument_id.clone()],
            prediction.confidence,
            now,
            self.signal_ttl,
        );
        signal.direction = Some(prediction.direction);
        signal.confidence = Some(prediction.confidence);
        Some(signal)
    }
}
