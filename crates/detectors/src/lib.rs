//! Opportunity Detectors
//!
//! Each detector watches the market event stream for one opportunity class
//! and emits [`Signal`]s. Detectors keep only private per-instrument state
//! and never touch capital or position ledgers; the orchestrator decides
//! what, if anything, to do with a signal.

pub mod pattern;
pub mod spike;
pub mod spread;
pub mod sum;

pub use pattern::{PatternDetector, PatternFeatures, Prediction, Predictor};
pub use spike::SpikeDetector;
pub use spread::SpreadDetector;
pub use sum::SumDetector;

use chrono::{DateTime, Utc};
use tracing::debug;

use engine_core::config::DetectorConfig;
use engine_core::types::{Instrument, OrderBookSnapshot, Signal, Tick};

/// All detectors behind one dispatch surface, fed by the engine loop.
pub struct DetectorSet {
    spread: SpreadDetector,
    spike: SpikeDetector,
    sum: SumDetector,
    pattern: Option<PatternDetector>,
}

impl DetectorSet {
    pub fn new(config: &DetectorConfig) -> Self {
        Self {
            spread: SpreadDetector::new(config),
            spike: SpikeDetector::new(config),
            sum: SumDetector::new(config),
            pattern: None,
        }
    }

    /// Attach a learned-pattern predictor. Without one, no `Pattern` signals
    /// are ever produced.
    pub fn with_predictor(mut self, predictor: Box<dyn Predictor>, config: &DetectorConfig) -> Self {
        self.pattern = Some(PatternDetector::new(predictor, config));
        self
    }

    pub fn on_instrument_activated(&mut self, instrument: &Instrument) {
        self.spread.register(instrument);
        self.sum.register(instrument);
        if let Some(pattern) = &mut self.pattern {
            pattern.register(instrument);
        }
    }

    /// Drop all per-instrument state. Called on retirement so no signal can
    /// reference a retired instrument.
    pub fn purge_instrument(&mut self, instrument_id: &str) {
        self.spread.purge(instrument_id);
        self.spike.purge(instrument_id);
        self.sum.purge(instrument_id);
        if let Some(pattern) = &mut self.pattern {
            pattern.purge(instrument_id);
        }
        debug!(instrument = %instrument_id, "Detector state purged");
    }

    pub fn on_tick(&mut self, tick: &Tick, now: DateTime<Utc>) -> Vec<Signal> {
        let mut signals = Vec::new();
        if let Some(signal) = self.spike.on_tick(tick, now) {
            signals.push(signal);
        }
        if let Some(pattern) = &mut self.pattern {
            pattern.on_tick(tick);
        }
        signals
    }

    pub fn on_book(&mut self, book: &OrderBookSnapshot, now: DateTime<Utc>) -> Vec<Signal> {
        let mut signals = Vec::new();
        if let Some(signal) = self.spread.on_book(book, now) {
            signals.push(signal);
        }
        if let Some(signal) = self.sum.on_book(book, now) {
            signals.push(signal);
        }
        if let Some(pattern) = &mut self.pattern {
            if let Some(signal) = pattern.on_book(book, now) {
                signals.push(signal);
            }
        }
        signals
    }
}
