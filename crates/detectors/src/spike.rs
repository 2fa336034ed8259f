//! Reference-feed spike detection.
//!
//! A spike is a fast move on the reference feed (e.g. spot BTC) that the
//! venue's short-horizon markets have not priced yet. The window is trailing:
//! the current tick is compared against the most recent prior sample aged
//! between `window_min` and `window_max`.

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use tracing::info;

use engine_core::config::DetectorConfig;
use engine_core::types::{MoveDirection, Signal, SignalKind, Tick};

const SAMPLE_CAP: usize = 100;

struct SpikeState {
    samples: VecDeque<(DateTime<Utc>, Decimal)>,
    cooldown_until: Option<DateTime<Utc>>,
}

impl SpikeState {
    fn new() -> Self {
        Self {
            samples: VecDeque::with_capacity(SAMPLE_CAP),
            cooldown_until: None,
        }
    }
}

pub struct SpikeDetector {
    min_move: Decimal,
    window_min: Duration,
    window_max: Duration,
    cooldown: Duration,
    signal_ttl: Duration,
    instruments: HashMap<String, SpikeState>,
}

impl SpikeDetector {
    pub fn new(config: &DetectorConfig) -> Self {
        Self {
            min_move: config.spike_min_move,
            window_min: Duration::seconds(config.spike_window_min_secs),
            window_max: Duration::seconds(config.spike_window_max_secs),
            cooldown: Duration::seconds(config.spike_cooldown_secs),
            signal_ttl: Duration::seconds(config.signal_ttl_secs),
            instruments: HashMap::new(),
        }
    }

    pub fn purge(&mut self, instrument_id: &str) {
        self.instruments.remove(instrument_id);
    }

    pub fn on_tick(&mut self, tick: &Tick, now: DateTime<Utc>) -> Option<Signal> {
        let state = self
            .instruments
            .entry(tick.instrument_id.clone())
            .or_insert_with(SpikeState::new);

        // Most recent prior sample whose age falls inside the window.
        let reference = state
            .samples
            .iter()
            .rev()
            .find(|(ts, _)| {
                let age = tick.timestamp - *ts;
                age >= self.window_min && age <= self.window_max
            })
            .map(|(_, price)| *price);

        if state.samples.len() == SAMPLE_CAP {
            state.samples.pop_front();
        }
        state.samples.push_back((tick.timestamp, tick.price));

        let reference = reference?;
        let delta = tick.price - reference;
        if delta.abs() < self.min_move {
            return None;
        }
        if let Some(until) = state.cooldown_until {
            if now < until {
                return None;
            }
        }
        state.cooldown_until = Some(now + self.cooldown);

        let direction = if delta > Decimal::ZERO {
            MoveDirection::Up
        } else {
            MoveDirection::Down
        };
        info!(
            instrument = %tick.instrument_id,
            delta = %delta,
            from = %reference,
            to = %tick.price,
            "Reference price spike"
        );
        let mut signal = Signal::new(
            SignalKind::Spike,
            vec![tick.instrument_id.clone()],
            delta.abs(),
            now,
            self.signal_ttl,
        );
        signal.direction = Some(direction);
        Some(signal)
    }
}
