//! Engine event definitions.
//!
//! All feed connections and the market catalog publish [`MarketEvent`]s into
//! one bounded mpsc channel whose single consumer drives the detectors and
//! the orchestrator, so ledger mutation is single-writer by construction.
//!
//! [`EngineEvent`]s go the other way: structured observability notifications
//! published on a broadcast channel for external sinks. Emission never blocks
//! and never fails the core path.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::types::{
    Instrument, OrderBookSnapshot, OrderResult, SignalKind, StrategyId, Tick,
};

/// Inbound event on the shared engine stream.
#[derive(Debug, Clone)]
pub enum MarketEvent {
    Tick(Tick),
    Book(OrderBookSnapshot),
    InstrumentActivated(Instrument),
    InstrumentRetired(String),
    OrderUpdate {
        position_id: Uuid,
        result: OrderResult,
    },
}

/// Why a position was closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitReason {
    ProfitTarget,
    StopLoss,
    MaxHoldElapsed,
    InstrumentRetired,
    EntryTimeout,
    EntryRejected,
}

/// Structured observability event for external sinks.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "event")]
pub enum EngineEvent {
    SignalDetected {
        kind: SignalKind,
        instrument_id: String,
        magnitude: Decimal,
        at: DateTime<Utc>,
    },
    OrderSubmitted {
        position_id: Uuid,
        strategy_id: StrategyId,
        instrument_id: String,
        notional: Decimal,
    },
    PositionClosed {
        position_id: Uuid,
        strategy_id: StrategyId,
        reason: ExitReason,
        realized_pnl: Decimal,
    },
    BreakerTransition {
        connection: String,
        from: String,
        to: String,
    },
    StrategySuspended {
        strategy_id: StrategyId,
        reason: String,
    },
    TradingHalted {
        reason: String,
    },
}

/// Handle for publishing observability events.
///
/// Core behavior never depends on sink availability: `emit` drops the event
/// when there are no subscribers or the channel lags.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: broadcast::Sender<EngineEvent>,
}

impl EventSink {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.tx.subscribe()
    }

    /// Publish an event, ignoring delivery failure.
    pub fn emit(&self, event: EngineEvent) {
        let _ = self.tx.send(event);
    }
}

impl Default for EventSink {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_emit_without_subscribers_is_noop() {
        let sink = EventSink::new(8);
        // No receivers registered; must not panic or error.
        sink.emit(EngineEvent::TradingHalted {
            reason: "test".to_string(),
        });
    }

    #[tokio::test]
    async fn test_subscriber_receives_events() {
        let sink = EventSink::new(8);
        let mut rx = sink.subscribe();
        sink.emit(EngineEvent::BreakerTransition {
            connection: "venue-ws".to_string(),
            from: "closed".to_string(),
            to: "open".to_string(),
        });
        match rx.recv().await.unwrap() {
            EngineEvent::BreakerTransition { connection, to, .. } => {
                assert_eq!(connection, "venue-ws");
                assert_eq!(to, "open");
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }
}
