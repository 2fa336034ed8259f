//! Order intent and execution result types.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Buy,
    Sell,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeInForce {
    /// Fill-or-kill, for taker entries that must not rest.
    Fok,
    /// Good-til-cancelled, for maker orders resting inside the spread.
    Gtc,
}

/// An order the orchestrator intends to place. Immutable once submitted;
/// resubmission creates a new intent with a fresh id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderIntent {
    pub id: Uuid,
    pub position_id: Uuid,
    pub instrument_id: String,
    pub token_id: String,
    pub side: Side,
    pub price: Decimal,
    pub size: Decimal,
    pub time_in_force: TimeInForce,
    /// Past this instant the intent is abandoned and its reservation released.
    pub deadline: DateTime<Utc>,
}

impl OrderIntent {
    /// Capital this intent commits if fully filled.
    pub fn notional(&self) -> Decimal {
        self.price * self.size
    }
}

/// Outcome of submitting an intent to the execution gateway.
///
/// The gateway has at-least-once semantics, so the same terminal result may
/// be delivered more than once; consumers must treat duplicates as no-ops.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum OrderResult {
    Accepted,
    Rejected { reason: String },
    Filled { price: Decimal, size: Decimal },
    Timeout,
}

impl OrderResult {
    /// Terminal results settle the intent one way or the other.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, OrderResult::Accepted)
    }

    pub fn is_fill(&self) -> bool {
        matches!(self, OrderResult::Filled { .. })
    }
}
