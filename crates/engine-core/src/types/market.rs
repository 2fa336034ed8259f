//! Market data types: instruments, ticks, and order book snapshots.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A single normalized price update from one feed connection.
///
/// Ticks are immutable and ordered within one connection (`sequence` is
/// monotonic per connection), but carry no global order across connections.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tick {
    pub instrument_id: String,
    pub price: Decimal,
    pub timestamp: DateTime<Utc>,
    /// Per-connection monotonic sequence number.
    pub sequence: u64,
}

/// Top-of-book snapshot for one outcome token, replaced wholesale per update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderBookSnapshot {
    pub instrument_id: String,
    /// Outcome token this book belongs to (binary markets quote per token).
    pub token_id: String,
    /// Absent when the side of the book is empty.
    pub best_bid: Option<Decimal>,
    pub best_ask: Option<Decimal>,
    pub bid_size: Decimal,
    pub ask_size: Decimal,
    pub timestamp: DateTime<Utc>,
}

/// One tradable outcome of an instrument.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutcomeToken {
    pub token_id: String,
    pub name: String,
}

/// A tradable instrument discovered from the venue.
///
/// Lifecycle: created on discovery, ACTIVE while it matches the catalog's
/// selection criteria, RETIRED at expiry or removal. Retirement purges all
/// detector and strategy state for the instrument.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Instrument {
    pub id: String,
    pub question: String,
    pub category: String,
    pub expiry_time: DateTime<Utc>,
    pub outcomes: Vec<OutcomeToken>,
}

impl Instrument {
    /// Seconds until expiry, clamped at zero.
    pub fn time_to_expiry_secs(&self, now: DateTime<Utc>) -> i64 {
        (self.expiry_time - now).num_seconds().max(0)
    }

    /// Resolve the YES outcome token, falling back to declaration order.
    pub fn yes_token(&self) -> Option<&OutcomeToken> {
        self.outcomes
            .iter()
            .find(|t| {
                let name = t.name.to_lowercase();
                name.contains("yes") || name.contains("up") || name.contains("higher")
            })
            .or_else(|| self.outcomes.first())
    }

    /// Resolve the NO outcome token, falling back to declaration order.
    pub fn no_token(&self) -> Option<&OutcomeToken> {
        self.outcomes
            .iter()
            .find(|t| {
                let name = t.name.to_lowercase();
                name.contains("no") || name.contains("down") || name.contains("lower")
            })
            .or_else(|| self.outcomes.get(1))
    }

    /// Binary instruments have exactly two mutually exclusive outcomes.
    pub fn is_binary(&self) -> bool {
        self.outcomes.len() == 2
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn instrument(names: &[&str]) -> Instrument {
        Instrument {
            id: "mkt1".to_string(),
            question: "BTC above 65k at 15:00?".to_string(),
            category: "crypto-btc".to_string(),
            expiry_time: Utc::now() + chrono::Duration::minutes(5),
            outcomes: names
                .iter()
                .enumerate()
                .map(|(i, n)| OutcomeToken {
                    token_id: format!("tok{}", i),
                    name: n.to_string(),
                })
                .collect(),
        }
    }

    #[test]
    fn test_token_resolution_by_name() {
        let inst = instrument(&["No", "Yes"]);
        assert_eq!(inst.yes_token().unwrap().token_id, "tok1");
        assert_eq!(inst.no_token().unwrap().token_id, "tok0");
    }

    #[test]
    fn test_token_resolution_fallback_order() {
        let inst = instrument(&["Above", "Below"]);
        // Neither name matches; fall back to declaration order.
        assert_eq!(inst.yes_token().unwrap().token_id, "tok0");
        assert_eq!(inst.no_token().unwrap().token_id, "tok1");
    }

    #[test]
    fn test_time_to_expiry_clamped() {
        let mut inst = instrument(&["Yes", "No"]);
        inst.expiry_time = Utc::now() - chrono::Duration::minutes(1);
        assert_eq!(inst.time_to_expiry_secs(Utc::now()), 0);
    }
}
