//! Trading signals and strategy identity.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The opportunity class a signal describes. Each kind is produced by exactly
/// one detector and consumed by exactly one strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalKind {
    /// Two-sided ask spread below full payout (maker entry).
    Spread,
    /// Rapid reference-feed move the venue has not yet priced.
    Spike,
    /// Sum of mutually exclusive outcome asks below fee-adjusted payout.
    Sum,
    /// Learned-pattern prediction above confidence threshold.
    Pattern,
}

/// Direction of a reference-feed move.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MoveDirection {
    Up,
    Down,
}

/// Ephemeral notification of a tradable opportunity.
///
/// Produced by one detector, handed off to the orchestrator (single
/// consumer), and discarded without retry once `expiry` has passed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    pub id: Uuid,
    pub kind: SignalKind,
    /// Instruments the opportunity references. For spikes this is the
    /// reference instrument; for spread/sum signals the venue instrument.
    pub instruments: Vec<String>,
    pub detected_at: DateTime<Utc>,
    pub expiry: DateTime<Utc>,
    /// Kind-specific edge measure: spread width, absolute move size,
    /// payout-ceiling gap, or prediction confidence.
    pub magnitude: Decimal,
    pub direction: Option<MoveDirection>,
    /// Best asks observed at detection time, used to price entries.
    pub yes_ask: Option<Decimal>,
    pub no_ask: Option<Decimal>,
    pub confidence: Option<Decimal>,
}

impl Signal {
    pub fn new(
        kind: SignalKind,
        instruments: Vec<String>,
        magnitude: Decimal,
        detected_at: DateTime<Utc>,
        ttl: chrono::Duration,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            instruments,
            detected_at,
            expiry: detected_at + ttl,
            magnitude,
            direction: None,
            yes_ask: None,
            no_ask: None,
            confidence: None,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expiry
    }

    pub fn primary_instrument(&self) -> Option<&str> {
        self.instruments.first().map(String::as_str)
    }
}

/// Closed set of strategy identities. Dispatch is always by signal kind,
/// never by runtime type inspection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyId {
    Maker,
    SpikeArb,
    SumArb,
    Pattern,
}

impl StrategyId {
    /// Priority class for signal arbitration: latency-sensitive strategies
    /// run before passive ones. Lower is sooner.
    pub fn priority_class(&self) -> u8 {
        match self {
            StrategyId::SpikeArb => 0,
            StrategyId::SumArb => 1,
            StrategyId::Maker => 2,
            StrategyId::Pattern => 3,
        }
    }

    pub fn all() -> [StrategyId; 4] {
        [
            StrategyId::Maker,
            StrategyId::SpikeArb,
            StrategyId::SumArb,
            StrategyId::Pattern,
        ]
    }
}

impl std::fmt::Display for StrategyId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            StrategyId::Maker => "maker",
            StrategyId::SpikeArb => "spike_arb",
            StrategyId::SumArb => "sum_arb",
            StrategyId::Pattern => "pattern",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signal_expiry() {
        let now = Utc::now();
        let signal = Signal::new(
            SignalKind::Spread,
            vec!["mkt1".to_string()],
            Decimal::new(6, 2),
            now,
            chrono::Duration::seconds(5),
        );
        assert!(!signal.is_expired(now));
        assert!(signal.is_expired(now + chrono::Duration::seconds(5)));
    }

    #[test]
    fn test_priority_classes_latency_first() {
        assert!(StrategyId::SpikeArb.priority_class() < StrategyId::SumArb.priority_class());
        assert!(StrategyId::SumArb.priority_class() < StrategyId::Maker.priority_class());
        assert!(StrategyId::Maker.priority_class() < StrategyId::Pattern.priority_class());
    }
}
