//! Shared capital pool with per-strategy reservations.

use std::collections::HashMap;

use rust_decimal::Decimal;
use tracing::debug;

use engine_core::types::StrategyId;
use engine_core::{Error, Result};

/// Tracks capital reserved by live positions against a fixed pool.
///
/// Invariant: the sum of reservations never exceeds `total`, and no
/// strategy's reservation exceeds its allocation fraction of the pool.
/// Exhaustion is an expected outcome; releasing more than is reserved is a
/// ledger corruption and fails loudly.
pub struct CapitalLedger {
    total: Decimal,
    allocations: HashMap<StrategyId, Decimal>,
    reserved: HashMap<StrategyId, Decimal>,
}

impl CapitalLedger {
    /// Fails when the fractions could let reservations outgrow the pool.
    pub fn new(total: Decimal, allocations: HashMap<StrategyId, Decimal>) -> Result<Self> {
        if let Some((strategy, fraction)) =
            allocations.iter().find(|(_, f)| **f < Decimal::ZERO)
        {
            return Err(Error::Ledger(format!(
                "negative allocation fraction {} for {}",
                fraction, strategy
            )));
        }
        let sum: Decimal = allocations.values().copied().sum();
        if sum > Decimal::ONE {
            return Err(Error::Ledger(format!(
                "allocation fractions sum to {} (> 1.0)",
                sum
            )));
        }
        Ok(Self {
            total,
            allocations,
            reserved: HashMap::new(),
        })
    }

    /// Capital ceiling for one strategy: `total × allocation fraction`.
    pub fn limit(&self, strategy: StrategyId) -> Decimal {
        self.allocations
            .get(&strategy)
            .map(|fraction| self.total * fraction)
            .unwrap_or(Decimal::ZERO)
    }

    pub fn reserved(&self, strategy: StrategyId) -> Decimal {
        self.reserved.get(&strategy).copied().unwrap_or(Decimal::ZERO)
    }

    pub fn total_reserved(&self) -> Decimal {
        self.reserved.values().copied().sum()
    }

    pub fn headroom(&self, strategy: StrategyId) -> Decimal {
        self.limit(strategy) - self.reserved(strategy)
    }

    /// Reserve `amount` for a strategy. Returns false when the allocation
    /// has no headroom; the caller rejects the entry without retry.
    pub fn try_reserve(&mut self, strategy: StrategyId, amount: Decimal) -> bool {
        if amount <= Decimal::ZERO {
            return false;
        }
        if amount > self.headroom(strategy) {
            debug!(
                strategy = %strategy,
                requested = %amount,
                headroom = %self.headroom(strategy),
                "Capital exhausted"
            );
            return false;
        }
        *self.reserved.entry(strategy).or_insert(Decimal::ZERO) += amount;
        true
    }

    /// Release a reservation when its position settles.
    pub fn release(&mut self, strategy: StrategyId, amount: Decimal) -> Result<()> {
        let reserved = self.reserved.entry(strategy).or_insert(Decimal::ZERO);
        if amount > *reserved {
            return Err(Error::Ledger(format!(
                "release of {} exceeds {} reserved for {}",
                amount, reserved, strategy
            )));
        }
        *reserved -= amount;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ledger() -> CapitalLedger {
        let mut allocations = HashMap::new();
        allocations.insert(StrategyId::Maker, Decimal::new(4, 1));
        allocations.insert(StrategyId::SpikeArb, Decimal::new(3, 1));
        CapitalLedger::new(Decimal::new(1000, 0), allocations).unwrap()
    }

    #[test]
    fn reservations_respect_allocation_ceilings() {
        let mut ledger = ledger();
        // Maker gets 40% of 1000.
        assert_eq!(ledger.limit(StrategyId::Maker), Decimal::new(400, 0));
        assert!(ledger.try_reserve(StrategyId::Maker, Decimal::new(350, 0)));
        assert!(!ledger.try_reserve(StrategyId::Maker, Decimal::new(100, 0)));
        assert!(ledger.try_reserve(StrategyId::Maker, Decimal::new(50, 0)));
        assert_eq!(ledger.headroom(StrategyId::Maker), Decimal::ZERO);
    }

    #[test]
    fn total_reserved_never_exceeds_pool() {
        let mut ledger = ledger();
        assert!(ledger.try_reserve(StrategyId::Maker, Decimal::new(400, 0)));
        assert!(ledger.try_reserve(StrategyId::SpikeArb, Decimal::new(300, 0)));
        assert!(ledger.total_reserved() <= Decimal::new(1000, 0));

        ledger.release(StrategyId::Maker, Decimal::new(400, 0)).unwrap();
        assert!(ledger.try_reserve(StrategyId::Maker, Decimal::new(200, 0)));
        assert!(ledger.total_reserved() <= Decimal::new(1000, 0));
    }

    #[test]
    fn unallocated_strategy_has_no_headroom() {
        let mut ledger = ledger();
        assert!(!ledger.try_reserve(StrategyId::Pattern, Decimal::ONE));
    }

    #[test]
    fn over_release_is_a_ledger_error() {
        let mut ledger = ledger();
        assert!(ledger.try_reserve(StrategyId::Maker, Decimal::new(100, 0)));
        assert!(ledger.release(StrategyId::Maker, Decimal::new(150, 0)).is_err());
        // The failed release must not mutate the ledger.
        assert_eq!(ledger.reserved(StrategyId::Maker), Decimal::new(100, 0));
    }

    #[test]
    fn overcommitted_or_negative_fractions_are_rejected_at_construction() {
        let mut allocations = HashMap::new();
        allocations.insert(StrategyId::Maker, Decimal::new(7, 1));
        allocations.insert(StrategyId::SpikeArb, Decimal::new(6, 1));
        assert!(CapitalLedger::new(Decimal::new(1000, 0), allocations).is_err());

        let mut allocations = HashMap::new();
        allocations.insert(StrategyId::Maker, Decimal::new(-1, 1));
        assert!(CapitalLedger::new(Decimal::new(1000, 0), allocations).is_err());
    }

    #[test]
    fn zero_or_negative_reservations_are_rejected() {
        let mut ledger = ledger();
        assert!(!ledger.try_reserve(StrategyId::Maker, Decimal::ZERO));
        assert!(!ledger.try_reserve(StrategyId::Maker, Decimal::new(-5, 0)));
    }
}
