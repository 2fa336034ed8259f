//! Append-only position ledger.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

use engine_core::types::{Position, PositionState, PositionTransition, StrategyId};

/// Live and archived positions plus the full transition log.
///
/// Mutated only by the orchestrator; every state change is recorded as a
/// [`PositionTransition`] before the position is archived.
#[derive(Default)]
pub struct PositionLedger {
    live: HashMap<Uuid, Position>,
    archived: HashMap<Uuid, Position>,
    transitions: Vec<PositionTransition>,
}

impl PositionLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Admit a freshly created Pending position.
    pub fn insert(&mut self, position: Position, now: DateTime<Utc>) {
        self.transitions.push(PositionTransition {
            position_id: position.id,
            strategy_id: position.strategy_id,
            from: None,
            to: position.state,
            at: now,
            realized_pnl: None,
        });
        self.live.insert(position.id, position);
    }

    pub fn get(&self, id: Uuid) -> Option<&Position> {
        self.live.get(&id)
    }

    pub fn get_mut(&mut self, id: Uuid) -> Option<&mut Position> {
        self.live.get_mut(&id)
    }

    pub fn is_archived(&self, id: Uuid) -> bool {
        self.archived.contains_key(&id)
    }

    /// Log a transition that already happened on the position.
    pub fn record_transition(
        &mut self,
        id: Uuid,
        from: PositionState,
        now: DateTime<Utc>,
    ) {
        if let Some(position) = self.live.get(&id) {
            self.transitions.push(PositionTransition {
                position_id: id,
                strategy_id: position.strategy_id,
                from: Some(from),
                to: position.state,
                at: now,
                realized_pnl: position.realized_pnl,
            });
        }
    }

    /// Move a terminal position out of the live set.
    pub fn archive(&mut self, id: Uuid) -> Option<Position> {
        let position = self.live.get(&id)?;
        if !position.state.is_terminal() {
            return None;
        }
        let position = self.live.remove(&id)?;
        self.archived.insert(id, position.clone());
        Some(position)
    }

    pub fn open_count(&self) -> usize {
        self.live.len()
    }

    pub fn open_count_for(&self, strategy: StrategyId) -> usize {
        self.live
            .values()
            .filter(|p| p.strategy_id == strategy)
            .count()
    }

    pub fn by_strategy(&self, strategy: StrategyId) -> Vec<&Position> {
        self.live
            .values()
            .filter(|p| p.strategy_id == strategy)
            .collect()
    }

    pub fn by_instrument(&self, instrument_id: &str) -> Vec<&Position> {
        self.live
            .values()
            .filter(|p| p.instrument_id == instrument_id)
            .collect()
    }

    pub fn live_ids(&self) -> Vec<Uuid> {
        self.live.keys().copied().collect()
    }

    pub fn realized_pnl_since(&self, since: DateTime<Utc>) -> Decimal {
        self.transitions
            .iter()
            .filter(|t| t.at >= since)
            .filter_map(|t| t.realized_pnl)
            .sum()
    }

    pub fn transitions(&self) -> &[PositionTransition] {
        &self.transitions
    }
}
