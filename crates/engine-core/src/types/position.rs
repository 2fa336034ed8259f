//! Position lifecycle types.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::order::Side;
use super::signal::StrategyId;

/// Current state of a position in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PositionState {
    /// Intent submitted, awaiting fill confirmation.
    Pending,
    /// Filled and actively monitored.
    Open,
    /// Exit initiated, awaiting confirmation.
    Closing,
    /// Fully closed with realized P&L.
    Closed,
    /// Entry rejected or timed out; never held.
    Failed,
}

impl PositionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, PositionState::Closed | PositionState::Failed)
    }
}

/// One leg of capital committed by a strategy.
///
/// Created when the orchestrator accepts an OrderIntent, mutated only by the
/// orchestrator through the validated `mark_*` transitions below, and
/// archived once terminal. Illegal transitions are programming errors and
/// fail loudly rather than silently corrupting the ledger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub id: Uuid,
    pub strategy_id: StrategyId,
    pub instrument_id: String,
    pub token_id: String,
    pub side: Side,
    pub size: Decimal,
    pub entry_price: Decimal,
    pub opened_at: DateTime<Utc>,
    pub state: PositionState,
    /// Capital reserved against this leg while it is live.
    pub reserved: Decimal,
    pub exit_price: Option<Decimal>,
    pub realized_pnl: Option<Decimal>,
    pub closed_at: Option<DateTime<Utc>>,
}

impl Position {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        strategy_id: StrategyId,
        instrument_id: String,
        token_id: String,
        side: Side,
        size: Decimal,
        entry_price: Decimal,
        opened_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            strategy_id,
            instrument_id,
            token_id,
            side,
            size,
            entry_price,
            opened_at,
            state: PositionState::Pending,
            reserved: entry_price * size,
            exit_price: None,
            realized_pnl: None,
            closed_at: None,
        }
    }

    /// Mark the position open on fill confirmation. Only valid from Pending.
    pub fn mark_open(&mut self, fill_price: Decimal) -> Result<(), String> {
        if self.state != PositionState::Pending {
            return Err(format!(
                "cannot transition to Open from {:?} (expected Pending)",
                self.state
            ));
        }
        self.entry_price = fill_price;
        self.state = PositionState::Open;
        Ok(())
    }

    /// Mark an exit in flight. Only valid from Open.
    pub fn mark_closing(&mut self) -> Result<(), String> {
        if self.state != PositionState::Open {
            return Err(format!(
                "cannot transition to Closing from {:?} (expected Open)",
                self.state
            ));
        }
        self.state = PositionState::Closing;
        Ok(())
    }

    /// Close with an exit fill, realizing P&L. Valid from Open or Closing.
    pub fn mark_closed(
        &mut self,
        exit_price: Decimal,
        closed_at: DateTime<Utc>,
    ) -> Result<Decimal, String> {
        if !matches!(self.state, PositionState::Open | PositionState::Closing) {
            return Err(format!(
                "cannot transition to Closed from {:?} (expected Open or Closing)",
                self.state
            ));
        }
        let pnl = match self.side {
            Side::Buy => (exit_price - self.entry_price) * self.size,
            Side::Sell => (self.entry_price - exit_price) * self.size,
        };
        self.exit_price = Some(exit_price);
        self.realized_pnl = Some(pnl);
        self.closed_at = Some(closed_at);
        self.state = PositionState::Closed;
        Ok(pnl)
    }

    /// Mark the entry failed (rejected or timed out). Only valid from Pending.
    pub fn mark_failed(&mut self, closed_at: DateTime<Utc>) -> Result<(), String> {
        if self.state != PositionState::Pending {
            return Err(format!(
                "cannot transition to Failed from {:?} (expected Pending)",
                self.state
            ));
        }
        self.realized_pnl = Some(Decimal::ZERO);
        self.closed_at = Some(closed_at);
        self.state = PositionState::Failed;
        Ok(())
    }

    pub fn is_active(&self) -> bool {
        !self.state.is_terminal()
    }
}

/// One append-only entry in the position ledger's transition log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionTransition {
    pub position_id: Uuid,
    pub strategy_id: StrategyId,
    pub from: Option<PositionState>,
    pub to: PositionState,
    pub at: DateTime<Utc>,
    pub realized_pnl: Option<Decimal>,
}
