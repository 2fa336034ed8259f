//! Core domain types shared across the engine crates.

pub mod market;
pub mod order;
pub mod position;
pub mod signal;

pub use market::{Instrument, OrderBookSnapshot, OutcomeToken, Tick};
pub use order::{OrderIntent, OrderResult, Side, TimeInForce};
pub use position::{Position, PositionState, PositionTransition};
pub use signal::{MoveDirection, Signal, SignalKind, StrategyId};
