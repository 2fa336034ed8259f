//! Strategy Engine
//!
//! Capital and risk ledgers, the position ledger, strategy variants, the
//! execution gateway boundary, and the orchestrator that ties them together
//! on a single consumer task.

pub mod capital;
pub mod engine;
pub mod gateway;
pub mod ledger;
pub mod orchestrator;
pub mod risk;
pub mod strategy;

pub use capital::CapitalLedger;
pub use engine::TradingEngine;
pub use gateway::{ExecutionGateway, PaperGateway};
pub use ledger::PositionLedger;
pub use orchestrator::StrategyOrchestrator;
pub use risk::{RiskAction, RiskManager, SignalRejection};
pub use strategy::{
    MakerStrategy, MarketContext, OrderLeg, OrderPlan, PatternStrategy, SpikeArbStrategy,
    Strategy, SumArbStrategy,
};
