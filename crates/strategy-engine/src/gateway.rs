//! Execution gateway boundary.
//!
//! Order signing and venue transport live behind this trait. The engine only
//! ever sees [`OrderResult`]s, delivered at-least-once.

use async_trait::async_trait;
use rust_decimal::Decimal;
use tracing::info;
use uuid::Uuid;

use engine_core::types::{OrderIntent, OrderResult};
use engine_core::Result;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ExecutionGateway: Send + Sync {
    async fn submit(&self, intent: &OrderIntent) -> Result<OrderResult>;
    async fn cancel(&self, position_id: Uuid) -> Result<()>;
}

/// Paper execution: every intent fills at its limit price.
///
/// Fees are tracked for reporting but fills are otherwise frictionless, so
/// paper P&L is an upper bound on live P&L.
pub struct PaperGateway {
    fee_rate: Decimal,
}

impl PaperGateway {
    pub fn new(fee_rate: Decimal) -> Self {
        Self { fee_rate }
    }
}

#[async_trait]
impl ExecutionGateway for PaperGateway {
    async fn submit(&self, intent: &OrderIntent) -> Result<OrderResult> {
        let fees = intent.notional() * self.fee_rate;
        info!(
            intent_id = %intent.id,
            token = %intent.token_id,
            side = ?intent.side,
            price = %intent.price,
            size = %intent.size,
            fees = %fees,
            "[PAPER] Simulated fill at limit price"
        );
        Ok(OrderResult::Filled {
            price: intent.price,
            size: intent.size,
        })
    }

    async fn cancel(&self, position_id: Uuid) -> Result<()> {
        info!(position_id = %position_id, "[PAPER] Simulated cancel");
        Ok(())
    }
}
