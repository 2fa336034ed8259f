//! Strategy orchestration: signal arbitration, capital admission, order
//! lifecycle, exits.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use engine_core::events::{EngineEvent, EventSink, ExitReason};
use engine_core::types::{
    Instrument, OrderBookSnapshot, OrderIntent, OrderResult, Position, PositionState, Side,
    Signal, SignalKind, StrategyId,
};

use crate::capital::CapitalLedger;
use crate::gateway::ExecutionGateway;
use crate::ledger::PositionLedger;
use crate::risk::{RiskAction, RiskManager, SignalRejection};
use crate::strategy::{MarketContext, OrderPlan, Strategy};

/// Sole owner of the capital ledger, position ledger and risk counters.
/// Everything here runs on the single engine consumer task, so ledger
/// mutation needs no locking.
pub struct StrategyOrchestrator {
    strategies: Vec<Box<dyn Strategy>>,
    capital: CapitalLedger,
    risk: RiskManager,
    ledger: PositionLedger,
    gateway: Arc<dyn ExecutionGateway>,
    sink: EventSink,
    instruments: HashMap<String, Instrument>,
    /// Latest book per outcome token.
    books: HashMap<String, OrderBookSnapshot>,
    /// Exit reason pinned when an exit goes in flight, consumed at the fill.
    exit_reasons: HashMap<Uuid, ExitReason>,
}

impl StrategyOrchestrator {
    pub fn new(
        strategies: Vec<Box<dyn Strategy>>,
        capital: CapitalLedger,
        risk: RiskManager,
        gateway: Arc<dyn ExecutionGateway>,
        sink: EventSink,
    ) -> Self {
        Self {
            strategies,
            capital,
            risk,
            ledger: PositionLedger::new(),
            gateway,
            sink,
            instruments: HashMap::new(),
            books: HashMap::new(),
            exit_reasons: HashMap::new(),
        }
    }

    pub fn ledger(&self) -> &PositionLedger {
        &self.ledger
    }

    pub fn capital(&self) -> &CapitalLedger {
        &self.capital
    }

    pub fn on_instrument_activated(&mut self, instrument: Instrument) {
        self.instruments.insert(instrument.id.clone(), instrument);
    }

    fn strategy_slot(&self, kind: SignalKind) -> Option<usize> {
        self.strategies.iter().position(|s| s.handles(kind))
    }

    fn strategy_by_id(&self, id: StrategyId) -> Option<&dyn Strategy> {
        self.strategies
            .iter()
            .find(|s| s.id() == id)
            .map(|s| s.as_ref())
    }

    /// Process one drained signal batch in deterministic order.
    pub async fn process_signals(&mut self, mut signals: Vec<Signal>, now: DateTime<Utc>) {
        // Total order: priority class, detection time, registration order.
        signals.sort_by_key(|s| {
            let slot = self.strategy_slot(s.kind);
            let class = slot
                .map(|i| self.strategies[i].id().priority_class())
                .unwrap_or(u8::MAX);
            (class, s.detected_at, slot.unwrap_or(usize::MAX))
        });
        for signal in signals {
            if let Err(rejection) = self.process_signal(&signal, now).await {
                debug!(
                    signal = %signal.id,
                    kind = ?signal.kind,
                    rejection = ?rejection,
                    "Signal rejected"
                );
            }
        }
    }

    async fn process_signal(
        &mut self,
        signal: &Signal,
        now: DateTime<Utc>,
    ) -> Result<(), SignalRejection> {
        let slot = self.strategy_slot(signal.kind).ok_or_else(|| {
            SignalRejection::ValidationFailure(format!("no strategy handles {:?}", signal.kind))
        })?;
        let strategy_id = self.strategies[slot].id();

        if signal.is_expired(now) {
            return Err(SignalRejection::ValidationFailure("signal expired".to_string()));
        }
        // Spike signals reference the external feed; everything else must
        // point at an active instrument.
        if signal.kind != SignalKind::Spike {
            let instrument = signal.primary_instrument().ok_or_else(|| {
                SignalRejection::ValidationFailure("signal has no instrument".to_string())
            })?;
            if !self.instruments.contains_key(instrument) {
                return Err(SignalRejection::ValidationFailure(format!(
                    "instrument {} not active",
                    instrument
                )));
            }
        }

        let was_suspended = self.risk.is_suspended(strategy_id);
        let admission = self.risk.check_entry(
            strategy_id,
            self.ledger.open_count_for(strategy_id),
            self.ledger.open_count(),
            now,
        );
        if let Err(rejection) = admission {
            if !was_suspended && self.risk.is_suspended(strategy_id) {
                if let SignalRejection::RiskLimitBreach(reason) = &rejection {
                    self.sink.emit(EngineEvent::StrategySuspended {
                        strategy_id,
                        reason: reason.clone(),
                    });
                }
            }
            return Err(rejection);
        }

        let plan = {
            let ctx = MarketContext {
                instruments: &self.instruments,
                books: &self.books,
                now,
            };
            self.strategies[slot].plan_entry(signal, &ctx)
        };
        let Some(plan) = plan else {
            return Err(SignalRejection::ValidationFailure(
                "strategy declined entry".to_string(),
            ));
        };
        if !self.instruments.contains_key(&plan.instrument_id) {
            return Err(SignalRejection::ValidationFailure(format!(
                "planned instrument {} not active",
                plan.instrument_id
            )));
        }

        let requested = plan.requested_capital();
        if !self.capital.try_reserve(strategy_id, requested) {
            return Err(SignalRejection::CapitalExhausted);
        }
        self.risk.record_trade(strategy_id, now);
        self.submit_plan(plan, now).await;
        Ok(())
    }

    async fn submit_plan(&mut self, plan: OrderPlan, now: DateTime<Utc>) {
        let deadline = now + Duration::seconds(self.risk.position_timeout_secs());
        for leg in plan.legs {
            let position = Position::new(
                plan.strategy_id,
                plan.instrument_id.clone(),
                leg.token_id.clone(),
                leg.side,
                leg.size,
                leg.price,
                now,
            );
            let position_id = position.id;
            let intent = OrderIntent {
                id: Uuid::new_v4(),
                position_id,
                instrument_id: plan.instrument_id.clone(),
                token_id: leg.token_id,
                side: leg.side,
                price: leg.price,
                size: leg.size,
                time_in_force: leg.time_in_force,
                deadline,
            };
            info!(
                position_id = %position_id,
                strategy = %plan.strategy_id,
                instrument = %plan.instrument_id,
                token = %intent.token_id,
                price = %intent.price,
                size = %intent.size,
                "Submitting entry"
            );
            self.sink.emit(EngineEvent::OrderSubmitted {
                position_id,
                strategy_id: plan.strategy_id,
                instrument_id: plan.instrument_id.clone(),
                notional: intent.notional(),
            });
            self.ledger.insert(position, now);

            match self.gateway.submit(&intent).await {
                Ok(result) => self.apply_order_result(position_id, result, now).await,
                Err(e) => {
                    error!(position_id = %position_id, error = %e, "Gateway submit failed");
                    self.fail_entry(position_id, ExitReason::EntryRejected, now);
                }
            }
        }
    }

    /// Apply a gateway result. Terminal results are idempotent; results for
    /// archived positions are no-ops.
    pub async fn apply_order_result(
        &mut self,
        position_id: Uuid,
        result: OrderResult,
        now: DateTime<Utc>,
    ) {
        if self.ledger.is_archived(position_id) {
            debug!(position_id = %position_id, "Late result for archived position");
            return;
        }
        let Some(position) = self.ledger.get(position_id) else {
            debug!(position_id = %position_id, "Result for unknown position");
            return;
        };
        let state = position.state;

        match (state, result) {
            (_, OrderResult::Accepted) => {}
            (PositionState::Pending, OrderResult::Filled { price, .. }) => {
                if let Some(position) = self.ledger.get_mut(position_id) {
                    if let Err(e) = position.mark_open(price) {
                        error!(position_id = %position_id, error = %e, "Illegal open transition");
                        return;
                    }
                }
                self.ledger.record_transition(position_id, PositionState::Pending, now);
                info!(position_id = %position_id, fill_price = %price, "Position open");
            }
            (PositionState::Closing, OrderResult::Filled { price, .. }) => {
                let reason = self
                    .exit_reasons
                    .remove(&position_id)
                    .unwrap_or(ExitReason::MaxHoldElapsed);
                self.finalize_close(position_id, price, reason, now);
            }
            (PositionState::Pending, OrderResult::Rejected { reason }) => {
                warn!(position_id = %position_id, reason = %reason, "Entry rejected");
                self.fail_entry(position_id, ExitReason::EntryRejected, now);
            }
            (PositionState::Pending, OrderResult::Timeout) => {
                warn!(position_id = %position_id, "Entry timed out");
                self.fail_entry(position_id, ExitReason::EntryTimeout, now);
            }
            (PositionState::Closing, OrderResult::Rejected { reason }) => {
                // Exit stays in flight; the sweep retries it.
                warn!(position_id = %position_id, reason = %reason, "Exit rejected, will retry");
            }
            (PositionState::Closing, OrderResult::Timeout) => {
                warn!(position_id = %position_id, "Exit timed out, will retry");
            }
            (state, result) => {
                debug!(
                    position_id = %position_id,
                    state = ?state,
                    result = ?result,
                    "Duplicate or stale result ignored"
                );
            }
        }
    }

    /// Entry never happened: release the reservation and archive as Failed.
    fn fail_entry(&mut self, position_id: Uuid, reason: ExitReason, now: DateTime<Utc>) {
        let Some(position) = self.ledger.get_mut(position_id) else {
            return;
        };
        let strategy_id = position.strategy_id;
        let reserved = position.reserved;
        if let Err(e) = position.mark_failed(now) {
            error!(position_id = %position_id, error = %e, "Illegal fail transition");
            return;
        }
        self.ledger.record_transition(position_id, PositionState::Pending, now);
        if let Err(e) = self.capital.release(strategy_id, reserved) {
            error!(position_id = %position_id, error = %e, "Reservation release failed");
        }
        self.risk.record_failure(strategy_id);
        self.ledger.archive(position_id);
        self.sink.emit(EngineEvent::PositionClosed {
            position_id,
            strategy_id,
            reason,
            realized_pnl: Decimal::ZERO,
        });
    }

    fn finalize_close(
        &mut self,
        position_id: Uuid,
        exit_price: Decimal,
        reason: ExitReason,
        now: DateTime<Utc>,
    ) {
        let Some(position) = self.ledger.get_mut(position_id) else {
            return;
        };
        let strategy_id = position.strategy_id;
        let reserved = position.reserved;
        let from = position.state;
        let pnl = match position.mark_closed(exit_price, now) {
            Ok(pnl) => pnl,
            Err(e) => {
                error!(position_id = %position_id, error = %e, "Illegal close transition");
                return;
            }
        };
        self.ledger.record_transition(position_id, from, now);
        if let Err(e) = self.capital.release(strategy_id, reserved) {
            error!(position_id = %position_id, error = %e, "Reservation release failed");
        }
        if let Some(action) = self.risk.apply_realized(strategy_id, pnl, now) {
            match action {
                RiskAction::Suspend { strategy, reason } => {
                    self.sink.emit(EngineEvent::StrategySuspended {
                        strategy_id: strategy,
                        reason,
                    });
                }
                RiskAction::Halt { reason } => {
                    self.sink.emit(EngineEvent::TradingHalted { reason });
                }
            }
        }
        self.ledger.archive(position_id);
        info!(
            position_id = %position_id,
            strategy = %strategy_id,
            reason = ?reason,
            realized_pnl = %pnl,
            "Position closed"
        );
        self.sink.emit(EngineEvent::PositionClosed {
            position_id,
            strategy_id,
            reason,
            realized_pnl: pnl,
        });
    }

    /// Kick off an exit for an Open position.
    async fn initiate_exit(&mut self, position_id: Uuid, reason: ExitReason, now: DateTime<Utc>) {
        let Some(position) = self.ledger.get_mut(position_id) else {
            return;
        };
        if position.state != PositionState::Open {
            return;
        }
        // Mark to the bid when we have one; paper exits otherwise settle at
        // entry (flat).
        let exit_price = self
            .books
            .get(&position.token_id)
            .and_then(|b| b.best_bid)
            .unwrap_or(position.entry_price);
        if let Err(e) = position.mark_closing() {
            error!(position_id = %position_id, error = %e, "Illegal closing transition");
            return;
        }
        let intent = OrderIntent {
            id: Uuid::new_v4(),
            position_id,
            instrument_id: position.instrument_id.clone(),
            token_id: position.token_id.clone(),
            side: match position.side {
                Side::Buy => Side::Sell,
                Side::Sell => Side::Buy,
            },
            price: exit_price,
            size: position.size,
            time_in_force: engine_core::types::TimeInForce::Fok,
            deadline: now + Duration::seconds(self.risk.position_timeout_secs()),
        };
        self.ledger.record_transition(position_id, PositionState::Open, now);
        self.exit_reasons.insert(position_id, reason);
        info!(position_id = %position_id, reason = ?reason, exit_price = %exit_price, "Submitting exit");
        match self.gateway.submit(&intent).await {
            Ok(result) => self.apply_order_result(position_id, result, now).await,
            Err(e) => {
                warn!(position_id = %position_id, error = %e, "Exit submit failed, will retry");
            }
        }
    }

    /// Store the snapshot and evaluate exits for positions on the token.
    pub async fn on_book(&mut self, book: OrderBookSnapshot, now: DateTime<Utc>) {
        let instrument_id = book.instrument_id.clone();
        self.books.insert(book.token_id.clone(), book);
        let exits = self.collect_exits_for(&instrument_id, now);
        for (id, reason) in exits {
            self.initiate_exit(id, reason, now).await;
        }
    }

    fn collect_exits_for(&self, instrument_id: &str, now: DateTime<Utc>) -> Vec<(Uuid, ExitReason)> {
        let ctx = MarketContext {
            instruments: &self.instruments,
            books: &self.books,
            now,
        };
        self.ledger
            .by_instrument(instrument_id)
            .into_iter()
            .filter(|p| p.state == PositionState::Open)
            .filter_map(|p| {
                let strategy = self.strategy_by_id(p.strategy_id)?;
                strategy.exit_check(p, &ctx).map(|reason| (p.id, reason))
            })
            .collect()
    }

    /// Retirement: purge instrument state, fail pending entries, close open
    /// positions at the last known bid.
    pub async fn on_instrument_retired(&mut self, instrument_id: &str, now: DateTime<Utc>) {
        self.instruments.remove(instrument_id);

        let affected: Vec<(Uuid, PositionState)> = self
            .ledger
            .by_instrument(instrument_id)
            .into_iter()
            .map(|p| (p.id, p.state))
            .collect();
        for (id, state) in affected {
            match state {
                PositionState::Pending => {
                    if let Err(e) = self.gateway.cancel(id).await {
                        warn!(position_id = %id, error = %e, "Cancel on retirement failed");
                    }
                    self.fail_entry(id, ExitReason::InstrumentRetired, now);
                }
                PositionState::Open => {
                    self.initiate_exit(id, ExitReason::InstrumentRetired, now).await;
                }
                _ => {}
            }
        }
        // Books go last so retirement exits can still mark to them.
        self.books.retain(|_, b| b.instrument_id != instrument_id);
    }

    /// Deadline sweep: abandon stale pending entries, run exit checks that
    /// no tick has triggered, retry in-flight exits.
    pub async fn sweep(&mut self, now: DateTime<Utc>) {
        self.risk.roll_window(now);
        let timeout = Duration::seconds(self.risk.position_timeout_secs());

        let mut stale_pending = Vec::new();
        let mut retry_closing = Vec::new();
        let mut open_instruments = Vec::new();
        for id in self.ledger.live_ids() {
            let Some(position) = self.ledger.get(id) else {
                continue;
            };
            match position.state {
                PositionState::Pending if now - position.opened_at >= timeout => {
                    stale_pending.push(id);
                }
                PositionState::Closing => retry_closing.push(id),
                PositionState::Open => open_instruments.push(position.instrument_id.clone()),
                _ => {}
            }
        }

        for id in stale_pending {
            warn!(position_id = %id, "Pending entry past deadline, abandoning");
            if let Err(e) = self.gateway.cancel(id).await {
                warn!(position_id = %id, error = %e, "Cancel failed");
            }
            self.fail_entry(id, ExitReason::EntryTimeout, now);
        }

        open_instruments.sort();
        open_instruments.dedup();
        for instrument_id in open_instruments {
            let exits = self.collect_exits_for(&instrument_id, now);
            for (id, reason) in exits {
                self.initiate_exit(id, reason, now).await;
            }
        }

        for id in retry_closing {
            self.retry_exit(id, now).await;
        }
    }

    async fn retry_exit(&mut self, position_id: Uuid, now: DateTime<Utc>) {
        let Some(position) = self.ledger.get(position_id) else {
            return;
        };
        if position.state != PositionState::Closing {
            return;
        }
        let exit_price = self
            .books
            .get(&position.token_id)
            .and_then(|b| b.best_bid)
            .unwrap_or(position.entry_price);
        let intent = OrderIntent {
            id: Uuid::new_v4(),
            position_id,
            instrument_id: position.instrument_id.clone(),
            token_id: position.token_id.clone(),
            side: match position.side {
                Side::Buy => Side::Sell,
                Side::Sell => Side::Buy,
            },
            price: exit_price,
            size: position.size,
            time_in_force: engine_core::types::TimeInForce::Fok,
            deadline: now + Duration::seconds(self.risk.position_timeout_secs()),
        };
        debug!(position_id = %position_id, "Retrying exit");
        match self.gateway.submit(&intent).await {
            Ok(result) => self.apply_order_result(position_id, result, now).await,
            Err(e) => {
                warn!(position_id = %position_id, error = %e, "Exit retry failed");
            }
        }
    }
}
