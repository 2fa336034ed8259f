//! Daily risk limits: per-strategy suspension and the global halt.

use std::collections::HashMap;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use tracing::{info, warn};

use engine_core::config::{RiskConfig, StrategyConfig};
use engine_core::types::StrategyId;

/// Why a signal was turned away. Expected outcomes, not errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignalRejection {
    ValidationFailure(String),
    RiskLimitBreach(String),
    CapitalExhausted,
}

/// Limit breach consequence, surfaced to the observability sink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RiskAction {
    Suspend { strategy: StrategyId, reason: String },
    Halt { reason: String },
}

#[derive(Default)]
struct StrategyDay {
    trades: u32,
    realized: Decimal,
    consecutive_losses: u32,
    suspended: bool,
}

/// Rolling-day risk counters. All counters reset at the UTC date boundary;
/// suspensions and the global halt last for the remainder of the day.
pub struct RiskManager {
    config: RiskConfig,
    limits: HashMap<StrategyId, StrategyConfig>,
    day: NaiveDate,
    days: HashMap<StrategyId, StrategyDay>,
    global_realized: Decimal,
    halted: bool,
}

impl RiskManager {
    pub fn new(
        config: RiskConfig,
        limits: HashMap<StrategyId, StrategyConfig>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            config,
            limits,
            day: now.date_naive(),
            days: HashMap::new(),
            global_realized: Decimal::ZERO,
            halted: false,
        }
    }

    /// Reset counters when the UTC day rolls over.
    pub fn roll_window(&mut self, now: DateTime<Utc>) {
        let today = now.date_naive();
        if today == self.day {
            return;
        }
        info!(day = %today, "Daily risk window reset");
        self.day = today;
        self.days.clear();
        self.global_realized = Decimal::ZERO;
        self.halted = false;
    }

    pub fn is_halted(&self) -> bool {
        self.halted
    }

    pub fn is_suspended(&self, strategy: StrategyId) -> bool {
        self.days.get(&strategy).map(|d| d.suspended).unwrap_or(false)
    }

    pub fn position_timeout_secs(&self) -> i64 {
        self.config.position_timeout_secs
    }

    /// Admission check before planning an entry. `strategy_open` and
    /// `global_open` are live position counts from the position ledger.
    pub fn check_entry(
        &mut self,
        strategy: StrategyId,
        strategy_open: usize,
        global_open: usize,
        now: DateTime<Utc>,
    ) -> Result<(), SignalRejection> {
        self.roll_window(now);
        if self.halted {
            return Err(SignalRejection::RiskLimitBreach("trading halted".to_string()));
        }
        if global_open >= self.config.global_max_positions {
            return Err(SignalRejection::RiskLimitBreach(format!(
                "global position cap {} reached",
                self.config.global_max_positions
            )));
        }
        let Some(limits) = self.limits.get(&strategy) else {
            return Err(SignalRejection::ValidationFailure(format!(
                "no limits configured for {}",
                strategy
            )));
        };
        let day = self.days.entry(strategy).or_default();
        if day.suspended {
            return Err(SignalRejection::RiskLimitBreach(format!(
                "{} suspended for the day",
                strategy
            )));
        }
        if strategy_open >= limits.max_concurrent_positions {
            return Err(SignalRejection::RiskLimitBreach(format!(
                "{} at max concurrent positions ({})",
                strategy, limits.max_concurrent_positions
            )));
        }
        if day.trades >= limits.daily_trade_limit {
            day.suspended = true;
            return Err(SignalRejection::RiskLimitBreach(format!(
                "{} daily trade limit {} reached",
                strategy, limits.daily_trade_limit
            )));
        }
        Ok(())
    }

    /// Count an accepted entry against the daily trade limit.
    pub fn record_trade(&mut self, strategy: StrategyId, now: DateTime<Utc>) {
        self.roll_window(now);
        self.days.entry(strategy).or_default().trades += 1;
    }

    /// An entry that never opened (rejected or timed-out order) extends the
    /// loss streak like a losing close.
    pub fn record_failure(&mut self, strategy: StrategyId) {
        self.days.entry(strategy).or_default().consecutive_losses += 1;
    }

    /// Losing closes since the last winning close, today.
    pub fn consecutive_losses(&self, strategy: StrategyId) -> u32 {
        self.days
            .get(&strategy)
            .map(|d| d.consecutive_losses)
            .unwrap_or(0)
    }

    /// Apply realized P&L and report any limit consequence.
    pub fn apply_realized(
        &mut self,
        strategy: StrategyId,
        pnl: Decimal,
        now: DateTime<Utc>,
    ) -> Option<RiskAction> {
        self.roll_window(now);
        self.global_realized += pnl;
        let day = self.days.entry(strategy).or_default();
        day.realized += pnl;
        if pnl < Decimal::ZERO {
            day.consecutive_losses += 1;
        } else if pnl > Decimal::ZERO {
            day.consecutive_losses = 0;
        }

        if !self.halted && self.global_realized <= -self.config.global_daily_loss_limit {
            self.halted = true;
            let reason = format!(
                "global daily loss {} breached limit {}",
                self.global_realized, self.config.global_daily_loss_limit
            );
            warn!(realized = %self.global_realized, "{}", reason);
            return Some(RiskAction::Halt { reason });
        }

        let limit = self.limits.get(&strategy).map(|l| l.daily_loss_limit)?;
        let day = self.days.entry(strategy).or_default();
        if !day.suspended && day.realized <= -limit {
            day.suspended = true;
            let reason = format!(
                "{} daily loss {} breached limit {}",
                strategy, day.realized, limit
            );
            warn!(strategy = %strategy, realized = %day.realized, "{}", reason);
            return Some(RiskAction::Suspend { strategy, reason });
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn limits(daily_trade_limit: u32) -> HashMap<StrategyId, StrategyConfig> {
        let mut map = HashMap::new();
        for id in StrategyId::all() {
            map.insert(
                id,
                StrategyConfig {
                    enabled: true,
                    allocation: Decimal::new(25, 2),
                    order_size: Decimal::new(50, 0),
                    max_concurrent_positions: 3,
                    daily_trade_limit,
                    daily_loss_limit: Decimal::new(100, 0),
                    profit_target: None,
                    stop_loss_pct: None,
                    max_hold_secs: None,
                },
            );
        }
        map
    }

    fn risk_config() -> RiskConfig {
        RiskConfig {
            global_max_positions: 15,
            global_daily_loss_limit: Decimal::new(200, 0),
            position_timeout_secs: 180,
            sweep_interval_secs: 5,
        }
    }

    #[test]
    fn trade_past_daily_limit_is_rejected_and_suspends() {
        let now = Utc::now();
        let mut risk = RiskManager::new(risk_config(), limits(20), now);

        for _ in 0..20 {
            assert!(risk.check_entry(StrategyId::SpikeArb, 0, 0, now).is_ok());
            risk.record_trade(StrategyId::SpikeArb, now);
        }
        // 21st entry breaches the cap.
        match risk.check_entry(StrategyId::SpikeArb, 0, 0, now) {
            Err(SignalRejection::RiskLimitBreach(_)) => {}
            other => panic!("expected risk breach, got {:?}", other),
        }
        assert!(risk.is_suspended(StrategyId::SpikeArb));
        // Other strategies are unaffected.
        assert!(risk.check_entry(StrategyId::Maker, 0, 0, now).is_ok());
    }

    #[test]
    fn strategy_loss_limit_suspends_without_halting() {
        let now = Utc::now();
        let mut risk = RiskManager::new(risk_config(), limits(50), now);

        let action = risk.apply_realized(StrategyId::Maker, Decimal::new(-100, 0), now);
        match action {
            Some(RiskAction::Suspend { strategy, .. }) => assert_eq!(strategy, StrategyId::Maker),
            other => panic!("expected suspension, got {:?}", other),
        }
        assert!(risk.is_suspended(StrategyId::Maker));
        assert!(!risk.is_halted());
        assert!(risk.check_entry(StrategyId::SumArb, 0, 0, now).is_ok());
    }

    #[test]
    fn global_loss_limit_halts_everything() {
        let now = Utc::now();
        let mut risk = RiskManager::new(risk_config(), limits(50), now);

        risk.apply_realized(StrategyId::Maker, Decimal::new(-90, 0), now);
        risk.apply_realized(StrategyId::SpikeArb, Decimal::new(-90, 0), now);
        let action = risk.apply_realized(StrategyId::SumArb, Decimal::new(-30, 0), now);
        match action {
            Some(RiskAction::Halt { .. }) => {}
            other => panic!("expected halt, got {:?}", other),
        }
        assert!(risk.is_halted());
        assert!(risk.check_entry(StrategyId::Maker, 0, 0, now).is_err());
    }

    #[test]
    fn counters_reset_at_utc_day_boundary() {
        let now = Utc::now();
        let mut risk = RiskManager::new(risk_config(), limits(50), now);

        risk.apply_realized(StrategyId::Maker, Decimal::new(-250, 0), now);
        assert!(risk.is_halted());

        let tomorrow = now + Duration::days(1);
        assert!(risk.check_entry(StrategyId::Maker, 0, 0, tomorrow).is_ok());
        assert!(!risk.is_halted());
        assert!(!risk.is_suspended(StrategyId::Maker));
    }

    #[test]
    fn loss_streak_grows_on_losses_and_resets_on_a_win() {
        let now = Utc::now();
        let mut risk = RiskManager::new(risk_config(), limits(50), now);

        risk.apply_realized(StrategyId::SpikeArb, Decimal::new(-5, 0), now);
        risk.apply_realized(StrategyId::SpikeArb, Decimal::new(-5, 0), now);
        risk.record_failure(StrategyId::SpikeArb);
        assert_eq!(risk.consecutive_losses(StrategyId::SpikeArb), 3);
        // A flat close leaves the streak alone.
        risk.apply_realized(StrategyId::SpikeArb, Decimal::ZERO, now);
        assert_eq!(risk.consecutive_losses(StrategyId::SpikeArb), 3);

        risk.apply_realized(StrategyId::SpikeArb, Decimal::new(5, 0), now);
        assert_eq!(risk.consecutive_losses(StrategyId::SpikeArb), 0);
        // Streaks are per strategy.
        assert_eq!(risk.consecutive_losses(StrategyId::Maker), 0);

        risk.apply_realized(StrategyId::SpikeArb, Decimal::new(-5, 0), now);
        let tomorrow = now + Duration::days(1);
        risk.roll_window(tomorrow);
        assert_eq!(risk.consecutive_losses(StrategyId::SpikeArb), 0);
    }

    #[test]
    fn global_position_cap_applies_before_strategy_checks() {
        let now = Utc::now();
        let mut risk = RiskManager::new(risk_config(), limits(50), now);
        match risk.check_entry(StrategyId::Maker, 0, 15, now) {
            Err(SignalRejection::RiskLimitBreach(reason)) => {
                assert!(reason.contains("global"));
            }
            other => panic!("expected global cap breach, got {:?}", other),
        }
    }
}
