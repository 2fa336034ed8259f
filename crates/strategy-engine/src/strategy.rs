//! Strategy variants: a closed set dispatched by signal kind.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use engine_core::config::StrategyConfig;
use engine_core::events::ExitReason;
use engine_core::types::{
    Instrument, MoveDirection, OrderBookSnapshot, Position, Side, Signal, SignalKind, StrategyId,
    TimeInForce,
};

/// One leg of a planned entry.
#[derive(Debug, Clone)]
pub struct OrderLeg {
    pub token_id: String,
    pub side: Side,
    pub price: Decimal,
    pub size: Decimal,
    pub time_in_force: TimeInForce,
}

/// A strategy's sized response to a signal. Capital admission happens later;
/// the plan only states what the strategy wants.
#[derive(Debug, Clone)]
pub struct OrderPlan {
    pub strategy_id: StrategyId,
    pub instrument_id: String,
    pub legs: Vec<OrderLeg>,
}

impl OrderPlan {
    pub fn requested_capital(&self) -> Decimal {
        self.legs.iter().map(|l| l.price * l.size).sum()
    }
}

/// Read-only market state handed to strategies: the active instrument set
/// and the latest book snapshot per outcome token.
pub struct MarketContext<'a> {
    pub instruments: &'a HashMap<String, Instrument>,
    pub books: &'a HashMap<String, OrderBookSnapshot>,
    pub now: DateTime<Utc>,
}

impl MarketContext<'_> {
    pub fn best_ask(&self, token_id: &str) -> Option<Decimal> {
        self.books.get(token_id).and_then(|b| b.best_ask)
    }

    pub fn best_bid(&self, token_id: &str) -> Option<Decimal> {
        self.books.get(token_id).and_then(|b| b.best_bid)
    }

    /// Nearest-expiry active instrument mentioning `keyword`.
    pub fn nearest_expiry_matching(&self, keyword: &str) -> Option<&Instrument> {
        self.instruments
            .values()
            .filter(|i| {
                let haystack =
                    format!("{} {}", i.question.to_lowercase(), i.category.to_lowercase());
                haystack.contains(keyword) && i.expiry_time > self.now
            })
            .min_by_key(|i| i.expiry_time)
    }
}

/// Underlying asset keyword from a reference feed symbol, e.g.
/// `BTCUSDT` → `btc`.
pub fn asset_keyword(reference_id: &str) -> String {
    let lower = reference_id.to_lowercase();
    for quote in ["usdt", "busd", "usdc", "usd"] {
        if let Some(stripped) = lower.strip_suffix(quote) {
            if !stripped.is_empty() {
                return stripped.to_string();
            }
        }
    }
    lower
}

pub trait Strategy: Send + Sync {
    fn id(&self) -> StrategyId;

    fn handles(&self, kind: SignalKind) -> bool;

    /// Size an entry for a signal, or decline.
    fn plan_entry(&self, signal: &Signal, ctx: &MarketContext) -> Option<OrderPlan>;

    /// Decide whether an open position should exit now.
    fn exit_check(&self, position: &Position, ctx: &MarketContext) -> Option<ExitReason>;
}

/// Config-driven exit rules shared by the directional strategies: absolute
/// profit target, percentage stop loss, max hold time.
fn config_exit(
    config: &StrategyConfig,
    position: &Position,
    ctx: &MarketContext,
    profit_target: Option<Decimal>,
) -> Option<ExitReason> {
    if let Some(max_hold) = config.max_hold_secs {
        if (ctx.now - position.opened_at).num_seconds() >= max_hold {
            return Some(ExitReason::MaxHoldElapsed);
        }
    }
    let mark = ctx.best_bid(&position.token_id)?;
    if let Some(target) = profit_target {
        if mark >= target {
            return Some(ExitReason::ProfitTarget);
        }
    }
    if let Some(stop_pct) = config.stop_loss_pct {
        if mark <= position.entry_price * (Decimal::ONE - stop_pct) {
            return Some(ExitReason::StopLoss);
        }
    }
    None
}

/// Rests a Gtc buy on each outcome token at the scan-time asks, capturing
/// the gap under the $1.00 payout.
pub struct MakerStrategy {
    config: StrategyConfig,
}

impl MakerStrategy {
    pub fn new(config: StrategyConfig) -> Self {
        Self { config }
    }
}

impl Strategy for MakerStrategy {
    fn id(&self) -> StrategyId {
        StrategyId::Maker
    }

    fn handles(&self, kind: SignalKind) -> bool {
        kind == SignalKind::Spread
    }

    fn plan_entry(&self, signal: &Signal, ctx: &MarketContext) -> Option<OrderPlan> {
        let instrument_id = signal.primary_instrument()?;
        let instrument = ctx.instruments.get(instrument_id)?;
        let (yes, no) = (instrument.yes_token()?, instrument.no_token()?);
        let (yes_ask, no_ask) = (signal.yes_ask?, signal.no_ask?);
        if yes_ask <= Decimal::ZERO || no_ask <= Decimal::ZERO {
            return None;
        }
        let leg = |token_id: &str, price: Decimal| OrderLeg {
            token_id: token_id.to_string(),
            side: Side::Buy,
            price,
            size: self.config.order_size / price,
            time_in_force: TimeInForce::Gtc,
        };
        Some(OrderPlan {
            strategy_id: self.id(),
            instrument_id: instrument_id.to_string(),
            legs: vec![leg(&yes.token_id, yes_ask), leg(&no.token_id, no_ask)],
        })
    }

    fn exit_check(&self, position: &Position, ctx: &MarketContext) -> Option<ExitReason> {
        config_exit(&self.config, position, ctx, self.config.profit_target)
    }
}

/// Trades venue markets that lag a fast reference-feed move. Taker entries,
/// short hold, tight exits.
pub struct SpikeArbStrategy {
    config: StrategyConfig,
}

/// Up-moves: YES must still be cheap enough to have not priced the move.
const ENTRY_THRESHOLD_UP: Decimal = Decimal::from_parts(60, 0, 0, false, 2);
/// Down-moves: YES must still be rich enough (NO is the cheap side).
const ENTRY_THRESHOLD_DOWN: Decimal = Decimal::from_parts(40, 0, 0, false, 2);
/// Profit target when holding NO after a down-move.
const PROFIT_TARGET_DOWN: Decimal = Decimal::from_parts(70, 0, 0, false, 2);

impl SpikeArbStrategy {
    pub fn new(config: StrategyConfig) -> Self {
        Self { config }
    }

    /// The entry token decides which target applies: YES legs use the
    /// configured up-target, NO legs the down-target.
    fn target_for(&self, position: &Position, ctx: &MarketContext) -> Option<Decimal> {
        let instrument = ctx.instruments.get(&position.instrument_id)?;
        let yes = instrument.yes_token()?;
        if position.token_id == yes.token_id {
            self.config.profit_target
        } else {
            Some(PROFIT_TARGET_DOWN)
        }
    }
}

impl Strategy for SpikeArbStrategy {
    fn id(&self) -> StrategyId {
        StrategyId::SpikeArb
    }

    fn handles(&self, kind: SignalKind) -> bool {
        kind == SignalKind::Spike
    }

    fn plan_entry(&self, signal: &Signal, ctx: &MarketContext) -> Option<OrderPlan> {
        let reference = signal.primary_instrument()?;
        let keyword = asset_keyword(reference);
        let instrument = ctx.nearest_expiry_matching(&keyword)?;
        let (yes, no) = (instrument.yes_token()?, instrument.no_token()?);
        let yes_ask = ctx.best_ask(&yes.token_id)?;

        let (token_id, price) = match signal.direction? {
            MoveDirection::Up => {
                // Venue has priced the move already if YES is rich.
                if yes_ask >= ENTRY_THRESHOLD_UP {
                    return None;
                }
                (yes.token_id.clone(), yes_ask)
            }
            MoveDirection::Down => {
                if yes_ask <= ENTRY_THRESHOLD_DOWN {
                    return None;
                }
                (no.token_id.clone(), ctx.best_ask(&no.token_id)?)
            }
        };
        if price <= Decimal::ZERO {
            return None;
        }
        Some(OrderPlan {
            strategy_id: self.id(),
            instrument_id: instrument.id.clone(),
            legs: vec![OrderLeg {
                token_id,
                side: Side::Buy,
                price,
                size: self.config.order_size / price,
                time_in_force: TimeInForce::Fok,
            }],
        })
    }

    fn exit_check(&self, position: &Position, ctx: &MarketContext) -> Option<ExitReason> {
        let target = self.target_for(position, ctx);
        config_exit(&self.config, position, ctx, target)
    }
}

/// Buys complete sets when the outcome asks sum below the fee-adjusted
/// payout. Held to resolution; the edge is locked at entry.
pub struct SumArbStrategy {
    config: StrategyConfig,
}

impl SumArbStrategy {
    pub fn new(config: StrategyConfig) -> Self {
        Self { config }
    }
}

impl Strategy for SumArbStrategy {
    fn id(&self) -> StrategyId {
        StrategyId::SumArb
    }

    fn handles(&self, kind: SignalKind) -> bool {
        kind == SignalKind::Sum
    }

    fn plan_entry(&self, signal: &Signal, ctx: &MarketContext) -> Option<OrderPlan> {
        let instrument_id = signal.primary_instrument()?;
        let instrument = ctx.instruments.get(instrument_id)?;
        let (yes, no) = (instrument.yes_token()?, instrument.no_token()?);
        let (yes_ask, no_ask) = (signal.yes_ask?, signal.no_ask?);
        if yes_ask <= Decimal::ZERO || no_ask <= Decimal::ZERO {
            return None;
        }
        // Complete sets need equal shares on both legs.
        let shares = (self.config.order_size / yes_ask).min(self.config.order_size / no_ask);
        let leg = |token_id: &str, price: Decimal| OrderLeg {
            token_id: token_id.to_string(),
            side: Side::Buy,
            price,
            size: shares,
            time_in_force: TimeInForce::Fok,
        };
        Some(OrderPlan {
            strategy_id: self.id(),
            instrument_id: instrument_id.to_string(),
            legs: vec![leg(&yes.token_id, yes_ask), leg(&no.token_id, no_ask)],
        })
    }

    fn exit_check(&self, _position: &Position, _ctx: &MarketContext) -> Option<ExitReason> {
        // Complete sets pay out at resolution; retirement handles the close.
        None
    }
}

/// Follows the pattern predictor's direction calls.
pub struct PatternStrategy {
    config: StrategyConfig,
}

impl PatternStrategy {
    pub fn new(config: StrategyConfig) -> Self {
        Self { config }
    }
}

impl Strategy for PatternStrategy {
    fn id(&self) -> StrategyId {
        StrategyId::Pattern
    }

    fn handles(&self, kind: SignalKind) -> bool {
        kind == SignalKind::Pattern
    }

    fn plan_entry(&self, signal: &Signal, ctx: &MarketContext) -> Option<OrderPlan> {
        let instrument_id = signal.primary_instrument()?;
        let instrument = ctx.instruments.get(instrument_id)?;
        let (yes, no) = (instrument.yes_token()?, instrument.no_token()?);
        let token = match signal.direction? {
            MoveDirection::Up => yes,
            MoveDirection::Down => no,
        };
        let ask = ctx.best_ask(&token.token_id)?;
        if ask <= Decimal::ZERO {
            return None;
        }
        Some(OrderPlan {
            strategy_id: self.id(),
            instrument_id: instrument_id.to_string(),
            legs: vec![OrderLeg {
                token_id: token.token_id.clone(),
                side: Side::Buy,
                price: ask,
                size: self.config.order_size / ask,
                time_in_force: TimeInForce::Fok,
            }],
        })
    }

    fn exit_check(&self, position: &Position, ctx: &MarketContext) -> Option<ExitReason> {
        config_exit(&self.config, position, ctx, self.config.profit_target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use engine_core::types::OutcomeToken;

    fn strategy_config(order_size: Decimal) -> StrategyConfig {
        StrategyConfig {
            enabled: true,
            allocation: Decimal::new(3, 1),
            order_size,
            max_concurrent_positions: 3,
            daily_trade_limit: 20,
            daily_loss_limit: Decimal::new(100, 0),
            profit_target: Some(Decimal::new(80, 2)),
            stop_loss_pct: Some(Decimal::new(5, 2)),
            max_hold_secs: Some(30),
        }
    }

    fn instrument(id: &str, question: &str, now: DateTime<Utc>) -> Instrument {
        Instrument {
            id: id.to_string(),
            question: question.to_string(),
            category: "crypto".to_string(),
            expiry_time: now + Duration::minutes(5),
            outcomes: vec![
                OutcomeToken {
                    token_id: format!("{id}-yes"),
                    name: "Yes".to_string(),
                },
                OutcomeToken {
                    token_id: format!("{id}-no"),
                    name: "No".to_string(),
                },
            ],
        }
    }

    fn book(instrument_id: &str, token_id: &str, ask: Decimal, now: DateTime<Utc>) -> OrderBookSnapshot {
        OrderBookSnapshot {
            instrument_id: instrument_id.to_string(),
            token_id: token_id.to_string(),
            best_bid: Some(ask - Decimal::new(2, 2)),
            best_ask: Some(ask),
            bid_size: Decimal::new(500, 0),
            ask_size: Decimal::new(500, 0),
            timestamp: now,
        }
    }

    #[test]
    fn asset_keyword_strips_quote_suffix() {
        assert_eq!(asset_keyword("BTCUSDT"), "btc");
        assert_eq!(asset_keyword("ETHUSD"), "eth");
        assert_eq!(asset_keyword("btc"), "btc");
    }

    #[test]
    fn maker_plans_two_resting_legs() {
        let now = Utc::now();
        let mut instruments = HashMap::new();
        instruments.insert("mkt-1".to_string(), instrument("mkt-1", "BTC up?", now));
        let books = HashMap::new();
        let ctx = MarketContext {
            instruments: &instruments,
            books: &books,
            now,
        };

        let mut signal = Signal::new(
            SignalKind::Spread,
            vec!["mkt-1".to_string()],
            Decimal::new(6, 2),
            now,
            Duration::seconds(5),
        );
        signal.yes_ask = Some(Decimal::new(50, 2));
        signal.no_ask = Some(Decimal::new(40, 2));

        let maker = MakerStrategy::new(strategy_config(Decimal::new(2, 0)));
        let plan = maker.plan_entry(&signal, &ctx).expect("maker should plan");
        assert_eq!(plan.legs.len(), 2);
        assert!(plan.legs.iter().all(|l| l.time_in_force == TimeInForce::Gtc));
        assert!(plan.legs.iter().all(|l| l.side == Side::Buy));
        // Each leg spends order_size of notional: 4 shares at 0.50, 5 at 0.40.
        assert_eq!(plan.legs[0].size, Decimal::new(4, 0));
        assert_eq!(plan.legs[1].size, Decimal::new(5, 0));
        assert_eq!(plan.requested_capital(), Decimal::new(4, 0));
    }

    #[test]
    fn spike_up_buys_yes_only_when_unpriced() {
        let now = Utc::now();
        let mut instruments = HashMap::new();
        instruments.insert(
            "mkt-1".to_string(),
            instrument("mkt-1", "BTC above 100k in 5min?", now),
        );
        let mut books = HashMap::new();
        books.insert(
            "mkt-1-yes".to_string(),
            book("mkt-1", "mkt-1-yes", Decimal::new(55, 2), now),
        );
        let ctx = MarketContext {
            instruments: &instruments,
            books: &books,
            now,
        };

        let mut signal = Signal::new(
            SignalKind::Spike,
            vec!["BTCUSDT".to_string()],
            Decimal::new(180, 0),
            now,
            Duration::seconds(5),
        );
        signal.direction = Some(MoveDirection::Up);

        let spike = SpikeArbStrategy::new(strategy_config(Decimal::new(50, 0)));
        let plan = spike.plan_entry(&signal, &ctx).expect("cheap YES should enter");
        assert_eq!(plan.legs.len(), 1);
        assert_eq!(plan.legs[0].token_id, "mkt-1-yes");
        assert_eq!(plan.legs[0].time_in_force, TimeInForce::Fok);

        // Rich YES means the venue already moved.
        let mut books = books;
        books.insert(
            "mkt-1-yes".to_string(),
            book("mkt-1", "mkt-1-yes", Decimal::new(65, 2), now),
        );
        let ctx = MarketContext {
            instruments: &instruments,
            books: &books,
            now,
        };
        assert!(spike.plan_entry(&signal, &ctx).is_none());
    }

    #[test]
    fn spike_down_buys_no_side() {
        let now = Utc::now();
        let mut instruments = HashMap::new();
        instruments.insert(
            "mkt-1".to_string(),
            instrument("mkt-1", "BTC above 100k in 5min?", now),
        );
        let mut books = HashMap::new();
        books.insert(
            "mkt-1-yes".to_string(),
            book("mkt-1", "mkt-1-yes", Decimal::new(55, 2), now),
        );
        books.insert(
            "mkt-1-no".to_string(),
            book("mkt-1", "mkt-1-no", Decimal::new(47, 2), now),
        );
        let ctx = MarketContext {
            instruments: &instruments,
            books: &books,
            now,
        };

        let mut signal = Signal::new(
            SignalKind::Spike,
            vec!["BTCUSDT".to_string()],
            Decimal::new(200, 0),
            now,
            Duration::seconds(5),
        );
        signal.direction = Some(MoveDirection::Down);

        let spike = SpikeArbStrategy::new(strategy_config(Decimal::new(50, 0)));
        let plan = spike.plan_entry(&signal, &ctx).expect("down-move should buy NO");
        assert_eq!(plan.legs[0].token_id, "mkt-1-no");
    }

    #[test]
    fn sum_arb_equalizes_shares_across_legs() {
        let now = Utc::now();
        let mut instruments = HashMap::new();
        instruments.insert("mkt-1".to_string(), instrument("mkt-1", "BTC up?", now));
        let books = HashMap::new();
        let ctx = MarketContext {
            instruments: &instruments,
            books: &books,
            now,
        };

        let mut signal = Signal::new(
            SignalKind::Sum,
            vec!["mkt-1".to_string()],
            Decimal::new(12, 3),
            now,
            Duration::seconds(5),
        );
        signal.yes_ask = Some(Decimal::new(50, 2));
        signal.no_ask = Some(Decimal::new(48, 2));

        let sum = SumArbStrategy::new(strategy_config(Decimal::new(2, 0)));
        let plan = sum.plan_entry(&signal, &ctx).expect("sum arb should plan");
        assert_eq!(plan.legs.len(), 2);
        assert_eq!(plan.legs[0].size, plan.legs[1].size);
        // Equalized to the more expensive leg: 2.0 / 0.50 = 4 shares.
        assert_eq!(plan.legs[0].size, Decimal::new(4, 0));
    }

    #[test]
    fn exit_checks_cover_target_stop_and_hold() {
        let now = Utc::now();
        let mut instruments = HashMap::new();
        instruments.insert(
            "mkt-1".to_string(),
            instrument("mkt-1", "BTC above 100k in 5min?", now),
        );
        let spike = SpikeArbStrategy::new(strategy_config(Decimal::new(50, 0)));
        let mut position = Position::new(
            StrategyId::SpikeArb,
            "mkt-1".to_string(),
            "mkt-1-yes".to_string(),
            Side::Buy,
            Decimal::new(100, 0),
            Decimal::new(55, 2),
            now,
        );
        position.mark_open(Decimal::new(55, 2)).unwrap();

        // Bid at the 0.80 target.
        let mut books = HashMap::new();
        books.insert(
            "mkt-1-yes".to_string(),
            book("mkt-1", "mkt-1-yes", Decimal::new(82, 2), now),
        );
        let ctx = MarketContext {
            instruments: &instruments,
            books: &books,
            now,
        };
        assert_eq!(spike.exit_check(&position, &ctx), Some(ExitReason::ProfitTarget));

        // Bid 0.50 is below the 5% stop on a 0.55 entry.
        let mut books = HashMap::new();
        books.insert(
            "mkt-1-yes".to_string(),
            book("mkt-1", "mkt-1-yes", Decimal::new(52, 2), now),
        );
        let ctx = MarketContext {
            instruments: &instruments,
            books: &books,
            now,
        };
        assert_eq!(spike.exit_check(&position, &ctx), Some(ExitReason::StopLoss));

        // No book at all: only the hold clock can fire.
        let books = HashMap::new();
        let late = MarketContext {
            instruments: &instruments,
            books: &books,
            now: now + Duration::seconds(31),
        };
        assert_eq!(
            spike.exit_check(&position, &late),
            Some(ExitReason::MaxHoldElapsed)
        );
    }
}
