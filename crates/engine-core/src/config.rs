//! Configuration management for the polystrat trading engine.
//!
//! Everything is resolved once from the environment at startup; thresholds
//! are never hot-reloaded.

use crate::types::StrategyId;
use crate::{Error, Result};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::collections::HashMap;
use std::env;

/// Application configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub feeds: FeedConfig,
    pub breaker: BreakerConfig,
    pub catalog: CatalogConfig,
    pub detectors: DetectorConfig,
    pub risk: RiskConfig,
    pub strategies: HashMap<StrategyId, StrategyConfig>,
    /// Shared capital pool, split across strategies by allocation fraction.
    pub total_capital: Decimal,
    /// Fee rate charged by the paper gateway on simulated fills.
    pub paper_fee_rate: Decimal,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FeedConfig {
    /// Venue market-data WebSocket.
    pub venue_ws_url: String,
    /// Reference price feed WebSocket (e.g. spot BTC).
    pub reference_ws_url: String,
    /// REST base used by the polling fallback and order-book reads.
    pub venue_rest_url: String,
    /// Polling fallback for the reference feed while its breaker is open.
    pub reference_rest_url: String,
    /// Connect attempts before a subscribe call fails with a connection error.
    pub max_connect_attempts: u32,
    /// Base delay between reconnect attempts (seconds).
    pub reconnect_delay_secs: u64,
    /// Polling cadence for the REST fallback (milliseconds).
    pub poll_interval_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BreakerConfig {
    /// Consecutive failures within `window_secs` before the breaker opens.
    pub failure_threshold: u32,
    pub window_secs: i64,
    /// Base cooldown before the first half-open probe (seconds).
    pub cooldown_secs: i64,
    /// Cap for the exponential cooldown (seconds).
    pub cooldown_cap_secs: i64,
    /// Average latency above this marks the connection unhealthy (ms).
    pub latency_threshold_ms: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CatalogConfig {
    pub discovery_url: String,
    pub refresh_interval_secs: u64,
    /// Category keywords an instrument must match (any of, case-insensitive).
    pub categories: Vec<String>,
    /// Keywords that exclude an instrument outright.
    pub exclude_keywords: Vec<String>,
    /// Instruments closer to expiry than this are never activated (seconds).
    pub min_time_remaining_secs: i64,
    pub max_instruments: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DetectorConfig {
    pub min_spread_to_trade: Decimal,
    /// Minimum reference-feed move to flag a spike (absolute price units).
    pub spike_min_move: Decimal,
    pub spike_window_min_secs: i64,
    pub spike_window_max_secs: i64,
    pub spike_cooldown_secs: i64,
    /// Haircut applied to the $1.00 payout when judging sum mispricing.
    pub sum_fee_buffer: Decimal,
    pub sum_min_profit: Decimal,
    pub pattern_min_confidence: Decimal,
    pub pattern_cooldown_secs: i64,
    /// How long an emitted signal stays consumable (seconds).
    pub signal_ttl_secs: i64,
    /// No entry signals for instruments closer to expiry than this (seconds).
    pub min_time_remaining_secs: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RiskConfig {
    /// Process-wide cap on concurrently live positions.
    pub global_max_positions: usize,
    /// Process-wide daily loss limit; breach halts all trading.
    pub global_daily_loss_limit: Decimal,
    /// Pending entries past this age are abandoned (seconds).
    pub position_timeout_secs: i64,
    /// Deadline sweep cadence (seconds).
    pub sweep_interval_secs: u64,
}

/// Per-strategy settings, all fixed at startup.
#[derive(Debug, Clone, Deserialize)]
pub struct StrategyConfig {
    pub enabled: bool,
    /// Fraction of total capital this strategy may reserve. Fractions across
    /// enabled strategies must sum to 1.0.
    pub allocation: Decimal,
    /// Notional per entry leg (USD).
    pub order_size: Decimal,
    pub max_concurrent_positions: usize,
    pub daily_trade_limit: u32,
    pub daily_loss_limit: Decimal,
    pub profit_target: Option<Decimal>,
    pub stop_loss_pct: Option<Decimal>,
    pub max_hold_secs: Option<i64>,
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

fn env_decimal(key: &str, default: &str) -> Result<Decimal> {
    let raw = env_or(key, default);
    raw.parse().map_err(|_| Error::Config {
        message: format!("{} is not a valid decimal: {}", key, raw),
    })
}

fn env_list(key: &str, default: &str) -> Vec<String> {
    env_or(key, default)
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn env_flag(key: &str, default: bool) -> bool {
    env::var(key)
        .ok()
        .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes"))
        .unwrap_or(default)
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let mut strategies = HashMap::new();
        strategies.insert(
            StrategyId::Maker,
            StrategyConfig {
                enabled: env_flag("STRATEGY_MAKER_ENABLED", true),
                allocation: env_decimal("MAKER_ALLOCATION", "0.4")?,
                order_size: env_decimal("MAKER_ORDER_SIZE", "2.0")?,
                max_concurrent_positions: env_parse("MAKER_MAX_POSITIONS", 6),
                daily_trade_limit: env_parse("MAKER_DAILY_TRADE_LIMIT", 50),
                daily_loss_limit: env_decimal("MAKER_DAILY_LOSS_LIMIT", "50.0")?,
                profit_target: None,
                stop_loss_pct: None,
                max_hold_secs: Some(env_parse("MAKER_MAX_HOLD_SECS", 300)),
            },
        );
        strategies.insert(
            StrategyId::SpikeArb,
            StrategyConfig {
                enabled: env_flag("STRATEGY_SPIKE_ENABLED", true),
                allocation: env_decimal("SPIKE_ALLOCATION", "0.3")?,
                order_size: env_decimal("SPIKE_ORDER_SIZE", "50.0")?,
                max_concurrent_positions: env_parse("SPIKE_MAX_POSITIONS", 3),
                daily_trade_limit: env_parse("SPIKE_DAILY_TRADE_LIMIT", 20),
                daily_loss_limit: env_decimal("SPIKE_DAILY_LOSS_LIMIT", "100.0")?,
                profit_target: Some(env_decimal("SPIKE_PROFIT_TARGET_UP", "0.80")?),
                stop_loss_pct: Some(env_decimal("SPIKE_STOP_LOSS_PCT", "0.05")?),
                max_hold_secs: Some(env_parse("SPIKE_MAX_HOLD_SECS", 30)),
            },
        );
        strategies.insert(
            StrategyId::SumArb,
            StrategyConfig {
                enabled: env_flag("STRATEGY_SUM_ENABLED", true),
                allocation: env_decimal("SUM_ALLOCATION", "0.2")?,
                order_size: env_decimal("SUM_ORDER_SIZE", "2.0")?,
                max_concurrent_positions: env_parse("SUM_MAX_POSITIONS", 6),
                daily_trade_limit: env_parse("SUM_DAILY_TRADE_LIMIT", 40),
                daily_loss_limit: env_decimal("SUM_DAILY_LOSS_LIMIT", "50.0")?,
                profit_target: None,
                stop_loss_pct: None,
                max_hold_secs: None,
            },
        );
        strategies.insert(
            StrategyId::Pattern,
            StrategyConfig {
                enabled: env_flag("STRATEGY_PATTERN_ENABLED", false),
                allocation: env_decimal("PATTERN_ALLOCATION", "0.1")?,
                order_size: env_decimal("PATTERN_ORDER_SIZE", "10.0")?,
                max_concurrent_positions: env_parse("PATTERN_MAX_POSITIONS", 2),
                daily_trade_limit: env_parse("PATTERN_DAILY_TRADE_LIMIT", 10),
                daily_loss_limit: env_decimal("PATTERN_DAILY_LOSS_LIMIT", "25.0")?,
                profit_target: Some(env_decimal("PATTERN_PROFIT_TARGET", "0.75")?),
                stop_loss_pct: Some(env_decimal("PATTERN_STOP_LOSS_PCT", "0.05")?),
                max_hold_secs: Some(env_parse("PATTERN_MAX_HOLD_SECS", 120)),
            },
        );

        Ok(Self {
            feeds: FeedConfig {
                venue_ws_url: env_or(
                    "VENUE_WS_URL",
                    "wss://ws-subscriptions-clob.polymarket.com/ws/market",
                ),
                reference_ws_url: env_or(
                    "REFERENCE_WS_URL",
                    "wss://stream.binance.com:9443/ws/btcusdt@trade",
                ),
                venue_rest_url: env_or("VENUE_REST_URL", "https://clob.polymarket.com"),
                reference_rest_url: env_or(
                    "REFERENCE_REST_URL",
                    "https://api.binance.com/api/v3/ticker/price?symbol=BTCUSDT",
                ),
                max_connect_attempts: env_parse("FEED_MAX_CONNECT_ATTEMPTS", 10),
                reconnect_delay_secs: env_parse("FEED_RECONNECT_DELAY_SECS", 5),
                poll_interval_ms: env_parse("FEED_POLL_INTERVAL_MS", 1000),
            },
            breaker: BreakerConfig {
                failure_threshold: env_parse("BREAKER_FAILURE_THRESHOLD", 5),
                window_secs: env_parse("BREAKER_WINDOW_SECS", 60),
                cooldown_secs: env_parse("BREAKER_COOLDOWN_SECS", 30),
                cooldown_cap_secs: env_parse("BREAKER_COOLDOWN_CAP_SECS", 300),
                latency_threshold_ms: env_parse("BREAKER_LATENCY_THRESHOLD_MS", 200.0),
            },
            catalog: CatalogConfig {
                discovery_url: env_or("DISCOVERY_URL", "https://gamma-api.polymarket.com"),
                refresh_interval_secs: env_parse("CATALOG_REFRESH_INTERVAL_SECS", 10),
                categories: env_list("CATALOG_CATEGORIES", "btc,eth,5min,hourly"),
                exclude_keywords: env_list("CATALOG_EXCLUDE_KEYWORDS", "test,demo"),
                min_time_remaining_secs: env_parse("CATALOG_MIN_TIME_REMAINING_SECS", 120),
                max_instruments: env_parse("CATALOG_MAX_INSTRUMENTS", 25),
            },
            detectors: DetectorConfig {
                min_spread_to_trade: env_decimal("MIN_SPREAD_TO_TRADE", "0.05")?,
                spike_min_move: env_decimal("SPIKE_MIN_MOVE", "150.0")?,
                spike_window_min_secs: env_parse("SPIKE_WINDOW_MIN_SECS", 3),
                spike_window_max_secs: env_parse("SPIKE_WINDOW_MAX_SECS", 10),
                spike_cooldown_secs: env_parse("SPIKE_COOLDOWN_SECS", 30),
                sum_fee_buffer: env_decimal("SUM_FEE_BUFFER", "0.008")?,
                sum_min_profit: env_decimal("SUM_MIN_PROFIT", "0.005")?,
                pattern_min_confidence: env_decimal("PATTERN_MIN_CONFIDENCE", "0.65")?,
                pattern_cooldown_secs: env_parse("PATTERN_COOLDOWN_SECS", 60),
                signal_ttl_secs: env_parse("SIGNAL_TTL_SECS", 5),
                min_time_remaining_secs: env_parse("CATALOG_MIN_TIME_REMAINING_SECS", 120),
            },
            risk: RiskConfig {
                global_max_positions: env_parse("GLOBAL_MAX_POSITIONS", 15),
                global_daily_loss_limit: env_decimal("GLOBAL_DAILY_LOSS_LIMIT", "200.0")?,
                position_timeout_secs: env_parse("POSITION_TIMEOUT_SECS", 180),
                sweep_interval_secs: env_parse("SWEEP_INTERVAL_SECS", 5),
            },
            strategies,
            total_capital: env_decimal("TOTAL_CAPITAL", "100.0")?,
            paper_fee_rate: env_decimal("PAPER_FEE_RATE", "0.0")?,
        })
    }

    /// Allocation fractions for enabled strategies, for ledger construction.
    pub fn enabled_allocations(&self) -> HashMap<StrategyId, Decimal> {
        self.strategies
            .iter()
            .filter(|(_, c)| c.enabled)
            .map(|(id, c)| (*id, c.allocation))
            .collect()
    }

    /// Validate cross-field constraints that env parsing cannot express.
    pub fn validate(&self) -> Result<()> {
        if self.total_capital <= Decimal::ZERO {
            return Err(Error::Config {
                message: "TOTAL_CAPITAL must be positive".to_string(),
            });
        }
        if self.detectors.spike_window_min_secs >= self.detectors.spike_window_max_secs {
            return Err(Error::Config {
                message: "spike window min must be below max".to_string(),
            });
        }
        let total: Decimal = self.enabled_allocations().values().copied().sum();
        if total > Decimal::ONE {
            return Err(Error::Config {
                message: format!("strategy allocations sum to {} (> 1.0)", total),
            });
        }
        Ok(())
    }

}
