//! Per-connection circuit breaker.
//!
//! Three-state machine: CLOSED (healthy) → OPEN (suspended, fallback feed
//! substitutes if configured) → HALF_OPEN (single probe). All timing is
//! injected so the machine stays synchronous and testable.

use chrono::{DateTime, Duration, Utc};
use engine_core::config::BreakerConfig;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tracing::warn;

const LATENCY_SAMPLE_CAP: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

impl std::fmt::Display for BreakerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            BreakerState::Closed => "closed",
            BreakerState::Open => "open",
            BreakerState::HalfOpen => "half_open",
        };
        f.write_str(name)
    }
}

/// Health snapshot exposed by the supervisor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionHealth {
    pub is_healthy: bool,
    pub consecutive_failures: u32,
    pub average_latency_ms: f64,
}

/// A state transition worth reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: BreakerState,
    pub to: BreakerState,
}

pub struct ConnectionBreaker {
    config: BreakerConfig,
    state: BreakerState,
    consecutive_failures: u32,
    window_start: Option<DateTime<Utc>>,
    opened_at: Option<DateTime<Utc>>,
    /// Trips since the last full recovery; drives the exponential cooldown.
    trips: u32,
    latency_samples: VecDeque<f64>,
}

impl ConnectionBreaker {
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            state: BreakerState::Closed,
            consecutive_failures: 0,
            window_start: None,
            opened_at: None,
            trips: 0,
            latency_samples: VecDeque::with_capacity(LATENCY_SAMPLE_CAP),
        }
    }

    pub fn state(&self) -> BreakerState {
        self.state
    }

    pub fn window_secs(&self) -> i64 {
        self.config.window_secs
    }

    /// Cooldown before the next half-open probe: `base × 2^(trips-1)`, capped.
    pub fn cooldown(&self) -> Duration {
        let exponent = self.trips.saturating_sub(1).min(16);
        let secs = self
            .config
            .cooldown_secs
            .saturating_mul(1_i64 << exponent)
            .min(self.config.cooldown_cap_secs);
        Duration::seconds(secs)
    }

    /// Record a connection failure. Returns the transition if one occurred.
    pub fn record_failure(&mut self, now: DateTime<Utc>) -> Option<Transition> {
        match self.state {
            BreakerState::Closed => {
                // Failures only count while they land inside the rolling window.
                let window = Duration::seconds(self.config.window_secs);
                match self.window_start {
                    Some(start) if now - start <= window => {}
                    _ => {
                        self.window_start = Some(now);
                        self.consecutive_failures = 0;
                    }
                }
                self.consecutive_failures += 1;
                if self.consecutive_failures >= self.config.failure_threshold {
                    return Some(self.open(now));
                }
                None
            }
            BreakerState::HalfOpen => {
                // The single probe failed; back to OPEN with a longer cooldown.
                self.consecutive_failures += 1;
                Some(self.open(now))
            }
            BreakerState::Open => None,
        }
    }

    /// Record a successful operation. Returns the transition if one occurred.
    pub fn record_success(&mut self, _now: DateTime<Utc>) -> Option<Transition> {
        match self.state {
            BreakerState::Closed => {
                self.consecutive_failures = 0;
                self.window_start = None;
                None
            }
            BreakerState::HalfOpen => {
                let transition = Transition {
                    from: self.state,
                    to: BreakerState::Closed,
                };
                self.state = BreakerState::Closed;
                self.consecutive_failures = 0;
                self.window_start = None;
                self.opened_at = None;
                self.trips = 0;
                Some(transition)
            }
            BreakerState::Open => {
                warn!("success recorded while breaker open; ignoring");
                None
            }
        }
    }

    /// Whether the cooldown has elapsed and a probe may be attempted.
    pub fn probe_due(&self, now: DateTime<Utc>) -> bool {
        match (self.state, self.opened_at) {
            (BreakerState::Open, Some(opened)) => now - opened >= self.cooldown(),
            _ => false,
        }
    }

    /// Move OPEN → HALF_OPEN once the cooldown has elapsed. Returns the
    /// transition, or None if the breaker is not ready to probe. At most one
    /// probe is in flight: subsequent calls while HALF_OPEN return None.
    pub fn begin_probe(&mut self, now: DateTime<Utc>) -> Option<Transition> {
        if !self.probe_due(now) {
            return None;
        }
        let transition = Transition {
            from: self.state,
            to: BreakerState::HalfOpen,
        };
        self.state = BreakerState::HalfOpen;
        Some(transition)
    }

    pub fn record_latency(&mut self, latency_ms: f64) {
        if self.latency_samples.len() == LATENCY_SAMPLE_CAP {
            self.latency_samples.pop_front();
        }
        self.latency_samples.push_back(latency_ms);
    }

    pub fn average_latency_ms(&self) -> f64 {
        if self.latency_samples.is_empty() {
            return 0.0;
        }
        self.latency_samples.iter().sum::<f64>() / self.latency_samples.len() as f64
    }

    pub fn health(&self) -> ConnectionHealth {
        let avg = self.average_latency_ms();
        ConnectionHealth {
            is_healthy: self.state == BreakerState::Closed
                && avg <= self.config.latency_threshold_ms,
            consecutive_failures: self.consecutive_failures,
            average_latency_ms: avg,
        }
    }

    fn open(&mut self, now: DateTime<Utc>) -> Transition {
        let transition = Transition {
            from: self.state,
            to: BreakerState::Open,
        };
        self.state = BreakerState::Open;
        self.opened_at = Some(now);
        self.trips += 1;
        transition
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> BreakerConfig {
        BreakerConfig {
            failure_threshold: 3,
            window_secs: 60,
            cooldown_secs: 30,
            cooldown_cap_secs: 300,
            latency_threshold_ms: 200.0,
        }
    }

    #[test]
    fn test_opens_after_threshold_failures_in_window() {
        let mut breaker = ConnectionBreaker::new(config());
        let now = Utc::now();

        assert!(breaker.record_failure(now).is_none());
        assert!(breaker.record_failure(now + Duration::seconds(1)).is_none());
        let transition = breaker.record_failure(now + Duration::seconds(2)).unwrap();
        assert_eq!(transition.to, BreakerState::Open);
        assert_eq!(breaker.state(), BreakerState::Open);
    }

    #[test]
    fn test_failures_outside_window_do_not_accumulate() {
        let mut breaker = ConnectionBreaker::new(config());
        let now = Utc::now();

        breaker.record_failure(now);
        breaker.record_failure(now + Duration::seconds(1));
        // Third failure lands past the 60s window; the count restarts.
        assert!(breaker
            .record_failure(now + Duration::seconds(120))
            .is_none());
        assert_eq!(breaker.state(), BreakerState::Closed);
    }

    #[test]
    fn test_exactly_one_probe_after_cooldown() {
        let mut breaker = ConnectionBreaker::new(config());
        let now = Utc::now();
        for i in 0..3 {
            breaker.record_failure(now + Duration::seconds(i));
        }
        assert_eq!(breaker.state(), BreakerState::Open);

        // Not yet: cooldown is 30s.
        assert!(breaker.begin_probe(now + Duration::seconds(10)).is_none());

        let probe_at = now + Duration::seconds(35);
        let transition = breaker.begin_probe(probe_at).unwrap();
        assert_eq!(transition.to, BreakerState::HalfOpen);
        // No second probe while the first is in flight.
        assert!(breaker.begin_probe(probe_at).is_none());
    }

    #[test]
    fn test_probe_success_closes_and_resets() {
        let mut breaker = ConnectionBreaker::new(config());
        let now = Utc::now();
        for i in 0..3 {
            breaker.record_failure(now + Duration::seconds(i));
        }
        breaker.begin_probe(now + Duration::seconds(35)).unwrap();

        let transition = breaker.record_success(now + Duration::seconds(36)).unwrap();
        assert_eq!(transition.to, BreakerState::Closed);
        assert_eq!(breaker.health().consecutive_failures, 0);
        // Full recovery resets the exponential backoff.
        assert_eq!(breaker.cooldown(), Duration::seconds(30));
    }

    #[test]
    fn test_probe_failure_doubles_cooldown() {
        let mut breaker = ConnectionBreaker::new(config());
        let now = Utc::now();
        for i in 0..3 {
            breaker.record_failure(now + Duration::seconds(i));
        }
        assert_eq!(breaker.cooldown(), Duration::seconds(30));

        breaker.begin_probe(now + Duration::seconds(35)).unwrap();
        let transition = breaker.record_failure(now + Duration::seconds(36)).unwrap();
        assert_eq!(transition.to, BreakerState::Open);
        assert_eq!(breaker.cooldown(), Duration::seconds(60));
    }

    #[test]
    fn test_cooldown_capped() {
        let mut breaker = ConnectionBreaker::new(config());
        let mut now = Utc::now();
        for _ in 0..3 {
            now += Duration::seconds(1);
            breaker.record_failure(now);
        }
        // Repeated failed probes keep doubling until the cap.
        for _ in 0..8 {
            now += Duration::seconds(600);
            breaker.begin_probe(now).unwrap();
            breaker.record_failure(now);
        }
        assert_eq!(breaker.cooldown(), Duration::seconds(300));
    }

    #[test]
    fn test_health_reflects_latency() {
        let mut breaker = ConnectionBreaker::new(config());
        for _ in 0..10 {
            breaker.record_latency(500.0);
        }
        let health = breaker.health();
        assert!(!health.is_healthy);
        assert!((health.average_latency_ms - 500.0).abs() < f64::EPSILON);
    }
}
