//! Connection supervision: one task per feed, each wrapped in a circuit
//! breaker, with a REST polling fallback covering open-breaker windows.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use engine_core::config::BreakerConfig;
use engine_core::events::{EngineEvent, EventSink, MarketEvent};

use crate::breaker::{BreakerState, ConnectionBreaker, ConnectionHealth, Transition};
use crate::connection::{FallbackPoll, Feed};

/// Supervises feed connections. Each supervised feed runs in its own task:
/// sessions are retried with the configured delay, repeated failures trip
/// the feed's breaker, and while the breaker is open the polling fallback
/// keeps a degraded tick stream flowing until a half-open probe succeeds.
pub struct ConnectionSupervisor {
    breaker_config: BreakerConfig,
    sink: EventSink,
    health: Arc<DashMap<String, ConnectionHealth>>,
    reconnect_delay: StdDuration,
    fallback_poll_interval: StdDuration,
}

impl ConnectionSupervisor {
    pub fn new(breaker_config: BreakerConfig, sink: EventSink) -> Self {
        Self {
            breaker_config,
            sink,
            health: Arc::new(DashMap::new()),
            reconnect_delay: StdDuration::from_secs(5),
            fallback_poll_interval: StdDuration::from_millis(1000),
        }
    }

    pub fn with_timing(mut self, reconnect_delay_secs: u64, poll_interval_ms: u64) -> Self {
        self.reconnect_delay = StdDuration::from_secs(reconnect_delay_secs);
        self.fallback_poll_interval = StdDuration::from_millis(poll_interval_ms);
        self
    }

    /// Per-connection health snapshot registry, keyed by feed name.
    pub fn health(&self) -> Arc<DashMap<String, ConnectionHealth>> {
        Arc::clone(&self.health)
    }

    /// Spawn a supervision task for `primary`, optionally backed by a
    /// polling `fallback`. Events from whichever source is live are
    /// forwarded into `events`. The task exits when the event channel
    /// closes.
    pub fn spawn(
        &self,
        primary: Arc<dyn Feed>,
        fallback: Option<Arc<dyn FallbackPoll>>,
        events: mpsc::Sender<MarketEvent>,
    ) -> JoinHandle<()> {
        let worker = FeedWorker {
            primary,
            fallback,
            events,
            breaker: ConnectionBreaker::new(self.breaker_config.clone()),
            sink: self.sink.clone(),
            health: Arc::clone(&self.health),
            reconnect_delay: self.reconnect_delay,
            fallback_poll_interval: self.fallback_poll_interval,
        };
        tokio::spawn(worker.run())
    }
}

struct FeedWorker {
    primary: Arc<dyn Feed>,
    fallback: Option<Arc<dyn FallbackPoll>>,
    events: mpsc::Sender<MarketEvent>,
    breaker: ConnectionBreaker,
    sink: EventSink,
    health: Arc<DashMap<String, ConnectionHealth>>,
    reconnect_delay: StdDuration,
    fallback_poll_interval: StdDuration,
}

impl FeedWorker {
    async fn run(mut self) {
        let name = self.primary.name().to_string();
        loop {
            if self.events.is_closed() {
                break;
            }
            match self.breaker.state() {
                BreakerState::Closed | BreakerState::HalfOpen => {
                    let started = std::time::Instant::now();
                    match self.primary.run_session(&self.events).await {
                        Ok(()) => {
                            let transition = self.breaker.record_success(Utc::now());
                            self.apply(&name, transition);
                            info!(feed = %name, "Feed session ended cleanly, reconnecting");
                        }
                        Err(e) => {
                            warn!(feed = %name, error = %e, "Feed session failed");
                            // A session that streamed for a full breaker
                            // window before dying is not part of a failure
                            // streak.
                            if started.elapsed().as_secs() as i64 >= self.breaker.window_secs() {
                                let transition = self.breaker.record_success(Utc::now());
                                self.apply(&name, transition);
                            }
                            let transition = self.breaker.record_failure(Utc::now());
                            self.apply(&name, transition);
                        }
                    }
                    tokio::time::sleep(self.reconnect_delay).await;
                }
                BreakerState::Open => {
                    let now = Utc::now();
                    if self.breaker.probe_due(now) {
                        let transition = self.breaker.begin_probe(now);
                        self.apply(&name, transition);
                        continue;
                    }
                    self.poll_fallback(&name).await;
                    tokio::time::sleep(self.fallback_poll_interval).await;
                }
            }
        }
    }

    async fn poll_fallback(&mut self, name: &str) {
        let Some(fallback) = &self.fallback else {
            return;
        };
        let started = std::time::Instant::now();
        match fallback.poll_once().await {
            Ok(tick) => {
                self.breaker
                    .record_latency(started.elapsed().as_secs_f64() * 1000.0);
                self.health.insert(name.to_string(), self.breaker.health());
                if self.events.send(MarketEvent::Tick(tick)).await.is_err() {
                    warn!(feed = %name, "Event channel closed during fallback polling");
                }
            }
            Err(e) => {
                warn!(feed = %name, fallback = %fallback.name(), error = %e, "Fallback poll failed");
            }
        }
    }

    fn apply(&self, name: &str, transition: Option<Transition>) {
        self.health.insert(name.to_string(), self.breaker.health());
        if let Some(t) = transition {
            info!(feed = %name, from = %t.from, to = %t.to, "Breaker transition");
            self.sink.emit(EngineEvent::BreakerTransition {
                connection: name.to_string(),
                from: t.from.to_string(),
                to: t.to.to_string(),
            });
        }
    }
}
