//! Single-consumer engine loop.

use std::time::Duration as StdDuration;

use chrono::Utc;
use tokio::sync::mpsc;
use tracing::info;

use detectors::DetectorSet;
use engine_core::events::{EngineEvent, EventSink, MarketEvent};
use engine_core::types::Signal;

use crate::orchestrator::StrategyOrchestrator;

/// Drains the shared market event channel, runs detectors, then hands
/// signals to the orchestrator. The only task that mutates ledgers.
pub struct TradingEngine {
    detectors: DetectorSet,
    orchestrator: StrategyOrchestrator,
    events: mpsc::Receiver<MarketEvent>,
    sink: EventSink,
    sweep_interval: StdDuration,
}

impl TradingEngine {
    pub fn new(
        detectors: DetectorSet,
        orchestrator: StrategyOrchestrator,
        events: mpsc::Receiver<MarketEvent>,
        sink: EventSink,
        sweep_interval_secs: u64,
    ) -> Self {
        Self {
            detectors,
            orchestrator,
            events,
            sink,
            sweep_interval: StdDuration::from_secs(sweep_interval_secs),
        }
    }

    pub fn orchestrator(&self) -> &StrategyOrchestrator {
        &self.orchestrator
    }

    /// Run until every event producer has dropped its sender.
    pub async fn run(mut self) {
        let mut sweep = tokio::time::interval(self.sweep_interval);
        sweep.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        info!("Trading engine started");
        loop {
            tokio::select! {
                event = self.events.recv() => {
                    match event {
                        Some(event) => self.handle(event).await,
                        None => {
                            info!("Event channel closed, engine stopping");
                            return;
                        }
                    }
                }
                _ = sweep.tick() => {
                    self.orchestrator.sweep(Utc::now()).await;
                }
            }
        }
    }

    pub async fn handle(&mut self, event: MarketEvent) {
        let now = Utc::now();
        match event {
            MarketEvent::Tick(tick) => {
                let signals = self.detectors.on_tick(&tick, now);
                self.dispatch(signals, now).await;
            }
            MarketEvent::Book(book) => {
                let signals = self.detectors.on_book(&book, now);
                self.orchestrator.on_book(book, now).await;
                self.dispatch(signals, now).await;
            }
            MarketEvent::InstrumentActivated(instrument) => {
                self.detectors.on_instrument_activated(&instrument);
                self.orchestrator.on_instrument_activated(instrument);
            }
            MarketEvent::InstrumentRetired(instrument_id) => {
                self.detectors.purge_instrument(&instrument_id);
                self.orchestrator
                    .on_instrument_retired(&instrument_id, now)
                    .await;
            }
            MarketEvent::OrderUpdate { position_id, result } => {
                self.orchestrator
                    .apply_order_result(position_id, result, now)
                    .await;
            }
        }
    }

    async fn dispatch(&mut self, signals: Vec<Signal>, now: chrono::DateTime<Utc>) {
        if signals.is_empty() {
            return;
        }
        for signal in &signals {
            self.sink.emit(EngineEvent::SignalDetected {
                kind: signal.kind,
                instrument_id: signal
                    .primary_instrument()
                    .unwrap_or_default()
                    .to_string(),
                magnitude: signal.magnitude,
                at: signal.detected_at,
            });
        }
        self.orchestrator.process_signals(signals, now).await;
    }
}
