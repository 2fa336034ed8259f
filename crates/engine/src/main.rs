//! Trading Engine
//!
//! Unattended multi-strategy trading against short-horizon prediction
//! markets: supervised feeds in, signals through the orchestrator, paper
//! execution out.

use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use tokio::sync::mpsc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use detectors::DetectorSet;
use engine_core::config::Config;
use engine_core::events::EventSink;
use engine_core::types::StrategyId;
use market_feed::{
    BookFeed, ConnectionSupervisor, MarketCatalog, PollingFeed, RestDiscovery, TokenRegistry,
    WsFeed,
};
use strategy_engine::{
    CapitalLedger, MakerStrategy, PaperGateway, PatternStrategy, RiskManager,
    SpikeArbStrategy, Strategy, StrategyOrchestrator, SumArbStrategy, TradingEngine,
};

// Jemalloc reduces fragmentation under long-running Tokio workloads.
#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

#[tokio::main]
async fn main() -> Result<()> {
    // Filter out noisy crates by default.
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "engine=info,market_feed=info,strategy_engine=info,detectors=info,tungstenite=warn,hyper=warn"
                    .into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting trading engine");

    let config = Config::from_env()?;
    config.validate()?;

    let sink = EventSink::default();
    let (events_tx, events_rx) = mpsc::channel(1000);

    // Feed supervision: reference feed with a polling fallback, venue book
    // feed without one (the venue REST base serves discovery instead).
    let supervisor = ConnectionSupervisor::new(config.breaker.clone(), sink.clone()).with_timing(
        config.feeds.reconnect_delay_secs,
        config.feeds.poll_interval_ms,
    );
    let reference_feed = Arc::new(WsFeed::new(
        "reference-ws",
        config.feeds.reference_ws_url.clone(),
        "BTCUSDT",
        config.feeds.clone(),
    ));
    let reference_fallback = Arc::new(PollingFeed::new(
        "reference-rest",
        config.feeds.reference_rest_url.clone(),
        "BTCUSDT",
        config.feeds.poll_interval_ms,
    ));
    supervisor.spawn(reference_feed, Some(reference_fallback), events_tx.clone());

    // The catalog keeps the registry pointed at the active token set; the
    // book feed resubscribes whenever it changes.
    let registry = Arc::new(TokenRegistry::new());
    let book_feed = Arc::new(BookFeed::new(
        "venue-books",
        config.feeds.venue_ws_url.clone(),
        Arc::clone(&registry),
    ));
    supervisor.spawn(book_feed, None, events_tx.clone());

    // Market discovery on its own cadence.
    let discovery = Arc::new(RestDiscovery::new(config.catalog.discovery_url.clone()));
    let catalog = MarketCatalog::new(discovery, config.catalog.clone(), events_tx.clone())
        .with_registry(registry);
    tokio::spawn(catalog.run());

    // Registration order fixes the tie-break among equal-priority signals.
    let mut strategies: Vec<Box<dyn Strategy>> = Vec::new();
    for id in [
        StrategyId::SpikeArb,
        StrategyId::SumArb,
        StrategyId::Maker,
        StrategyId::Pattern,
    ] {
        let Some(strategy_config) = config.strategies.get(&id) else {
            continue;
        };
        if !strategy_config.enabled {
            continue;
        }
        strategies.push(match id {
            StrategyId::SpikeArb => Box::new(SpikeArbStrategy::new(strategy_config.clone())),
            StrategyId::SumArb => Box::new(SumArbStrategy::new(strategy_config.clone())),
            StrategyId::Maker => Box::new(MakerStrategy::new(strategy_config.clone())),
            StrategyId::Pattern => Box::new(PatternStrategy::new(strategy_config.clone())),
        });
    }
    info!(strategies = strategies.len(), "Strategies registered");

    let orchestrator = StrategyOrchestrator::new(
        strategies,
        CapitalLedger::new(config.total_capital, config.enabled_allocations())?,
        RiskManager::new(config.risk.clone(), config.strategies.clone(), Utc::now()),
        Arc::new(PaperGateway::new(config.paper_fee_rate)),
        sink.clone(),
    );
    let engine = TradingEngine::new(
        DetectorSet::new(&config.detectors),
        orchestrator,
        events_rx,
        sink,
        config.risk.sweep_interval_secs,
    );

    // Producers hold their own senders; the engine stops when all of them go.
    drop(events_tx);
    engine.run().await;

    Ok(())
}
