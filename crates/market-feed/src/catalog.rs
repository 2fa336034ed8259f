//! Market discovery and the active instrument catalog.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use engine_core::config::CatalogConfig;
use engine_core::events::MarketEvent;
use engine_core::types::{Instrument, OutcomeToken};
use engine_core::Result;

use crate::books::TokenRegistry;

/// Source of tradable market descriptors.
#[async_trait]
pub trait Discovery: Send + Sync {
    async fn fetch_markets(&self) -> Result<Vec<Instrument>>;
}

/// REST discovery against the venue's paginated markets endpoint.
pub struct RestDiscovery {
    base_url: String,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct MarketsResponse {
    data: Vec<MarketDescriptor>,
    next_cursor: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MarketDescriptor {
    condition_id: String,
    question: String,
    #[serde(default)]
    category: String,
    end_date_iso: Option<DateTime<Utc>>,
    #[serde(default)]
    tokens: Vec<TokenDescriptor>,
    #[serde(default)]
    active: bool,
    #[serde(default)]
    closed: bool,
}

#[derive(Debug, Deserialize)]
struct TokenDescriptor {
    token_id: String,
    outcome: String,
}

impl RestDiscovery {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl Discovery for RestDiscovery {
    async fn fetch_markets(&self) -> Result<Vec<Instrument>> {
        let mut instruments = Vec::new();
        let mut cursor: Option<String> = None;
        let mut pages = 0u32;

        loop {
            let url = match &cursor {
                Some(c) => format!("{}/markets?active=true&next_cursor={}", self.base_url, c),
                None => format!("{}/markets?active=true", self.base_url),
            };
            let page: MarketsResponse = self
                .client
                .get(&url)
                .send()
                .await?
                .error_for_status()?
                .json()
                .await?;
            pages += 1;

            for market in page.data {
                if !market.active || market.closed {
                    continue;
                }
                let Some(expiry_time) = market.end_date_iso else {
                    continue;
                };
                instruments.push(Instrument {
                    id: market.condition_id,
                    question: market.question,
                    category: market.category,
                    expiry_time,
                    outcomes: market
                        .tokens
                        .into_iter()
                        .map(|t| OutcomeToken {
                            token_id: t.token_id,
                            name: t.outcome,
                        })
                        .collect(),
                });
            }

            match page.next_cursor {
                Some(c) if !c.is_empty() && c != "LTE=" => cursor = Some(c),
                _ => break,
            }
            // Safety valve against runaway pagination.
            if pages >= 50 {
                warn!(pages, "Market pagination safety limit reached");
                break;
            }
        }

        info!(total = instruments.len(), pages, "Fetched active markets");
        Ok(instruments)
    }
}

/// Active instrument set, reconciled against discovery on a fixed cadence.
///
/// Activations and retirements are published as [`MarketEvent`]s on the
/// shared engine stream. A failed discovery poll keeps the previous active
/// set untouched so the engine keeps trading on last-known-good markets.
pub struct MarketCatalog {
    discovery: Arc<dyn Discovery>,
    config: CatalogConfig,
    events: mpsc::Sender<MarketEvent>,
    active: HashMap<String, Instrument>,
    registry: Option<Arc<TokenRegistry>>,
}

impl MarketCatalog {
    pub fn new(
        discovery: Arc<dyn Discovery>,
        config: CatalogConfig,
        events: mpsc::Sender<MarketEvent>,
    ) -> Self {
        Self {
            discovery,
            config,
            events,
            active: HashMap::new(),
            registry: None,
        }
    }

    /// Keep a token registry in sync with the active set, for the book feed.
    pub fn with_registry(mut self, registry: Arc<TokenRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn active_instruments(&self) -> Vec<Instrument> {
        self.active.values().cloned().collect()
    }

    fn is_eligible(&self, instrument: &Instrument, now: DateTime<Utc>) -> bool {
        if !instrument.is_binary() {
            return false;
        }
        if instrument.time_to_expiry_secs(now) < self.config.min_time_remaining_secs {
            return false;
        }
        let haystack = format!(
            "{} {}",
            instrument.question.to_lowercase(),
            instrument.category.to_lowercase()
        );
        if self
            .config
            .exclude_keywords
            .iter()
            .any(|k| haystack.contains(&k.to_lowercase()))
        {
            return false;
        }
        self.config
            .categories
            .iter()
            .any(|k| haystack.contains(&k.to_lowercase()))
    }

    /// One reconciliation pass against discovery.
    pub async fn refresh(&mut self, now: DateTime<Utc>) {
        let discovered = match self.discovery.fetch_markets().await {
            Ok(markets) => markets,
            Err(e) => {
                warn!(error = %e, "Discovery poll failed, keeping previous active set");
                return;
            }
        };

        let mut eligible: Vec<Instrument> = discovered
            .into_iter()
            .filter(|i| self.is_eligible(i, now))
            .collect();
        // Nearest expiries first, capped at the configured instrument count.
        eligible.sort_by_key(|i| i.expiry_time);
        eligible.truncate(self.config.max_instruments);

        let next: HashMap<String, Instrument> =
            eligible.into_iter().map(|i| (i.id.clone(), i)).collect();

        if let Some(registry) = &self.registry {
            let entries: Vec<(String, String)> = next
                .values()
                .flat_map(|i| {
                    i.outcomes
                        .iter()
                        .map(|t| (t.token_id.clone(), i.id.clone()))
                })
                .collect();
            registry.reconcile(&entries);
        }

        let retired: Vec<String> = self
            .active
            .keys()
            .filter(|id| !next.contains_key(*id))
            .cloned()
            .collect();
        for id in retired {
            self.active.remove(&id);
            info!(instrument = %id, "Instrument retired");
            if self
                .events
                .send(MarketEvent::InstrumentRetired(id))
                .await
                .is_err()
            {
                return;
            }
        }

        for (id, instrument) in next {
            if self.active.contains_key(&id) {
                continue;
            }
            info!(
                instrument = %id,
                question = %instrument.question,
                expires_in_secs = instrument.time_to_expiry_secs(now),
                "Instrument activated"
            );
            self.active.insert(id, instrument.clone());
            if self
                .events
                .send(MarketEvent::InstrumentActivated(instrument))
                .await
                .is_err()
            {
                return;
            }
        }
        debug!(active = self.active.len(), "Catalog refreshed");
    }

    /// Refresh loop. Exits when the event channel closes.
    pub async fn run(mut self) {
        let mut interval =
            tokio::time::interval(StdDuration::from_secs(self.config.refresh_interval_secs));
        loop {
            interval.tick().await;
            if self.events.is_closed() {
                return;
            }
            self.refresh(Utc::now()).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use engine_core::Error;
    use std::sync::Mutex;

    struct ScriptedDiscovery {
        responses: Mutex<Vec<Result<Vec<Instrument>>>>,
    }

    impl ScriptedDiscovery {
        fn new(responses: Vec<Result<Vec<Instrument>>>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses),
            })
        }
    }

    #[async_trait]
    impl Discovery for ScriptedDiscovery {
        async fn fetch_markets(&self) -> Result<Vec<Instrument>> {
            let mut responses = self.responses.lock().unwrap();
            if responses.is_empty() {
                return Ok(Vec::new());
            }
            responses.remove(0)
        }
    }

    fn test_config() -> CatalogConfig {
        CatalogConfig {
            discovery_url: "http://localhost".to_string(),
            refresh_interval_secs: 10,
            categories: vec!["btc".to_string(), "5min".to_string()],
            exclude_keywords: vec!["election".to_string()],
            min_time_remaining_secs: 120,
            max_instruments: 25,
        }
    }

    fn instrument(id: &str, question: &str, expires_in: Duration, now: DateTime<Utc>) -> Instrument {
        Instrument {
            id: id.to_string(),
            question: question.to_string(),
            category: "crypto".to_string(),
            expiry_time: now + expires_in,
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

    #[tokio::test]
    async fn activates_matching_instruments_and_filters_the_rest() {
        let now = Utc::now();
        let discovery = ScriptedDiscovery::new(vec![Ok(vec![
            instrument("mkt-1", "BTC above 100k in 5min?", Duration::minutes(5), now),
            // Below the minimum time remaining.
            instrument("mkt-2", "BTC above 100k soon?", Duration::seconds(60), now),
            // No category keyword match.
            instrument("mkt-3", "Will it rain tomorrow?", Duration::hours(1), now),
            // Excluded keyword.
            instrument("mkt-4", "BTC election special", Duration::hours(1), now),
        ])]);
        let (tx, mut rx) = mpsc::channel(16);
        let mut catalog = MarketCatalog::new(discovery, test_config(), tx);

        catalog.refresh(now).await;

        assert_eq!(catalog.active_instruments().len(), 1);
        match rx.recv().await.unwrap() {
            MarketEvent::InstrumentActivated(i) => assert_eq!(i.id, "mkt-1"),
            other => panic!("unexpected event: {:?}", other),
        }
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn disappeared_instrument_is_retired() {
        let now = Utc::now();
        let market = instrument("mkt-1", "BTC 5min up?", Duration::minutes(10), now);
        let discovery = ScriptedDiscovery::new(vec![Ok(vec![market]), Ok(vec![])]);
        let (tx, mut rx) = mpsc::channel(16);
        let mut catalog = MarketCatalog::new(discovery, test_config(), tx);

        catalog.refresh(now).await;
        let _ = rx.recv().await; // activation
        catalog.refresh(now).await;

        match rx.recv().await.unwrap() {
            MarketEvent::InstrumentRetired(id) => assert_eq!(id, "mkt-1"),
            other => panic!("unexpected event: {:?}", other),
        }
        assert!(catalog.active_instruments().is_empty());
    }

    #[tokio::test]
    async fn failed_poll_keeps_previous_active_set() {
        let now = Utc::now();
        let market = instrument("mkt-1", "BTC 5min up?", Duration::minutes(10), now);
        let discovery = ScriptedDiscovery::new(vec![
            Ok(vec![market]),
            Err(Error::connection("discovery down")),
        ]);
        let (tx, mut rx) = mpsc::channel(16);
        let mut catalog = MarketCatalog::new(discovery, test_config(), tx);

        catalog.refresh(now).await;
        let _ = rx.recv().await;
        catalog.refresh(now).await;

        assert_eq!(catalog.active_instruments().len(), 1);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn registry_tracks_active_tokens() {
        let now = Utc::now();
        let market = instrument("mkt-1", "BTC 5min up?", Duration::minutes(10), now);
        let discovery = ScriptedDiscovery::new(vec![Ok(vec![market]), Ok(vec![])]);
        let registry = Arc::new(TokenRegistry::new());
        let (tx, _rx) = mpsc::channel(16);
        let mut catalog = MarketCatalog::new(discovery, test_config(), tx)
            .with_registry(Arc::clone(&registry));

        catalog.refresh(now).await;
        assert_eq!(registry.snapshot(), vec!["mkt-1-no", "mkt-1-yes"]);
        assert_eq!(registry.instrument_for("mkt-1-yes").as_deref(), Some("mkt-1"));

        catalog.refresh(now).await;
        assert!(registry.snapshot().is_empty());
    }

    #[tokio::test]
    async fn caps_active_set_to_nearest_expiries() {
        let now = Utc::now();
        let mut config = test_config();
        config.max_instruments = 2;
        let discovery = ScriptedDiscovery::new(vec![Ok(vec![
            instrument("far", "BTC hourly", Duration::hours(4), now),
            instrument("near", "BTC 5min", Duration::minutes(5), now),
            instrument("mid", "BTC hourly", Duration::hours(1), now),
        ])]);
        let (tx, _rx) = mpsc::channel(16);
        let mut catalog = MarketCatalog::new(discovery, config, tx);

        catalog.refresh(now).await;

        let mut ids: Vec<String> = catalog
            .active_instruments()
            .into_iter()
            .map(|i| i.id)
            .collect();
        ids.sort();
        assert_eq!(ids, vec!["mid".to_string(), "near".to_string()]);
    }
}
