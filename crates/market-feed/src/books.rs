//! Venue order-book stream.
//!
//! One WebSocket session subscribes to the market channel for every token
//! the catalog currently tracks. Full book snapshots seed per-token level
//! maps, price-change deltas mutate them, and each update publishes a fresh
//! top-of-book [`OrderBookSnapshot`]. When the catalog's token set changes
//! the session ends cleanly so the next one resubscribes.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use dashmap::DashMap;
use futures_util::{SinkExt, StreamExt};
use rust_decimal::Decimal;
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use engine_core::events::MarketEvent;
use engine_core::types::OrderBookSnapshot;
use engine_core::Result;

use crate::connection::Feed;

/// Token subscription set shared between the catalog (writer) and the book
/// feed (reader). The generation counter lets a live session notice that
/// the set changed and resubscribe.
#[derive(Default)]
pub struct TokenRegistry {
    /// token_id → instrument_id
    tokens: DashMap<String, String>,
    generation: AtomicU64,
}

impl TokenRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    pub fn snapshot(&self) -> Vec<String> {
        let mut tokens: Vec<String> = self.tokens.iter().map(|e| e.key().clone()).collect();
        tokens.sort();
        tokens
    }

    pub fn instrument_for(&self, token_id: &str) -> Option<String> {
        self.tokens.get(token_id).map(|e| e.value().clone())
    }

    /// Replace the full token set. Bumps the generation only on change.
    pub fn reconcile(&self, entries: &[(String, String)]) {
        let mut changed = false;
        for (token_id, instrument_id) in entries {
            if self
                .tokens
                .insert(token_id.clone(), instrument_id.clone())
                .as_deref()
                != Some(instrument_id)
            {
                changed = true;
            }
        }
        let keep: std::collections::HashSet<&str> =
            entries.iter().map(|(t, _)| t.as_str()).collect();
        let before = self.tokens.len();
        self.tokens.retain(|token_id, _| keep.contains(token_id.as_str()));
        if self.tokens.len() != before {
            changed = true;
        }
        if changed {
            self.generation.fetch_add(1, Ordering::AcqRel);
        }
    }
}

const READ_TIMEOUT: StdDuration = StdDuration::from_secs(120);
const PING_INTERVAL: StdDuration = StdDuration::from_secs(10);
const RESUBSCRIBE_POLL: StdDuration = StdDuration::from_secs(2);
const EMPTY_SET_BACKOFF: StdDuration = StdDuration::from_secs(1);

/// WebSocket book source for the venue's market channel.
pub struct BookFeed {
    name: String,
    ws_url: String,
    registry: Arc<TokenRegistry>,
}

impl BookFeed {
    pub fn new(
        name: impl Into<String>,
        ws_url: impl Into<String>,
        registry: Arc<TokenRegistry>,
    ) -> Self {
        Self {
            name: name.into(),
            ws_url: ws_url.into(),
            registry,
        }
    }
}

#[async_trait]
impl Feed for BookFeed {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run_session(&self, tx: &mpsc::Sender<MarketEvent>) -> Result<()> {
        let generation = self.registry.generation();
        let tokens = self.registry.snapshot();
        if tokens.is_empty() {
            // Nothing to subscribe to yet; come back once the catalog has
            // activated instruments.
            tokio::time::sleep(EMPTY_SET_BACKOFF).await;
            return Ok(());
        }

        let (ws_stream, _) = connect_async(&self.ws_url).await?;
        let (mut write, mut read) = ws_stream.split();

        let subscribe = serde_json::json!({
            "type": "market",
            "assets_ids": tokens,
        });
        write.send(Message::Text(subscribe.to_string())).await?;
        info!(feed = %self.name, assets = tokens.len(), "Subscribed to book channel");

        let mut books = BookState::default();
        let mut ping_tick = tokio::time::interval(PING_INTERVAL);
        ping_tick.tick().await;
        let mut resub_tick = tokio::time::interval(RESUBSCRIBE_POLL);
        resub_tick.tick().await;
        // The deadline resets only on received frames, so an idle server
        // actually trips it.
        let read_deadline = tokio::time::sleep(READ_TIMEOUT);
        tokio::pin!(read_deadline);

        loop {
            tokio::select! {
                _ = ping_tick.tick() => {
                    write.send(Message::Text("PING".to_string())).await?;
                }
                _ = resub_tick.tick() => {
                    if self.registry.generation() != generation {
                        info!(feed = %self.name, "Token set changed, resubscribing");
                        return Ok(());
                    }
                }
                _ = &mut read_deadline => {
                    return Err(engine_core::Error::connection(format!(
                        "{}: no frames for {}s",
                        self.name,
                        READ_TIMEOUT.as_secs()
                    )));
                }
                msg = read.next() => {
                    read_deadline
                        .as_mut()
                        .reset(tokio::time::Instant::now() + READ_TIMEOUT);
                    let msg = match msg {
                        Some(msg) => msg,
                        None => {
                            warn!(feed = %self.name, "Book stream ended");
                            return Ok(());
                        }
                    };
                    match msg {
                        Ok(Message::Text(text)) => {
                            for snapshot in books.apply_frame(&text, &self.registry) {
                                if tx.send(MarketEvent::Book(snapshot)).await.is_err() {
                                    warn!(feed = %self.name, "Receiver dropped, closing book stream");
                                    return Ok(());
                                }
                            }
                        }
                        Ok(Message::Ping(data)) => {
                            write.send(Message::Pong(data)).await?;
                        }
                        Ok(Message::Pong(_)) => {
                            debug!(feed = %self.name, "Received websocket pong");
                        }
                        Ok(Message::Close(_)) => {
                            info!(feed = %self.name, "Book stream closed by server");
                            return Ok(());
                        }
                        Ok(_) => {}
                        Err(e) => return Err(e.into()),
                    }
                }
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct WsBook {
    market: String,
    asset_id: String,
    #[serde(default, alias = "buys")]
    bids: Vec<WsLevel>,
    #[serde(default, alias = "sells")]
    asks: Vec<WsLevel>,
    #[serde(default)]
    timestamp: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WsLevel {
    price: String,
    size: String,
}

#[derive(Debug, Deserialize)]
struct WsPriceChangeEvent {
    market: String,
    #[serde(default)]
    price_changes: Vec<WsPriceChange>,
    #[serde(default)]
    timestamp: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WsPriceChange {
    asset_id: String,
    price: String,
    size: String,
    side: String,
}

/// Per-token price levels, keyed by price for cheap top-of-book reads.
#[derive(Default)]
struct TokenBook {
    instrument_id: String,
    bids: BTreeMap<Decimal, Decimal>,
    asks: BTreeMap<Decimal, Decimal>,
}

impl TokenBook {
    fn top(&self, token_id: &str, timestamp: DateTime<Utc>) -> OrderBookSnapshot {
        let (best_bid, bid_size) = self
            .bids
            .last_key_value()
            .map(|(p, s)| (Some(*p), *s))
            .unwrap_or((None, Decimal::ZERO));
        let (best_ask, ask_size) = self
            .asks
            .first_key_value()
            .map(|(p, s)| (Some(*p), *s))
            .unwrap_or((None, Decimal::ZERO));
        OrderBookSnapshot {
            instrument_id: self.instrument_id.clone(),
            token_id: token_id.to_string(),
            best_bid,
            best_ask,
            bid_size,
            ask_size,
            timestamp,
        }
    }
}

#[derive(Default)]
struct BookState {
    by_token: HashMap<String, TokenBook>,
}

impl BookState {
    /// Parse one text frame and return the top-of-book snapshots it changed.
    fn apply_frame(&mut self, text: &str, registry: &TokenRegistry) -> Vec<OrderBookSnapshot> {
        let trimmed = text.trim();
        if trimmed.eq_ignore_ascii_case("PONG") || trimmed.eq_ignore_ascii_case("PING") {
            return Vec::new();
        }
        if trimmed.eq_ignore_ascii_case("INVALID OPERATION") {
            warn!("Received INVALID OPERATION from book websocket");
            return Vec::new();
        }
        let value: serde_json::Value = match serde_json::from_str(trimmed) {
            Ok(value) => value,
            Err(e) => {
                debug!(error = %e, "Unparseable book frame");
                return Vec::new();
            }
        };
        match value {
            serde_json::Value::Array(items) => items
                .into_iter()
                .flat_map(|item| self.apply_value(item, registry))
                .collect(),
            serde_json::Value::Object(_) => self.apply_value(value, registry),
            _ => Vec::new(),
        }
    }

    /// `last_trade_price` and `tick_size_change` frames share fields with
    /// the book shapes, so dispatch strictly on `event_type`.
    fn apply_value(
        &mut self,
        value: serde_json::Value,
        registry: &TokenRegistry,
    ) -> Vec<OrderBookSnapshot> {
        let event_type = value
            .get("event_type")
            .and_then(|v| v.as_str())
            .map(str::to_owned);
        match event_type.as_deref() {
            Some("book") => match serde_json::from_value::<WsBook>(value) {
                Ok(book) => vec![self.apply_book(book, registry)],
                Err(e) => {
                    debug!(error = %e, "Malformed book frame");
                    Vec::new()
                }
            },
            Some("price_change") => match serde_json::from_value::<WsPriceChangeEvent>(value) {
                Ok(event) => self.apply_price_changes(event, registry),
                Err(e) => {
                    debug!(error = %e, "Malformed price_change frame");
                    Vec::new()
                }
            },
            _ => Vec::new(),
        }
    }

    fn apply_book(&mut self, book: WsBook, registry: &TokenRegistry) -> OrderBookSnapshot {
        let instrument_id = registry
            .instrument_for(&book.asset_id)
            .unwrap_or(book.market);
        let timestamp = parse_ws_timestamp(book.timestamp.as_deref());
        let entry = self.by_token.entry(book.asset_id.clone()).or_default();
        entry.instrument_id = instrument_id;
        entry.bids = parse_levels(book.bids);
        entry.asks = parse_levels(book.asks);
        entry.top(&book.asset_id, timestamp)
    }

    fn apply_price_changes(
        &mut self,
        event: WsPriceChangeEvent,
        registry: &TokenRegistry,
    ) -> Vec<OrderBookSnapshot> {
        let timestamp = parse_ws_timestamp(event.timestamp.as_deref());
        let mut touched: Vec<String> = Vec::new();
        for change in event.price_changes {
            let (Ok(price), Ok(size)) =
                (change.price.parse::<Decimal>(), change.size.parse::<Decimal>())
            else {
                continue;
            };
            let entry = self.by_token.entry(change.asset_id.clone()).or_default();
            if entry.instrument_id.is_empty() {
                entry.instrument_id = registry
                    .instrument_for(&change.asset_id)
                    .unwrap_or_else(|| event.market.clone());
            }
            let side = if change.side.eq_ignore_ascii_case("BUY") {
                &mut entry.bids
            } else {
                &mut entry.asks
            };
            // Size zero deletes the level.
            if size.is_zero() {
                side.remove(&price);
            } else {
                side.insert(price, size);
            }
            if !touched.contains(&change.asset_id) {
                touched.push(change.asset_id);
            }
        }
        // One snapshot per token the batch touched.
        touched
            .iter()
            .filter_map(|token_id| {
                self.by_token
                    .get(token_id)
                    .map(|book| book.top(token_id, timestamp))
            })
            .collect()
    }
}

fn parse_levels(levels: Vec<WsLevel>) -> BTreeMap<Decimal, Decimal> {
    levels
        .into_iter()
        .filter_map(|l| {
            let price = l.price.parse::<Decimal>().ok()?;
            let size = l.size.parse::<Decimal>().ok()?;
            if size.is_zero() {
                return None;
            }
            Some((price, size))
        })
        .collect()
}

/// Venue timestamps arrive as millisecond strings.
fn parse_ws_timestamp(raw: Option<&str>) -> DateTime<Utc> {
    raw.and_then(|s| s.parse::<i64>().ok())
        .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
        .unwrap_or_else(Utc::now)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> TokenRegistry {
        let registry = TokenRegistry::new();
        registry.reconcile(&[
            ("tok-yes".to_string(), "mkt-1".to_string()),
            ("tok-no".to_string(), "mkt-1".to_string()),
        ]);
        registry
    }

    #[test]
    fn full_book_snapshot_yields_top_of_book() {
        let registry = registry();
        let mut state = BookState::default();
        let frame = r#"{
            "event_type": "book",
            "market": "mkt-1",
            "asset_id": "tok-yes",
            "bids": [{"price": "0.48", "size": "100"}, {"price": "0.50", "size": "40"}],
            "asks": [{"price": "0.55", "size": "60"}, {"price": "0.53", "size": "20"}],
            "timestamp": "1700000000000"
        }"#;

        let snapshots = state.apply_frame(frame, &registry);
        assert_eq!(snapshots.len(), 1);
        let book = &snapshots[0];
        assert_eq!(book.instrument_id, "mkt-1");
        assert_eq!(book.token_id, "tok-yes");
        assert_eq!(book.best_bid, Some(Decimal::new(50, 2)));
        assert_eq!(book.best_ask, Some(Decimal::new(53, 2)));
        assert_eq!(book.bid_size, Decimal::new(40, 0));
        assert_eq!(book.ask_size, Decimal::new(20, 0));
    }

    #[test]
    fn price_change_moves_the_top() {
        let registry = registry();
        let mut state = BookState::default();
        state.apply_frame(
            r#"{
                "event_type": "book",
                "market": "mkt-1",
                "asset_id": "tok-yes",
                "bids": [{"price": "0.50", "size": "40"}],
                "asks": [{"price": "0.53", "size": "20"}],
                "timestamp": "1700000000000"
            }"#,
            &registry,
        );

        // A better bid arrives, then the best ask is pulled.
        let snapshots = state.apply_frame(
            r#"{
                "event_type": "price_change",
                "market": "mkt-1",
                "price_changes": [
                    {"asset_id": "tok-yes", "price": "0.51", "size": "10", "side": "BUY"},
                    {"asset_id": "tok-yes", "price": "0.53", "size": "0", "side": "SELL"}
                ]
            }"#,
            &registry,
        );
        assert_eq!(snapshots.len(), 1);
        let book = &snapshots[0];
        assert_eq!(book.best_bid, Some(Decimal::new(51, 2)));
        assert_eq!(book.best_ask, None);
    }

    #[test]
    fn delta_batch_publishes_every_touched_token() {
        let registry = registry();
        let mut state = BookState::default();
        let snapshots = state.apply_frame(
            r#"{
                "event_type": "price_change",
                "market": "mkt-1",
                "price_changes": [
                    {"asset_id": "tok-yes", "price": "0.52", "size": "10", "side": "SELL"},
                    {"asset_id": "tok-no", "price": "0.46", "size": "15", "side": "SELL"},
                    {"asset_id": "tok-yes", "price": "0.50", "size": "30", "side": "BUY"}
                ]
            }"#,
            &registry,
        );

        assert_eq!(snapshots.len(), 2);
        let yes = snapshots.iter().find(|s| s.token_id == "tok-yes").unwrap();
        assert_eq!(yes.best_bid, Some(Decimal::new(50, 2)));
        assert_eq!(yes.best_ask, Some(Decimal::new(52, 2)));
        let no = snapshots.iter().find(|s| s.token_id == "tok-no").unwrap();
        assert_eq!(no.best_ask, Some(Decimal::new(46, 2)));
        assert_eq!(no.instrument_id, "mkt-1");
    }

    #[test]
    fn trade_and_tick_size_frames_leave_levels_alone() {
        let registry = registry();
        let mut state = BookState::default();
        state.apply_frame(
            r#"{
                "event_type": "book",
                "market": "mkt-1",
                "asset_id": "tok-yes",
                "bids": [{"price": "0.50", "size": "40"}],
                "asks": [{"price": "0.53", "size": "20"}],
                "timestamp": "1700000000000"
            }"#,
            &registry,
        );

        // These share market/asset_id fields with book frames but carry no
        // levels; treating them as books would wipe the maps.
        let trade = r#"{
            "event_type": "last_trade_price",
            "market": "mkt-1",
            "asset_id": "tok-yes",
            "price": "0.52",
            "timestamp": "1700000000500"
        }"#;
        let tick_size = r#"{
            "event_type": "tick_size_change",
            "market": "mkt-1",
            "asset_id": "tok-yes",
            "old_tick_size": "0.01",
            "new_tick_size": "0.001"
        }"#;
        assert!(state.apply_frame(trade, &registry).is_empty());
        assert!(state.apply_frame(tick_size, &registry).is_empty());

        let book = state.by_token.get("tok-yes").unwrap();
        assert_eq!(book.bids.len(), 1);
        assert_eq!(book.asks.len(), 1);
    }

    #[test]
    fn control_frames_are_ignored() {
        let registry = registry();
        let mut state = BookState::default();
        assert!(state.apply_frame("PONG", &registry).is_empty());
        assert!(state.apply_frame("INVALID OPERATION", &registry).is_empty());
        assert!(state.apply_frame("not json", &registry).is_empty());
    }

    #[test]
    fn reconcile_bumps_generation_only_on_change() {
        let registry = TokenRegistry::new();
        let entries = vec![("tok-yes".to_string(), "mkt-1".to_string())];
        registry.reconcile(&entries);
        let generation = registry.generation();

        registry.reconcile(&entries);
        assert_eq!(registry.generation(), generation);

        registry.reconcile(&[]);
        assert!(registry.generation() > generation);
        assert!(registry.snapshot().is_empty());
    }
}
