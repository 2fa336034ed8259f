//! Feed connections: WebSocket sessions and the REST polling fallback.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use futures_util::{SinkExt, StreamExt};
use rust_decimal::Decimal;
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use engine_core::config::FeedConfig;
use engine_core::events::MarketEvent;
use engine_core::types::Tick;
use engine_core::{Error, Result};

/// A source of market events for one connection. Implementations stream
/// into the supplied channel for the duration of a session; the supervisor
/// decides when a new session starts and which source is live.
#[async_trait]
pub trait Feed: Send + Sync {
    fn name(&self) -> &str;

    /// Run one session: connect, forward events into `tx`, return when the
    /// session ends. A clean server close or a dropped receiver is `Ok`;
    /// anything else is the session's failure.
    async fn run_session(&self, tx: &mpsc::Sender<MarketEvent>) -> Result<()>;
}

/// WebSocket tick source. Handles both the venue's `{"price": .., "t": ..}`
/// frames and exchange trade frames of the `{"p": "..", "T": ..}` shape.
pub struct WsFeed {
    name: String,
    ws_url: String,
    instrument_id: String,
    config: FeedConfig,
    sequence: AtomicU64,
}

impl WsFeed {
    pub fn new(
        name: impl Into<String>,
        ws_url: impl Into<String>,
        instrument_id: impl Into<String>,
        config: FeedConfig,
    ) -> Self {
        Self {
            name: name.into(),
            ws_url: ws_url.into(),
            instrument_id: instrument_id.into(),
            config,
            sequence: AtomicU64::new(0),
        }
    }

    async fn connect_with_retry(
        &self,
    ) -> Result<tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>>
    {
        let mut attempt: u32 = 0;
        loop {
            match connect_async(&self.ws_url).await {
                Ok((stream, _)) => {
                    info!(feed = %self.name, url = %self.ws_url, "WebSocket connected");
                    return Ok(stream);
                }
                Err(e) => {
                    attempt += 1;
                    if attempt >= self.config.max_connect_attempts {
                        return Err(Error::connection(format!(
                            "{}: gave up after {} connect attempts: {}",
                            self.name, attempt, e
                        )));
                    }
                    let delay_secs = std::cmp::min(
                        self.config
                            .reconnect_delay_secs
                            .saturating_mul(2u64.saturating_pow(attempt - 1)),
                        60,
                    );
                    warn!(
                        feed = %self.name,
                        attempt = attempt,
                        delay_secs = delay_secs,
                        error = %e,
                        "WebSocket connect failed, retrying"
                    );
                    tokio::time::sleep(StdDuration::from_secs(delay_secs)).await;
                }
            }
        }
    }
}

#[async_trait]
impl Feed for WsFeed {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run_session(&self, tx: &mpsc::Sender<MarketEvent>) -> Result<()> {
        let ws_stream = self.connect_with_retry().await?;
        let (mut write, mut read) = ws_stream.split();

        let read_timeout = StdDuration::from_secs(60);
        loop {
            let msg = match tokio::time::timeout(read_timeout, read.next()).await {
                Ok(Some(msg)) => msg,
                Ok(None) => {
                    warn!(feed = %self.name, "WebSocket stream ended");
                    return Ok(());
                }
                Err(_) => {
                    return Err(Error::connection(format!(
                        "{}: no frames for {}s",
                        self.name,
                        read_timeout.as_secs()
                    )));
                }
            };

            match msg {
                Ok(Message::Text(text)) => {
                    let seq = self.sequence.fetch_add(1, Ordering::Relaxed);
                    if let Some(tick) = parse_tick(&text, &self.instrument_id, seq) {
                        if tx.send(MarketEvent::Tick(tick)).await.is_err() {
                            warn!(feed = %self.name, "Receiver dropped, closing WebSocket");
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
                    info!(feed = %self.name, "WebSocket closed by server");
                    return Ok(());
                }
                Ok(_) => {}
                Err(e) => return Err(e.into()),
            }
        }
    }
}

/// One-shot price fetch, used by the supervisor to keep a degraded stream
/// flowing while a primary feed's breaker is open.
#[async_trait]
pub trait FallbackPoll: Send + Sync {
    fn name(&self) -> &str;

    async fn poll_once(&self) -> Result<Tick>;
}

/// REST polling fallback. Slower and coarser than the WebSocket, but keeps
/// a degraded price stream alive while the primary connection's breaker is
/// open.
pub struct PollingFeed {
    name: String,
    url: String,
    instrument_id: String,
    poll_interval: StdDuration,
    client: reqwest::Client,
    sequence: AtomicU64,
}

impl PollingFeed {
    pub fn new(
        name: impl Into<String>,
        url: impl Into<String>,
        instrument_id: impl Into<String>,
        poll_interval_ms: u64,
    ) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            instrument_id: instrument_id.into(),
            poll_interval: StdDuration::from_millis(poll_interval_ms),
            client: reqwest::Client::new(),
            sequence: AtomicU64::new(0),
        }
    }

    async fn fetch(&self) -> Result<Tick> {
        let body: serde_json::Value = self
            .client
            .get(&self.url)
            .send()
            .await?
            .error_for_status()
            .map_err(|e| Error::connection(format!("{}: poll failed: {}", self.name, e)))?
            .json()
            .await?;
        let seq = self.sequence.fetch_add(1, Ordering::Relaxed);
        tick_from_value(&body, &self.instrument_id, seq).ok_or_else(|| {
            Error::connection(format!("{}: poll response had no price field", self.name))
        })
    }
}

#[async_trait]
impl FallbackPoll for PollingFeed {
    fn name(&self) -> &str {
        &self.name
    }

    async fn poll_once(&self) -> Result<Tick> {
        self.fetch().await
    }
}

#[async_trait]
impl Feed for PollingFeed {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run_session(&self, tx: &mpsc::Sender<MarketEvent>) -> Result<()> {
        let mut interval = tokio::time::interval(self.poll_interval);
        loop {
            interval.tick().await;
            if tx.is_closed() {
                return Ok(());
            }
            let tick = self.fetch().await?;
            if tx.send(MarketEvent::Tick(tick)).await.is_err() {
                return Ok(());
            }
        }
    }
}

fn parse_tick(text: &str, instrument_id: &str, sequence: u64) -> Option<Tick> {
    let value: serde_json::Value = serde_json::from_str(text).ok()?;
    tick_from_value(&value, instrument_id, sequence)
}

fn tick_from_value(value: &serde_json::Value, instrument_id: &str, sequence: u64) -> Option<Tick> {
    let price = decimal_field(value, "price").or_else(|| decimal_field(value, "p"))?;
    let timestamp = millis_field(value, "t")
        .or_else(|| millis_field(value, "T"))
        .unwrap_or_else(Utc::now);
    Some(Tick {
        instrument_id: instrument_id.to_string(),
        price,
        timestamp,
        sequence,
    })
}

// Price fields arrive as JSON numbers from some venues and as strings from
// others; accept both.
fn decimal_field(value: &serde_json::Value, key: &str) -> Option<Decimal> {
    match value.get(key)? {
        serde_json::Value::String(s) => s.parse().ok(),
        other => other.to_string().parse().ok(),
    }
}

fn millis_field(value: &serde_json::Value, key: &str) -> Option<DateTime<Utc>> {
    let ms = value.get(key)?.as_i64()?;
    Utc.timestamp_millis_opt(ms).single()
}
