// =============================================================================
// Streaming Client — multiplexed real-time bars over one shared transport
// =============================================================================
//
// One WebSocket connection to the tick-data service serves every chart on
// screen. Subscriptions are multiplexed per (symbol, resolution) channel: the
// wire only ever carries one symbol-level subscribe no matter how many
// resolutions or subscribers reference the symbol. Incoming trades are folded
// into the channel's last bar immediately, but delivery to subscribers is
// batched through a 100 ms flush loop so the UI repaint rate is decoupled
// from the tick arrival rate (at most one callback per channel per flush).
//
// Connection lifecycle: disconnected → connecting → open. A dropped
// connection reconnects with exponential backoff, capped at 20 attempts;
// intentional teardown bumps a generation counter so the close path cannot be
// mistaken for a drop.
// =============================================================================

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

use super::bar::{apply_trade, Bar, Resolution};

/// Pending-update drain cadence.
pub const FLUSH_INTERVAL_MS: u64 = 100;
/// Keepalive ping cadence.
pub const KEEPALIVE_INTERVAL_MS: u64 = 30_000;
/// Reconnects stop after this many consecutive failed attempts.
pub const MAX_RECONNECT_ATTEMPTS: u32 = 20;

/// Callback invoked with a snapshot copy of the latest bar on each flush.
pub type BarHandler = Arc<dyn Fn(Bar) + Send + Sync>;

// ---------------------------------------------------------------------------
// Wire frames
// ---------------------------------------------------------------------------

/// Frames the client writes to the tick-data service.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum OutboundFrame {
    Subscribe { symbols: Vec<String> },
    Unsubscribe { symbols: Vec<String> },
    Ping,
}

/// Frames the service pushes to the client. Everything except trades is
/// ignored.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum InboundFrame {
    Trade { data: TradeEvent },
    #[serde(other)]
    Other,
}

/// A single trade tick.
#[derive(Debug, Clone, Deserialize)]
pub struct TradeEvent {
    pub symbol: String,
    pub price: f64,
    #[serde(default)]
    pub size: f64,
    pub timestamp: TradeTime,
}

/// The service has emitted trade timestamps both as epoch-ms numbers and as
/// RFC 3339 strings; accept either.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum TradeTime {
    Millis(i64),
    Text(String),
}

impl TradeTime {
    pub fn as_millis(&self) -> Option<i64> {
        match self {
            TradeTime::Millis(ms) => Some(*ms),
            TradeTime::Text(s) => chrono::DateTime::parse_from_rfc3339(s)
                .ok()
                .map(|dt| dt.timestamp_millis()),
        }
    }
}

// ---------------------------------------------------------------------------
// Channel table
// ---------------------------------------------------------------------------

/// Composite key that identifies a unique bar channel.
#[derive(Debug, Clone, Hash, Eq, PartialEq)]
pub struct ChannelKey {
    pub symbol: String,
    pub resolution: Resolution,
}

impl std::fmt::Display for ChannelKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.symbol, self.resolution)
    }
}

struct Channel {
    symbol: String,
    resolution: Resolution,
    last_bar: Option<Bar>,
    handlers: HashMap<String, BarHandler>,
}

/// Wire effect of a subscribe call.
#[derive(Debug, PartialEq, Eq)]
pub struct SubscribeEffect {
    /// True when no existing channel referenced the symbol before this call,
    /// i.e. a wire-level subscribe must be sent.
    pub symbol_newly_referenced: bool,
}

/// Wire effect of an unsubscribe call.
#[derive(Debug, PartialEq, Eq)]
pub struct UnsubscribeEffect {
    /// Set when the last channel referencing a symbol went away and a
    /// wire-level unsubscribe must be sent.
    pub symbol_released: Option<String>,
    /// True when no channels remain at all and the transport can be torn
    /// down.
    pub transport_idle: bool,
}

/// The channel registry plus the pending-update staging map.
///
/// Pure with respect to the transport: mutations return the wire effects the
/// caller must apply, which keeps the multiplexing rules independently
/// testable.
#[derive(Default)]
pub struct SubscriptionTable {
    channels: HashMap<ChannelKey, Channel>,
    pending: HashMap<ChannelKey, Bar>,
}

impl SubscriptionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `subscriber_id` on the (symbol, resolution) channel, creating
    /// the channel if absent and seeding its last bar from `last_known_bar`
    /// when the channel has none yet.
    pub fn subscribe(
        &mut self,
        symbol: &str,
        resolution: Resolution,
        handler: BarHandler,
        subscriber_id: String,
        last_known_bar: Option<Bar>,
    ) -> SubscribeEffect {
        let symbol_newly_referenced = !self.symbol_in_use(symbol);

        let key = ChannelKey {
            symbol: symbol.to_string(),
            resolution,
        };
        let channel = self.channels.entry(key).or_insert_with(|| Channel {
            symbol: symbol.to_string(),
            resolution,
            last_bar: None,
            handlers: HashMap::new(),
        });

        channel.handlers.insert(subscriber_id, handler);
        if channel.last_bar.is_none() {
            channel.last_bar = last_known_bar;
        }

        SubscribeEffect {
            symbol_newly_referenced,
        }
    }

    /// Remove `subscriber_id` from whichever channel holds it. An empty
    /// channel is dropped together with its staged update; the symbol is
    /// released only when no other channel still references it.
    pub fn unsubscribe(&mut self, subscriber_id: &str) -> UnsubscribeEffect {
        let holder = self
            .channels
            .iter()
            .find(|(_, ch)| ch.handlers.contains_key(subscriber_id))
            .map(|(key, _)| key.clone());

        let mut symbol_released = None;
        if let Some(key) = holder {
            let emptied = {
                let channel = self
                    .channels
                    .get_mut(&key)
                    .expect("channel key was just observed");
                channel.handlers.remove(subscriber_id);
                channel.handlers.is_empty()
            };

            if emptied {
                self.channels.remove(&key);
                self.pending.remove(&key);
                if !self.symbol_in_use(&key.symbol) {
                    symbol_released = Some(key.symbol);
                }
            }
        }

        UnsubscribeEffect {
            symbol_released,
            transport_idle: self.channels.is_empty(),
        }
    }

    /// Fold one trade into every channel on the symbol that already has a
    /// bar, staging the result for the next flush.
    pub fn handle_trade(&mut self, symbol: &str, price: f64, size: f64, trade_time_ms: i64) {
        for (key, channel) in self.channels.iter_mut() {
            if channel.symbol != symbol {
                continue;
            }
            let Some(last) = channel.last_bar else {
                continue;
            };
            let updated = apply_trade(&last, price, size, trade_time_ms, channel.resolution);
            channel.last_bar = Some(updated);
            self.pending.insert(key.clone(), updated);
        }
    }

    /// Drain the pending map into (handler, bar-snapshot) deliveries.
    ///
    /// The caller invokes the handlers after releasing the table lock so a
    /// re-entrant subscribe from inside a callback cannot deadlock.
    pub fn flush(&mut self) -> Vec<(BarHandler, Bar)> {
        let mut deliveries = Vec::new();
        for (key, bar) in self.pending.drain() {
            if let Some(channel) = self.channels.get(&key) {
                for handler in channel.handlers.values() {
                    deliveries.push((handler.clone(), bar));
                }
            }
        }
        deliveries
    }

    /// Distinct symbols referenced by any channel (for re-subscribe on open).
    pub fn tracked_symbols(&self) -> Vec<String> {
        let mut symbols: Vec<String> = self
            .channels
            .values()
            .map(|ch| ch.symbol.clone())
            .collect();
        symbols.sort();
        symbols.dedup();
        symbols
    }

    pub fn symbol_in_use(&self, symbol: &str) -> bool {
        self.channels.values().any(|ch| ch.symbol == symbol)
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Last bar of a channel, if any (diagnostics and tests).
    pub fn last_bar(&self, symbol: &str, resolution: Resolution) -> Option<Bar> {
        let key = ChannelKey {
            symbol: symbol.to_string(),
            resolution,
        };
        self.channels.get(&key).and_then(|ch| ch.last_bar)
    }
}

// ---------------------------------------------------------------------------
// Reconnect backoff
// ---------------------------------------------------------------------------

/// Exponential backoff delay: min(1000 · 2^attempt, 30000) ms.
pub fn backoff_delay_ms(attempt: u32) -> u64 {
    1000u64
        .saturating_mul(2u64.saturating_pow(attempt))
        .min(30_000)
}

/// Consume one reconnect attempt. Returns the delay to wait before the next
/// connection attempt, or `None` once the attempt cap is exhausted.
fn next_reconnect_delay(attempt_counter: &AtomicU32) -> Option<u64> {
    let attempt = attempt_counter.fetch_add(1, Ordering::SeqCst);
    if attempt >= MAX_RECONNECT_ATTEMPTS {
        return None;
    }
    Some(backoff_delay_ms(attempt))
}

// ---------------------------------------------------------------------------
// StreamingClient
// ---------------------------------------------------------------------------

struct ClientInner {
    ws_url: String,
    table: Mutex<SubscriptionTable>,
    /// Outbound queue of the live connection actor, if one is armed.
    conn: Mutex<Option<mpsc::UnboundedSender<OutboundFrame>>>,
    /// Consecutive failed connection attempts since the last successful open.
    attempt: AtomicU32,
    /// Bumped on intentional teardown so a stale connection actor's close
    /// path cannot schedule a reconnect.
    generation: AtomicU64,
}

/// The shared streaming client. Cheap to clone; all clones multiplex the same
/// transport and channel table.
#[derive(Clone)]
pub struct StreamingClient {
    inner: Arc<ClientInner>,
}

impl StreamingClient {
    pub fn new(ws_url: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(ClientInner {
                ws_url: ws_url.into(),
                table: Mutex::new(SubscriptionTable::new()),
                conn: Mutex::new(None),
                attempt: AtomicU32::new(0),
                generation: AtomicU64::new(0),
            }),
        }
    }

    /// Register a subscriber on a (symbol, resolution) channel.
    ///
    /// Ensures the shared transport is armed and sends a symbol-level
    /// subscribe when the symbol is newly referenced. `last_known_bar` seeds
    /// the channel's bar state when the channel has none yet (typically the
    /// last bar of the chart's history load).
    pub fn subscribe(
        &self,
        symbol: &str,
        resolution: Resolution,
        on_bar: BarHandler,
        subscriber_id: impl Into<String>,
        last_known_bar: Option<Bar>,
    ) {
        let subscriber_id = subscriber_id.into();
        debug!(symbol, resolution = %resolution, subscriber = %subscriber_id, "subscribe");

        let effect = self.inner.table.lock().subscribe(
            symbol,
            resolution,
            on_bar,
            subscriber_id,
            last_known_bar,
        );

        self.ensure_connected();

        if effect.symbol_newly_referenced {
            self.send_frame(OutboundFrame::Subscribe {
                symbols: vec![symbol.to_string()],
            });
        }
    }

    /// Remove a subscriber. Tears down the channel when it becomes empty, the
    /// symbol-level subscription when no channel references the symbol, and
    /// the transport when no channels remain at all.
    pub fn unsubscribe(&self, subscriber_id: &str) {
        debug!(subscriber = %subscriber_id, "unsubscribe");
        let effect = self.inner.table.lock().unsubscribe(subscriber_id);

        if let Some(symbol) = effect.symbol_released {
            self.send_frame(OutboundFrame::Unsubscribe {
                symbols: vec![symbol],
            });
        }

        if effect.transport_idle {
            self.teardown();
        }
    }

    /// Number of live channels (diagnostics).
    pub fn channel_count(&self) -> usize {
        self.inner.table.lock().channel_count()
    }

    fn send_frame(&self, frame: OutboundFrame) {
        let conn = self.inner.conn.lock();
        if let Some(tx) = conn.as_ref() {
            if tx.send(frame).is_err() {
                // Actor is between drop and reconnect; the on-open
                // re-subscribe covers the lost frame.
                debug!("outbound frame dropped — transport not open");
            }
        }
    }

    /// Arm a connection actor if none exists. Called from subscribe, so a
    /// fresh subscription after a terminal reconnect failure re-arms the
    /// transport with a reset attempt counter.
    fn ensure_connected(&self) {
        let mut conn = self.inner.conn.lock();
        if conn.is_some() {
            return;
        }

        self.inner.attempt.store(0, Ordering::SeqCst);
        let generation = self.inner.generation.load(Ordering::SeqCst);
        let (tx, rx) = mpsc::unbounded_channel();
        *conn = Some(tx);
        tokio::spawn(run_connection(self.inner.clone(), rx, generation));
    }

    /// Intentional teardown: detach the close path via the generation bump,
    /// then drop the outbound queue so the actor writes a Close frame and
    /// exits.
    fn teardown(&self) {
        self.inner.generation.fetch_add(1, Ordering::SeqCst);
        self.inner.conn.lock().take();
        info!("streaming transport torn down — no channels remain");
    }
}

// ---------------------------------------------------------------------------
// Connection actor
// ---------------------------------------------------------------------------

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;

async fn send_json(write: &mut WsSink, frame: &OutboundFrame) -> Result<()> {
    let json = serde_json::to_string(frame).context("failed to serialise outbound frame")?;
    write
        .send(Message::Text(json))
        .await
        .context("failed to write frame to market-data stream")?;
    Ok(())
}

/// One connection attempt plus its read/flush/keepalive loop.
///
/// Runs until the socket drops or the outbound queue is closed, then hands
/// off to `schedule_reconnect`, which decides whether a reconnect is due.
async fn run_connection(
    inner: Arc<ClientInner>,
    mut outbound: mpsc::UnboundedReceiver<OutboundFrame>,
    generation: u64,
) {
    info!(url = %inner.ws_url, "connecting to market-data stream");

    let connected = connect_async(inner.ws_url.as_str()).await;
    let (ws_stream, _response) = match connected {
        Ok(pair) => pair,
        Err(e) => {
            error!(error = %e, "market-data stream connection failed");
            schedule_reconnect(inner, generation);
            return;
        }
    };

    info!("market-data stream connected");
    inner.attempt.store(0, Ordering::SeqCst);

    let (mut write, mut read) = ws_stream.split();

    // Re-issue a subscribe for every symbol currently tracked (covers both
    // reconnects and frames queued while the handshake was in flight).
    let symbols = inner.table.lock().tracked_symbols();
    if !symbols.is_empty() {
        if let Err(e) = send_json(&mut write, &OutboundFrame::Subscribe { symbols }).await {
            warn!(error = %e, "re-subscribe after connect failed");
        }
    }

    let mut flush = tokio::time::interval(Duration::from_millis(FLUSH_INTERVAL_MS));
    let mut keepalive = tokio::time::interval_at(
        tokio::time::Instant::now() + Duration::from_millis(KEEPALIVE_INTERVAL_MS),
        Duration::from_millis(KEEPALIVE_INTERVAL_MS),
    );

    loop {
        tokio::select! {
            frame = outbound.recv() => {
                match frame {
                    Some(frame) => {
                        if let Err(e) = send_json(&mut write, &frame).await {
                            warn!(error = %e, "outbound frame write failed");
                            break;
                        }
                    }
                    None => {
                        // Intentional teardown: the client dropped our queue.
                        debug!("outbound queue closed — closing market-data stream");
                        let _ = write.send(Message::Close(None)).await;
                        break;
                    }
                }
            }

            _ = flush.tick() => {
                let deliveries = inner.table.lock().flush();
                for (handler, bar) in deliveries {
                    handler(bar);
                }
            }

            _ = keepalive.tick() => {
                if let Err(e) = send_json(&mut write, &OutboundFrame::Ping).await {
                    warn!(error = %e, "keepalive ping failed");
                    break;
                }
            }

            msg = read.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => handle_frame(&inner, &text),
                    Some(Ok(_)) => {
                        // Ping/Pong/Binary/Close frames — tungstenite answers
                        // pings itself.
                    }
                    Some(Err(e)) => {
                        error!(error = %e, "market-data stream read error");
                        break;
                    }
                    None => {
                        warn!("market-data stream ended");
                        break;
                    }
                }
            }
        }
    }

    schedule_reconnect(inner, generation);
}

fn handle_frame(inner: &Arc<ClientInner>, text: &str) {
    let frame: InboundFrame = match serde_json::from_str(text) {
        Ok(frame) => frame,
        Err(e) => {
            debug!(error = %e, "unparseable market-data frame ignored");
            return;
        }
    };

    if let InboundFrame::Trade { data } = frame {
        let Some(trade_time_ms) = data.timestamp.as_millis() else {
            warn!(symbol = %data.symbol, "trade frame with unreadable timestamp ignored");
            return;
        };
        inner
            .table
            .lock()
            .handle_trade(&data.symbol, data.price, data.size, trade_time_ms);
    }
}

/// Decide whether the lost connection should be re-attempted, and arm the
/// delayed retry if so.
fn schedule_reconnect(inner: Arc<ClientInner>, generation: u64) {
    if inner.generation.load(Ordering::SeqCst) != generation {
        debug!("intentional close — reconnect suppressed");
        return;
    }
    if inner.table.lock().is_empty() {
        inner.conn.lock().take();
        debug!("no channels remain — reconnect suppressed");
        return;
    }

    let Some(delay_ms) = next_reconnect_delay(&inner.attempt) else {
        error!(
            attempts = MAX_RECONNECT_ATTEMPTS,
            "max reconnect attempts reached — market-data streaming halted"
        );
        // Leave the transport unarmed; the next subscribe call re-arms it.
        inner.conn.lock().take();
        return;
    };

    info!(delay_ms, "scheduling market-data reconnect");
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(delay_ms)).await;
        if inner.generation.load(Ordering::SeqCst) != generation {
            return;
        }
        if inner.table.lock().is_empty() {
            return;
        }

        let mut conn = inner.conn.lock();
        let (tx, rx) = mpsc::unbounded_channel();
        *conn = Some(tx);
        tokio::spawn(run_connection(inner.clone(), rx, generation));
    });
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
