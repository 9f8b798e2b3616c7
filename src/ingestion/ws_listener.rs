use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::{SinkExt, StreamExt};
use metrics::counter;
use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::time::{interval, sleep};
use tokio_tungstenite::{connect_async, tungstenite::Message};

use super::forwarder::Forwarder;
use super::frame::{parse_frame, FeedEvent, FrameError};
use crate::polymarket::types::{WsSubscribe, WsSubscriptionUpdate};

const PING_INTERVAL: Duration = Duration::from_secs(25);
const BASE_RECONNECT_DELAY: Duration = Duration::from_secs(2);
const MAX_RECONNECT_DELAY: Duration = Duration::from_secs(60);
const ERROR_QUEUE_CAPACITY: usize = 64;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("connect failed: {0}")]
    Connect(String),

    #[error("connection lost: {0}")]
    Disconnected(String),

    #[error("bad frame: {0}")]
    Frame(#[from] FrameError),
}

/// Point-in-time view of a source's activity.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SourceStats {
    pub message_count: u64,
    pub last_message_at: Option<DateTime<Utc>>,
}

/// Message counter shared between a source task and the health endpoint.
#[derive(Debug, Default)]
pub struct FeedActivity {
    message_count: AtomicU64,
    last_message_at: Mutex<Option<DateTime<Utc>>>,
}

impl FeedActivity {
    pub fn record(&self, at: DateTime<Utc>) {
        self.message_count.fetch_add(1, Ordering::Relaxed);
        *self.last_message_at.lock() = Some(at);
    }

    pub fn snapshot(&self) -> SourceStats {
        SourceStats {
            message_count: self.message_count.load(Ordering::Relaxed),
            last_message_at: *self.last_message_at.lock(),
        }
    }
}

#[derive(Debug)]
enum Command {
    Subscribe(Vec<String>),
    Unsubscribe(Vec<String>),
}

/// Handle to the streaming market feed.
///
/// The connection task owns the socket; this handle only updates the active
/// asset set and signals shutdown. The task also stops once every clone of
/// the handle is gone.
#[derive(Clone)]
pub struct WsEventSource {
    active: Arc<Mutex<BTreeSet<String>>>,
    commands: mpsc::UnboundedSender<Command>,
    stats: Arc<FeedActivity>,
    closed: Arc<AtomicBool>,
    stop: Arc<watch::Sender<bool>>,
}

impl WsEventSource {
    /// Start the connection task. Returns the handle, the event stream and
    /// the error stream.
    pub fn spawn(
        url: String,
        initial_assets: Vec<String>,
        queue_capacity: usize,
    ) -> (Self, mpsc::Receiver<FeedEvent>, mpsc::Receiver<SourceError>) {
        let (forwarder, events_rx) = Forwarder::channel(queue_capacity, "stream");
        let (errors_tx, errors_rx) = mpsc::channel(ERROR_QUEUE_CAPACITY);
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (stop_tx, stop_rx) = watch::channel(false);

        let source = Self {
            active: Arc::new(Mutex::new(initial_assets.into_iter().collect())),
            commands: commands_tx,
            stats: Arc::new(FeedActivity::default()),
            closed: Arc::new(AtomicBool::new(false)),
            stop: Arc::new(stop_tx),
        };

        let conn = Connection {
            url,
            active: source.active.clone(),
            stats: source.stats.clone(),
            forwarder,
            errors: errors_tx,
        };
        tokio::spawn(conn.run(commands_rx, stop_rx));

        (source, events_rx, errors_rx)
    }

    /// Add assets to the active set and subscribe on the live connection.
    pub fn subscribe(&self, asset_ids: &[String]) {
        let added: Vec<String> = {
            let mut active = self.active.lock();
            asset_ids
                .iter()
                .filter(|id| active.insert((*id).clone()))
                .cloned()
                .collect()
        };
        if !added.is_empty() {
            let _ = self.commands.send(Command::Subscribe(added));
        }
    }

    pub fn unsubscribe(&self, asset_ids: &[String]) {
        let removed: Vec<String> = {
            let mut active = self.active.lock();
            asset_ids
                .iter()
                .filter(|id| active.remove(id.as_str()))
                .cloned()
                .collect()
        };
        if !removed.is_empty() {
            let _ = self.commands.send(Command::Unsubscribe(removed));
        }
    }

    pub fn active_assets(&self) -> Vec<String> {
        self.active.lock().iter().cloned().collect()
    }

    /// Stop the connection task. Safe to call repeatedly and before any
    /// connection was made.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let _ = self.stop.send(true);
        tracing::info!("Market stream closed");
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> SourceStats {
        self.stats.snapshot()
    }

    pub fn activity(&self) -> Arc<FeedActivity> {
        self.stats.clone()
    }
}

/// Route one text frame: normalise, forward trades, report bad elements.
/// Book, price and tick-size traffic stops here so it never competes with
/// trades for queue space. Returns the number of trades forwarded.
pub fn handle_text(
    text: &str,
    received_at: DateTime<Utc>,
    forwarder: &Forwarder<FeedEvent>,
    errors: &mpsc::Sender<SourceError>,
) -> usize {
    let items = match parse_frame(text, received_at) {
        Ok(items) => items,
        Err(e) => {
            report_frame_error(e, errors);
            return 0;
        }
    };

    let mut forwarded = 0;
    for item in items {
        match item {
            Ok(event @ FeedEvent::Trade(_)) => {
                forwarder.forward(event);
                forwarded += 1;
            }
            Ok(FeedEvent::Unrecognized { event_type }) => {
                tracing::trace!(event_type = ?event_type, "Ignoring non-trade frame");
                counter!("frames_ignored_total").increment(1);
            }
            Err(e) => report_frame_error(e, errors),
        }
    }
    forwarded
}

fn report_frame_error(e: FrameError, errors: &mpsc::Sender<SourceError>) {
    tracing::debug!(error = %e, "Skipping unparsable frame");
    counter!("frames_malformed_total").increment(1);
    let _ = errors.try_send(SourceError::Frame(e));
}

fn backoff(attempt: u32) -> Duration {
    let delay = BASE_RECONNECT_DELAY.saturating_mul(2u32.saturating_pow(attempt));
    delay.min(MAX_RECONNECT_DELAY)
}

fn subscribe_message(assets: &[String]) -> Option<String> {
    serde_json::to_string(&WsSubscribe::market(assets)).ok()
}

struct Connection {
    url: String,
    active: Arc<Mutex<BTreeSet<String>>>,
    stats: Arc<FeedActivity>,
    forwarder: Forwarder<FeedEvent>,
    errors: mpsc::Sender<SourceError>,
}

/// How a connected session ended.
enum SessionEnd {
    Stopped,
    Lost(String),
}

impl Connection {
    async fn run(
        self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut stop: watch::Receiver<bool>,
    ) {
        let mut attempt: u32 = 0;

        while !*stop.borrow() {
            tracing::info!(url = %self.url, "Connecting to market stream...");

            let connected = tokio::select! {
                result = connect_async(&self.url) => result,
                _ = stop.changed() => break,
            };

            match connected {
                Ok((ws_stream, _response)) => {
                    tracing::info!("Market stream connected");
                    counter!("source_connects_total").increment(1);
                    attempt = 0;

                    match self.session(ws_stream, &mut commands, &mut stop).await {
                        SessionEnd::Stopped => break,
                        SessionEnd::Lost(reason) => {
                            tracing::warn!(reason = %reason, "Market stream disconnected");
                            let _ = self.errors.try_send(SourceError::Disconnected(reason));
                        }
                    }
                }
                Err(e) => {
                    tracing::error!(error = %e, "Market stream connection failed");
                    let _ = self.errors.try_send(SourceError::Connect(e.to_string()));
                }
            }

            let delay = backoff(attempt);
            attempt = attempt.saturating_add(1);
            tracing::info!(delay_secs = delay.as_secs(), attempt, "Reconnecting...");
            tokio::select! {
                _ = sleep(delay) => {}
                _ = stop.changed() => break,
            }
        }

        tracing::info!("Market stream task stopped");
    }

    async fn session<S>(
        &self,
        ws_stream: S,
        commands: &mut mpsc::UnboundedReceiver<Command>,
        stop: &mut watch::Receiver<bool>,
    ) -> SessionEnd
    where
        S: futures_util::Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>>
            + futures_util::Sink<Message, Error = tokio_tungstenite::tungstenite::Error>
            + Unpin,
    {
        let (mut write, mut read) = ws_stream.split();

        // Commands queued while offline are already in the active set
        while commands.try_recv().is_ok() {}

        let assets: Vec<String> = self.active.lock().iter().cloned().collect();
        if let Some(msg) = subscribe_message(&assets) {
            if let Err(e) = write.send(Message::Text(msg.into())).await {
                return SessionEnd::Lost(format!("subscribe failed: {e}"));
            }
        }
        tracing::info!(asset_count = assets.len(), "Subscribed to active assets");

        let mut ping_timer = interval(PING_INTERVAL);
        ping_timer.tick().await; // consume the first immediate tick

        loop {
            tokio::select! {
                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            let now = Utc::now();
                            self.stats.record(now);
                            handle_text(text.as_ref(), now, &self.forwarder, &self.errors);
                        }
                        Some(Ok(Message::Ping(data))) => {
                            if let Err(e) = write.send(Message::Pong(data)).await {
                                return SessionEnd::Lost(format!("pong failed: {e}"));
                            }
                        }
                        Some(Ok(Message::Close(_))) => {
                            return SessionEnd::Lost("server sent close frame".into());
                        }
                        Some(Ok(_)) => {} // Binary, Pong, Frame
                        Some(Err(e)) => return SessionEnd::Lost(format!("read error: {e}")),
                        None => return SessionEnd::Lost("stream ended".into()),
                    }
                }
                _ = ping_timer.tick() => {
                    if let Err(e) = write.send(Message::Ping(vec![].into())).await {
                        return SessionEnd::Lost(format!("ping failed: {e}"));
                    }
                }
                Some(cmd) = commands.recv() => {
                    let msg = match &cmd {
                        Command::Subscribe(ids) => serde_json::to_string(&WsSubscriptionUpdate::subscribe(ids)),
                        Command::Unsubscribe(ids) => serde_json::to_string(&WsSubscriptionUpdate::unsubscribe(ids)),
                    };
                    if let Ok(msg) = msg {
                        tracing::info!(command = ?cmd, "Updating subscription");
                        if let Err(e) = write.send(Message::Text(msg.into())).await {
                            return SessionEnd::Lost(format!("subscription update failed: {e}"));
                        }
                    }
                }
                _ = stop.changed() => {
                    let _ = write.send(Message::Close(None)).await;
                    return SessionEnd::Stopped;
                }
            }
        }
    }
}
