//! Relay pool.
//!
//! Maintains one durable outbound WebSocket session per configured relay.
//! Each session task reconnects with capped exponential backoff plus
//! jitter; permanent failure of one relay does not halt the others.
//! Publishing fans out to every connected relay and succeeds when at least
//! one accepts the write. Inbound events matching the subscription are
//! deduplicated by event id across relays before reaching the handler.

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::sync::{mpsc, oneshot, watch};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message as WsMessage;

use kvc_types::Event;

use crate::error::RelayError;

/// Subscription id used on every relay session.
const SUB_ID: &str = "kvc-sub";

/// Base reconnect delay; doubles per attempt.
const BACKOFF_BASE: Duration = Duration::from_millis(500);

/// Reconnect delay cap.
const BACKOFF_CAP: Duration = Duration::from_secs(30);

/// How long a publish waits for a socket write acknowledgement.
const PUBLISH_TIMEOUT: Duration = Duration::from_secs(5);

/// Bounded memory for cross-relay event-id dedup.
const SEEN_CAPACITY: usize = 4096;

/// Queue depth for per-relay outbound commands.
const CMD_QUEUE: usize = 64;

/// The interest registered on every relay.
#[derive(Debug, Clone)]
pub struct SubscriptionFilter {
    /// Event kinds to receive.
    pub kinds: Vec<u16>,
    /// Only events `p`-tagged to this pubkey.
    pub recipient: String,
}

impl SubscriptionFilter {
    fn to_req_frame(&self) -> String {
        json!(["REQ", SUB_ID, { "kinds": self.kinds, "#p": [self.recipient] }]).to_string()
    }
}

enum RelayCmd {
    Publish {
        frame: String,
        ack: oneshot::Sender<bool>,
    },
}

struct RelayHandle {
    url: String,
    cmd_tx: mpsc::Sender<RelayCmd>,
    connected: Arc<AtomicBool>,
    task: tokio::task::JoinHandle<()>,
}

/// Connection status snapshot, cheap to clone into HTTP handlers.
#[derive(Debug, Clone, Default)]
pub struct PoolStatus {
    flags: Vec<(String, Arc<AtomicBool>)>,
}

impl PoolStatus {
    /// Number of currently connected relays.
    pub fn connected_count(&self) -> usize {
        self.flags
            .iter()
            .filter(|(_, flag)| flag.load(Ordering::Relaxed))
            .count()
    }

    /// Total number of configured relays.
    pub fn total(&self) -> usize {
        self.flags.len()
    }
}

/// Bounded seen-id set for duplicate suppression.
#[derive(Debug, Default)]
struct SeenIds {
    set: HashSet<String>,
    order: VecDeque<String>,
}

impl SeenIds {
    /// Record `id`; returns false if it was already present.
    fn insert(&mut self, id: &str) -> bool {
        if self.set.contains(id) {
            return false;
        }
        self.set.insert(id.to_string());
        self.order.push_back(id.to_string());
        if self.order.len() > SEEN_CAPACITY {
            if let Some(oldest) = self.order.pop_front() {
                self.set.remove(&oldest);
            }
        }
        true
    }
}

/// A set of durable relay sessions.
pub struct RelayPool {
    handles: Vec<RelayHandle>,
    shutdown_tx: watch::Sender<bool>,
}

impl std::fmt::Debug for RelayPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayPool")
            .field("relays", &self.handles.len())
            .finish_non_exhaustive()
    }
}

impl RelayPool {
    /// Open sessions to `urls` and deliver matching inbound events (deduped
    /// by event id) to `event_tx`.
    pub fn connect(
        urls: &[String],
        filter: SubscriptionFilter,
        event_tx: mpsc::Sender<Event>,
        reconnect_max: u32,
    ) -> Result<Self, RelayError> {
        if urls.is_empty() {
            return Err(RelayError::NoRelays);
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let seen = Arc::new(Mutex::new(SeenIds::default()));

        let handles = urls
            .iter()
            .map(|url| {
                let (cmd_tx, cmd_rx) = mpsc::channel(CMD_QUEUE);
                let connected = Arc::new(AtomicBool::new(false));
                let task = tokio::spawn(run_relay(RelayTask {
                    url: url.clone(),
                    req_frame: filter.to_req_frame(),
                    cmd_rx,
                    event_tx: event_tx.clone(),
                    seen: seen.clone(),
                    connected: connected.clone(),
                    reconnect_max,
                    shutdown_rx: shutdown_rx.clone(),
                }));
                RelayHandle {
                    url: url.clone(),
                    cmd_tx,
                    connected,
                    task,
                }
            })
            .collect();

        Ok(Self {
            handles,
            shutdown_tx,
        })
    }

    /// Publish a signed event to every connected relay.
    ///
    /// Returns the number of relays that accepted the write; fails when no
    /// relay did.
    pub async fn publish(&self, event: &Event) -> Result<usize, RelayError> {
        let frame = json!(["EVENT", event]).to_string();

        let mut acks = Vec::new();
        for handle in &self.handles {
            if !handle.connected.load(Ordering::Relaxed) {
                continue;
            }
            let (ack_tx, ack_rx) = oneshot::channel();
            if handle
                .cmd_tx
                .send(RelayCmd::Publish {
                    frame: frame.clone(),
                    ack: ack_tx,
                })
                .await
                .is_ok()
            {
                acks.push((handle.url.clone(), ack_rx));
            }
        }

        let mut accepted = 0;
        for (url, ack_rx) in acks {
            match tokio::time::timeout(PUBLISH_TIMEOUT, ack_rx).await {
                Ok(Ok(true)) => accepted += 1,
                Ok(_) => tracing::debug!("Relay {url} rejected the publish"),
                Err(_) => tracing::debug!("Relay {url} publish ack timed out"),
            }
        }

        if accepted == 0 {
            return Err(RelayError::PublishFailed);
        }
        Ok(accepted)
    }

    /// Snapshot handle for health reporting.
    pub fn status(&self) -> PoolStatus {
        PoolStatus {
            flags: self
                .handles
                .iter()
                .map(|h| (h.url.clone(), h.connected.clone()))
                .collect(),
        }
    }

    /// Signal every session to close.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    /// Signal shutdown and wait (bounded) for the session tasks to exit.
    pub async fn shutdown_and_join(self) {
        self.shutdown();
        for handle in self.handles {
            if tokio::time::timeout(Duration::from_secs(2), handle.task)
                .await
                .is_err()
            {
                tracing::warn!("Relay session {} did not exit in time", handle.url);
            }
        }
    }
}

struct RelayTask {
    url: String,
    req_frame: String,
    cmd_rx: mpsc::Receiver<RelayCmd>,
    event_tx: mpsc::Sender<Event>,
    seen: Arc<Mutex<SeenIds>>,
    connected: Arc<AtomicBool>,
    reconnect_max: u32,
    shutdown_rx: watch::Receiver<bool>,
}

async fn run_relay(mut task: RelayTask) {
    let mut attempt: u32 = 0;
    loop {
        if *task.shutdown_rx.borrow() {
            break;
        }

        match connect_async(task.url.as_str()).await {
            Ok((ws, _)) => {
                attempt = 0;
                task.connected.store(true, Ordering::Relaxed);
                tracing::info!("Connected to relay {}", task.url);

                let ended_by_shutdown = drive_session(ws, &mut task).await;
                task.connected.store(false, Ordering::Relaxed);
                if ended_by_shutdown {
                    break;
                }
                tracing::warn!("Lost session to relay {}", task.url);
            }
            Err(e) => {
                tracing::warn!("Failed to connect to relay {}: {e}", task.url);
            }
        }

        attempt += 1;
        if attempt > task.reconnect_max {
            tracing::error!(
                "Giving up on relay {} after {} attempts",
                task.url,
                task.reconnect_max
            );
            break;
        }

        let delay = backoff_delay(attempt);
        tracing::debug!("Reconnecting to {} in {:?}", task.url, delay);
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = task.shutdown_rx.changed() => break,
        }
    }
}

/// Drive one live session. Returns true when ended by shutdown.
async fn drive_session(
    ws: tokio_tungstenite::WebSocketStream<
        tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
    >,
    task: &mut RelayTask,
) -> bool {
    let (mut sink, mut stream) = ws.split();

    if let Err(e) = sink.send(WsMessage::Text(task.req_frame.clone())).await {
        tracing::warn!("Failed to subscribe on {}: {e}", task.url);
        return false;
    }

    loop {
        tokio::select! {
            _ = task.shutdown_rx.changed() => {
                let close = json!(["CLOSE", SUB_ID]).to_string();
                let _ = sink.send(WsMessage::Text(close)).await;
                let _ = sink.close().await;
                return true;
            }

            cmd = task.cmd_rx.recv() => {
                match cmd {
                    Some(RelayCmd::Publish { frame, ack }) => {
                        let ok = sink.send(WsMessage::Text(frame)).await.is_ok();
                        let _ = ack.send(ok);
                        if !ok {
                            return false;
                        }
                    }
                    None => return true, // pool dropped
                }
            }

            incoming = stream.next() => {
                match incoming {
                    Some(Ok(WsMessage::Text(text))) => {
                        handle_frame(&text, task).await;
                    }
                    Some(Ok(WsMessage::Ping(payload))) => {
                        let _ = sink.send(WsMessage::Pong(payload)).await;
                    }
                    Some(Ok(WsMessage::Close(_))) | None => return false,
                    Some(Ok(_)) => {} // binary/pong frames are ignored
                    Some(Err(e)) => {
                        tracing::debug!("Read error on {}: {e}", task.url);
                        return false;
                    }
                }
            }
        }
    }
}

async fn handle_frame(text: &str, task: &RelayTask) {
    let Ok(frame) = serde_json::from_str::<Value>(text) else {
        tracing::debug!("Non-JSON frame from {}", task.url);
        return;
    };

    match frame.get(0).and_then(Value::as_str) {
        Some("EVENT") => {
            let Some(raw_event) = frame.get(2) else {
                return;
            };
            let Ok(event) = serde_json::from_value::<Event>(raw_event.clone()) else {
                tracing::debug!("Malformed event from {}", task.url);
                return;
            };
            let fresh = {
                let mut seen = task.seen.lock().expect("seen mutex poisoned");
                seen.insert(&event.id)
            };
            if fresh && task.event_tx.send(event).await.is_err() {
                tracing::debug!("Event handler closed; dropping inbound event");
            }
        }
        Some("OK") => {
            let accepted = frame.get(2).and_then(Value::as_bool).unwrap_or(false);
            if !accepted {
                let reason = frame.get(3).and_then(Value::as_str).unwrap_or("");
                tracing::warn!("Relay {} rejected event: {}", task.url, reason);
            }
        }
        Some("EOSE") => tracing::debug!("End of stored events from {}", task.url),
        Some("NOTICE") => {
            let notice = frame.get(1).and_then(Value::as_str).unwrap_or("");
            tracing::warn!("Notice from {}: {}", task.url, notice);
        }
        _ => {}
    }
}

/// Exponential backoff with jitter, capped.
fn backoff_delay(attempt: u32) -> Duration {
    let exp = BACKOFF_BASE.saturating_mul(1u32 << attempt.min(10));
    let capped = exp.min(BACKOFF_CAP);
    let mut jitter = [0u8; 1];
    let _ = getrandom::getrandom(&mut jitter);
    capped + Duration::from_millis(jitter[0] as u64)
}
