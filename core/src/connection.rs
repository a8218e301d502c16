//! Connection handling and management
//!
//! A `Connection` owns one IRC session: its transport halves, lifecycle
//! status, current nickname, joined-channel map, replay buffer, transfer
//! counters, and debug queue. The cells are independently protected so a
//! writer can run while the reader task is blocked on the socket.

use crate::debug_log::DebugLog;
use crate::event::Event;
use crate::transport::{Transport, TransportReader, TransportWriter};
use crate::{Error, Identity, Message, Result, ServerSpec};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, RwLock};
use tokio::sync::{mpsc, watch, Mutex};
use uuid::Uuid;

/// Connection lifecycle status. Transitions are strictly monotonic:
/// Initializing -> Established -> Closed, or Initializing -> Closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ConnectionStatus {
    /// Registration handshake in progress
    Initializing,
    /// Welcome received, normal traffic flowing
    Established,
    /// Transport closed; the inbound queue ends here
    Closed,
}

/// Monotonic status cell. Reads and writes never suspend; waiters can
/// subscribe for the transition to Closed.
#[derive(Clone)]
pub struct StatusCell {
    tx: Arc<watch::Sender<ConnectionStatus>>,
}

impl StatusCell {
    pub fn new() -> Self {
        Self {
            tx: Arc::new(watch::channel(ConnectionStatus::Initializing).0),
        }
    }

    pub fn get(&self) -> ConnectionStatus {
        *self.tx.borrow()
    }

    /// Advance to `next` if it is strictly later in the lifecycle.
    /// Returns false when the cell already was at or past `next`.
    pub fn advance(&self, next: ConnectionStatus) -> bool {
        self.tx.send_if_modified(|current| {
            if next > *current {
                *current = next;
                true
            } else {
                false
            }
        })
    }

    pub fn subscribe(&self) -> watch::Receiver<ConnectionStatus> {
        self.tx.subscribe()
    }
}

impl Default for StatusCell {
    fn default() -> Self {
        Self::new()
    }
}

/// Transfer counters for one connection
#[derive(Clone, Default)]
pub struct ConnectionStats {
    inner: Arc<StatsInner>,
}

#[derive(Default)]
struct StatsInner {
    messages_in: AtomicU64,
    messages_out: AtomicU64,
    bytes_in: AtomicU64,
    bytes_out: AtomicU64,
}

/// Point-in-time copy of the counters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub messages_in: u64,
    pub messages_out: u64,
    pub bytes_in: u64,
    pub bytes_out: u64,
}

impl ConnectionStats {
    fn record_incoming(&self, bytes: u64) {
        self.inner.messages_in.fetch_add(1, Ordering::Relaxed);
        self.inner.bytes_in.fetch_add(bytes, Ordering::Relaxed);
    }

    fn record_outgoing(&self, bytes: u64) {
        self.inner.messages_out.fetch_add(1, Ordering::Relaxed);
        self.inner.bytes_out.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            messages_in: self.inner.messages_in.load(Ordering::Relaxed),
            messages_out: self.inner.messages_out.load(Ordering::Relaxed),
            bytes_in: self.inner.bytes_in.load(Ordering::Relaxed),
            bytes_out: self.inner.bytes_out.load(Ordering::Relaxed),
        }
    }
}

enum WriteCommand {
    Message(Message),
    Shutdown,
}

/// One live IRC session
pub struct Connection {
    /// Unique connection ID
    pub id: Uuid,
    /// Server this connection talks to
    pub server: ServerSpec,
    /// Identity used at registration
    pub identity: Identity,
    status: StatusCell,
    nick: RwLock<String>,
    channels: DashMap<String, Option<String>>,
    reader: Mutex<TransportReader>,
    out_tx: mpsc::UnboundedSender<WriteCommand>,
    replay: StdMutex<VecDeque<(DateTime<Utc>, Message)>>,
    debug: DebugLog,
    stats: ConnectionStats,
}

impl Connection {
    /// Wrap a freshly opened transport. Splits the stream, spawns the writer
    /// task, and seeds the replay buffer with messages the transport consumed
    /// during TLS negotiation.
    pub fn new(
        transport: Transport,
        server: ServerSpec,
        identity: Identity,
        channels: Vec<(String, Option<String>)>,
        replay: Vec<(DateTime<Utc>, Message)>,
    ) -> Arc<Self> {
        let (reader, writer) = transport.split();
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let status = StatusCell::new();
        let debug = DebugLog::new();
        let stats = ConnectionStats::default();
        let channel_map = DashMap::new();
        for (name, key) in channels {
            channel_map.insert(name, key);
        }

        let conn = Arc::new(Self {
            id: Uuid::new_v4(),
            server,
            nick: RwLock::new(identity.nick.clone()),
            identity,
            status: status.clone(),
            channels: channel_map,
            reader: Mutex::new(reader),
            out_tx,
            replay: StdMutex::new(replay.into()),
            debug: debug.clone(),
            stats: stats.clone(),
        });

        tokio::spawn(run_writer(writer, out_rx, status, debug, stats));
        conn
    }

    /// Queue a message for the writer task. On a Closed connection this is a
    /// no-op that logs at error level.
    pub fn send(&self, message: Message) {
        if self.status.get() == ConnectionStatus::Closed {
            tracing::error!(connection = %self.id, "send on closed connection: {}", message);
            self.debug
                .error("connection", format!("send on closed connection: {}", message));
            return;
        }
        if self.out_tx.send(WriteCommand::Message(message)).is_err() {
            tracing::error!(connection = %self.id, "writer task gone, dropping outbound message");
        }
    }

    /// Receive the next inbound message. Replayed messages from the TLS
    /// upgrade are drained head-first before the live socket is touched.
    /// Fatal transport errors close the connection before they surface.
    pub async fn receive(&self) -> Result<(DateTime<Utc>, Message)> {
        if self.status.get() == ConnectionStatus::Closed {
            return Err(Error::Eof);
        }
        if let Some(item) = self.pop_replay() {
            return Ok(item);
        }
        let mut reader = self.reader.lock().await;
        let result = tokio::select! {
            _ = self.closed() => Err(Error::Eof),
            result = reader.read_message() => result,
        };
        drop(reader);
        match result {
            Ok((at, message, bytes)) => {
                self.stats.record_incoming(bytes as u64);
                Ok((at, message))
            }
            Err(e) if e.is_transport_fatal() => {
                if self.status.get() != ConnectionStatus::Closed {
                    self.debug.error("transport", e.to_string());
                }
                self.close();
                Err(e)
            }
            Err(e) => {
                tracing::warn!(connection = %self.id, "discarding unparseable line: {}", e);
                self.debug.warning("transport", e.to_string());
                Err(e)
            }
        }
    }

    fn pop_replay(&self) -> Option<(DateTime<Utc>, Message)> {
        self.replay.lock().expect("replay buffer poisoned").pop_front()
    }

    /// Close the connection. Idempotent: the first call flips status to
    /// Closed and shuts the write side down; later calls do nothing.
    pub fn close(&self) {
        if self.status.advance(ConnectionStatus::Closed) {
            tracing::info!(connection = %self.id, server = %self.server, "connection closed");
            self.debug.info("connection", "closed");
            let _ = self.out_tx.send(WriteCommand::Shutdown);
        }
    }

    /// Mark registration as complete. Returns false when the connection
    /// already closed underneath the handshake.
    pub(crate) fn establish(&self) -> bool {
        let advanced = self.status.advance(ConnectionStatus::Established);
        if advanced {
            self.debug.info("registration", "established");
        }
        advanced
    }

    /// Resolves once status reaches Closed.
    pub async fn closed(&self) {
        let mut rx = self.status.subscribe();
        let _ = rx.wait_for(|s| *s == ConnectionStatus::Closed).await;
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status.get()
    }

    pub fn is_open(&self) -> bool {
        self.status.get() != ConnectionStatus::Closed
    }

    pub fn is_init(&self) -> bool {
        self.status.get() == ConnectionStatus::Initializing
    }

    pub fn current_nick(&self) -> String {
        self.nick.read().expect("nick cell poisoned").clone()
    }

    pub fn set_nick(&self, nick: impl Into<String>) {
        *self.nick.write().expect("nick cell poisoned") = nick.into();
    }

    /// Snapshot of the joined-channel map (channel -> optional key)
    pub fn channels(&self) -> HashMap<String, Option<String>> {
        self.channels
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }

    /// Apply the state side effects of one structured event: join/part/kick
    /// affecting this connection update the channel map, a self nick change
    /// updates the nick cell.
    pub fn apply(&self, event: &Event) {
        match event {
            Event::Join {
                channel,
                user: None,
            } => {
                self.channels.entry(channel.clone()).or_insert(None);
            }
            Event::Part {
                channel,
                user: None,
            } => {
                self.channels.remove(channel);
            }
            Event::Kick {
                channel,
                nick: Some(nick),
                ..
            } if *nick == self.current_nick() => {
                self.channels.remove(channel);
                self.debug
                    .info("connection", format!("kicked from {}", channel));
            }
            Event::Quit { user: None, .. } => {
                self.channels.clear();
            }
            Event::NickChange {
                user: None,
                new_nick,
            } => {
                self.set_nick(new_nick.clone());
            }
            _ => {}
        }
    }

    pub fn debug_log(&self) -> &DebugLog {
        &self.debug
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }
}

/// Writer task: drains the outbound queue onto the socket. A write error
/// closes the connection; `Shutdown` half-closes the socket so the blocked
/// reader wakes with EOF.
async fn run_writer(
    mut writer: TransportWriter,
    mut out_rx: mpsc::UnboundedReceiver<WriteCommand>,
    status: StatusCell,
    debug: DebugLog,
    stats: ConnectionStats,
) {
    loop {
        match out_rx.recv().await {
            Some(WriteCommand::Message(message)) => match writer.write_message(&message).await {
                Ok(bytes) => stats.record_outgoing(bytes as u64),
                Err(e) => {
                    tracing::error!("write failed: {}", e);
                    debug.error("transport", format!("write failed: {}", e));
                    status.advance(ConnectionStatus::Closed);
                    break;
                }
            },
            Some(WriteCommand::Shutdown) | None => {
                let _ = writer.shutdown().await;
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_is_monotonic() {
        let cell = StatusCell::new();
        assert_eq!(cell.get(), ConnectionStatus::Initializing);
        assert!(cell.advance(ConnectionStatus::Established));
        assert_eq!(cell.get(), ConnectionStatus::Established);
        assert!(!cell.advance(ConnectionStatus::Initializing));
        assert_eq!(cell.get(), ConnectionStatus::Established);
        assert!(cell.advance(ConnectionStatus::Closed));
        assert!(!cell.advance(ConnectionStatus::Established));
        assert_eq!(cell.get(), ConnectionStatus::Closed);
    }

    #[test]
    fn test_advance_is_idempotent() {
        let cell = StatusCell::new();
        assert!(cell.advance(ConnectionStatus::Closed));
        assert!(!cell.advance(ConnectionStatus::Closed));
        assert_eq!(cell.get(), ConnectionStatus::Closed);
    }

    #[test]
    fn test_stats_counters() {
        let stats = ConnectionStats::default();
        stats.record_incoming(10);
        stats.record_incoming(5);
        stats.record_outgoing(7);
        let snapshot = stats.snapshot();
        assert_eq!(snapshot.messages_in, 2);
        assert_eq!(snapshot.bytes_in, 15);
        assert_eq!(snapshot.messages_out, 1);
        assert_eq!(snapshot.bytes_out, 7);
    }
}
