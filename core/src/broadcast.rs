//! Per-connection broadcast hub
//!
//! One hub owns one connection's reader task and fans the structured event
//! stream out to any number of subscribers. Each subscriber gets its own
//! bounded buffer and delivery task, so a slow or hung consumer can only
//! lose its own messages and never stalls the socket reader. Subscribers
//! joining mid-stream see only events published after they attached.

use crate::connection::Connection;
use crate::event::Event;
use crate::incoming;
use crate::message::Message;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use uuid::Uuid;

/// Per-subscriber ring capacity before lag-dropping kicks in
const EVENT_BUFFER: usize = 256;

/// A frontend consumer of one connection's event stream
#[async_trait]
pub trait Subscriber: Send + Sync {
    /// Handle one delivered event.
    async fn deliver(&self, at: DateTime<Utc>, event: &Event);

    /// Called once after the last delivery when the connection closed.
    async fn connection_closed(&self) {}
}

/// Fan-out hub for one live connection
pub struct Broadcast {
    conn: Arc<Connection>,
    events: broadcast::Sender<(DateTime<Utc>, Event)>,
    subscribers: DashMap<Uuid, JoinHandle<()>>,
}

impl Broadcast {
    /// Take ownership of an established connection: publish the handshake
    /// events, then spawn the reader task that dispatches the live stream.
    pub fn start(conn: Arc<Connection>, initial: Vec<(DateTime<Utc>, Event)>) -> Arc<Self> {
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        let hub = Arc::new(Self {
            conn,
            events,
            subscribers: DashMap::new(),
        });
        for (at, event) in initial {
            hub.publish(at, event);
        }
        let reader_hub = Arc::clone(&hub);
        tokio::spawn(run_reader(reader_hub));
        hub
    }

    /// Deliver one event to every current subscriber.
    pub(crate) fn publish(&self, at: DateTime<Utc>, event: Event) {
        // Err here only means no subscriber is listening right now.
        let _ = self.events.send((at, event));
    }

    /// Attach a subscriber. Returns the id used to unsubscribe.
    pub fn subscribe(&self, handler: Arc<dyn Subscriber>) -> Uuid {
        let id = Uuid::new_v4();
        self.subscribe_as(id, handler);
        id
    }

    /// Attach a subscriber under a caller-chosen id, so one frontend client
    /// can later be detached from several hubs with the same id. An existing
    /// subscription under the id is replaced.
    pub fn subscribe_as(&self, id: Uuid, handler: Arc<dyn Subscriber>) {
        let mut rx = self.events.subscribe();
        let conn = Arc::clone(&self.conn);
        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    result = rx.recv() => match result {
                        Ok((at, event)) => handler.deliver(at, &event).await,
                        Err(RecvError::Lagged(n)) => {
                            tracing::warn!(connection = %conn.id, "subscriber lagged, dropped {} events", n);
                        }
                        Err(RecvError::Closed) => break,
                    },
                    _ = conn.closed() => {
                        // Drain what was already buffered before finishing.
                        while let Ok((at, event)) = rx.try_recv() {
                            handler.deliver(at, &event).await;
                        }
                        break;
                    }
                }
            }
            handler.connection_closed().await;
        });
        if let Some(previous) = self.subscribers.insert(id, task) {
            previous.abort();
        }
        tracing::debug!(connection = %self.conn.id, subscriber = %id, "subscriber attached");
    }

    /// Detach a subscriber. Safe to call while a delivery is in flight and
    /// for ids that already left.
    pub fn unsubscribe(&self, id: Uuid) {
        if let Some((_, task)) = self.subscribers.remove(&id) {
            task.abort();
            tracing::debug!(connection = %self.conn.id, subscriber = %id, "subscriber detached");
        }
    }

    /// Stop the hub: send QUIT while the connection is still open, then
    /// close the transport, which unblocks and terminates the reader task.
    /// Idempotent.
    pub fn stop(&self, reason: Option<&str>) {
        if self.conn.is_open() {
            self.conn.send(Message::quit(reason));
        }
        self.conn.close();
    }

    pub fn is_open(&self) -> bool {
        self.conn.is_open()
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    /// The connection this hub reads from
    pub fn connection(&self) -> &Arc<Connection> {
        &self.conn
    }
}

/// Reader task: drain the connection, dispatch each message, apply its side
/// effects, and publish the structured events. Exits when the transport
/// dies or a dispatched message asks to quit.
async fn run_reader(hub: Arc<Broadcast>) {
    loop {
        match hub.conn.receive().await {
            Ok((at, message)) => {
                let nick = hub.conn.current_nick();
                let fx = incoming::resolve(incoming::dispatch(message), &nick);
                for outbound in fx.send {
                    hub.conn.send(outbound);
                }
                for event in fx.add {
                    hub.conn.apply(&event);
                    hub.publish(at, event);
                }
                if let Some(reason) = fx.quit {
                    tracing::info!(connection = %hub.conn.id, "server requested quit: {}", reason);
                    hub.conn
                        .debug_log()
                        .warning("dispatch", format!("quit: {}", reason));
                    hub.conn.send(Message::quit(Some(&reason)));
                    hub.conn.close();
                    break;
                }
            }
            Err(e) if e.is_transport_fatal() => {
                // receive() already closed the connection and logged.
                break;
            }
            // Parse error on one line; the stream continues.
            Err(_) => continue,
        }
    }
    tracing::debug!(connection = %hub.conn.id, "reader task finished");
}
