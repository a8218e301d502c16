//! Multi-account connection supervisor
//!
//! Owns the two-level map account -> network -> broadcast hub. A refresh
//! cycle queries the store and opens whatever connections are missing; the
//! event loop attaches newly connected frontends to their account's hubs.
//! The map has a single writer (the supervisor) and any number of readers.

use crate::broadcast::{Broadcast, Subscriber};
use crate::store::{AccountId, NetworkId, Store};
use crate::{registration, Identity, Result, ServerSpec};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;

/// Hubs of one account, by network
pub type NetworkMap = HashMap<NetworkId, Arc<Broadcast>>;
/// All live hubs, by account and network
pub type ConnectionMap = HashMap<AccountId, NetworkMap>;

/// Event consumed by the supervisor loop
pub struct AccountEvent {
    pub account: AccountId,
    pub payload: AccountPayload,
}

/// What happened to the account
pub enum AccountPayload {
    /// A frontend client attached; subscribe it to every hub of the account.
    ClientConnected {
        client: Uuid,
        handler: Arc<dyn Subscriber>,
    },
    /// The frontend client went away; detach it everywhere.
    ClientDisconnected { client: Uuid },
}

/// Bring up one connection and wrap it in a broadcast hub.
pub async fn start_broadcasting(
    identity: &Identity,
    server: &ServerSpec,
    channels: Vec<(String, Option<String>)>,
) -> Result<Arc<Broadcast>> {
    let (conn, initial) = registration::connect(server, identity, channels).await?;
    Ok(Broadcast::start(conn, initial))
}

/// Supervisor over all accounts known to the store
pub struct Supervisor<S> {
    store: S,
    connections: RwLock<ConnectionMap>,
}

impl<S: Store> Supervisor<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            connections: RwLock::new(ConnectionMap::new()),
        }
    }

    /// Snapshot of the current connection map
    pub async fn connections(&self) -> ConnectionMap {
        self.connections.read().await.clone()
    }

    /// Refresh the connection map: connect every account/network pair the
    /// store names that has no live hub yet. Individual connect failures
    /// are logged and skipped; a store error aborts the cycle and leaves
    /// the previous map untouched.
    pub async fn reconnect_all(&self) -> Result<()> {
        let existing = self.connections.read().await.clone();
        let next = self.refresh_map(existing).await?;
        *self.connections.write().await = next;
        Ok(())
    }

    async fn refresh_map(&self, mut map: ConnectionMap) -> Result<ConnectionMap> {
        for account in self.store.select_accounts().await? {
            for (network, server) in self.store.select_servers_to_reconnect(account).await? {
                let live = map
                    .get(&account)
                    .and_then(|networks| networks.get(&network))
                    .map(|hub| hub.is_open())
                    .unwrap_or(false);
                if live {
                    continue;
                }
                let identity = match self.store.select_network_identity(account, network).await? {
                    Some(identity) => identity,
                    None => {
                        tracing::warn!(
                            account = %account,
                            network = %network,
                            "no identity configured, skipping network"
                        );
                        continue;
                    }
                };
                let channels = self.store.select_channels(account, network).await?;
                match start_broadcasting(&identity, &server, channels).await {
                    Ok(hub) => {
                        tracing::info!(
                            account = %account,
                            network = %network,
                            server = %server,
                            "connection established"
                        );
                        map.entry(account).or_default().insert(network, hub);
                    }
                    Err(e) => {
                        tracing::warn!(
                            account = %account,
                            network = %network,
                            server = %server,
                            "connect failed: {}",
                            e
                        );
                    }
                }
            }
        }
        Ok(map)
    }

    /// Consume account events until the queue closes. Subscriber problems
    /// never terminate the loop.
    pub async fn run_events(&self, mut events: mpsc::Receiver<AccountEvent>) {
        while let Some(event) = events.recv().await {
            match event.payload {
                AccountPayload::ClientConnected { client, handler } => {
                    let map = self.connections.read().await;
                    match map.get(&event.account) {
                        Some(networks) => {
                            for hub in networks.values() {
                                hub.subscribe_as(client, Arc::clone(&handler));
                            }
                        }
                        None => {
                            tracing::debug!(
                                account = %event.account,
                                "client connected for account without connections"
                            );
                        }
                    }
                }
                AccountPayload::ClientDisconnected { client } => {
                    let map = self.connections.read().await;
                    if let Some(networks) = map.get(&event.account) {
                        for hub in networks.values() {
                            hub.unsubscribe(client);
                        }
                    }
                }
            }
        }
        tracing::debug!("account event queue closed");
    }

    /// Periodically re-run `reconnect_all`, picking up dropped connections.
    pub async fn run_refresh_loop(&self, interval: Duration) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick fires immediately; the initial refresh already ran.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            if let Err(e) = self.reconnect_all().await {
                tracing::error!("connection refresh failed: {}", e);
            }
        }
    }

    /// Stop every hub, sending QUIT with `reason` where still connected.
    pub async fn stop_all(&self, reason: &str) {
        let map = self.connections.read().await;
        for networks in map.values() {
            for hub in networks.values() {
                hub.stop(Some(reason));
            }
        }
    }
}
