//! External account store
//!
//! The gateway does not own account data; it queries an external store for
//! the accounts to serve, the servers each account should be connected to,
//! and the identity to register with. All queries are idempotent. Any store
//! error aborts the supervisor's current refresh cycle.

use crate::{Identity, Result, ServerSpec};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Opaque account identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountId(pub u64);

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "account:{}", self.0)
    }
}

/// Opaque network identifier, scoped to an account
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NetworkId(pub u64);

impl fmt::Display for NetworkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "network:{}", self.0)
    }
}

/// Queries the supervisor needs from the account store
#[async_trait]
pub trait Store: Send + Sync {
    /// All accounts the gateway should serve
    async fn select_accounts(&self) -> Result<Vec<AccountId>>;

    /// Servers an account wants connections to
    async fn select_servers_to_reconnect(
        &self,
        account: AccountId,
    ) -> Result<Vec<(NetworkId, ServerSpec)>>;

    /// Registration identity for one account on one network
    async fn select_network_identity(
        &self,
        account: AccountId,
        network: NetworkId,
    ) -> Result<Option<Identity>>;

    /// Channels (with optional keys) to join after registration
    async fn select_channels(
        &self,
        account: AccountId,
        network: NetworkId,
    ) -> Result<Vec<(String, Option<String>)>>;
}

/// One account's configuration for one network
#[derive(Debug, Clone)]
pub struct NetworkRecord {
    pub server: ServerSpec,
    pub identity: Identity,
    pub channels: Vec<(String, Option<String>)>,
}

/// In-memory store, typically built from the configuration file. Doubles as
/// the test fixture for the supervisor.
#[derive(Debug, Clone, Default)]
pub struct StaticStore {
    accounts: HashMap<AccountId, HashMap<NetworkId, NetworkRecord>>,
}

impl StaticStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, account: AccountId, network: NetworkId, record: NetworkRecord) {
        self.accounts
            .entry(account)
            .or_default()
            .insert(network, record);
    }

    pub fn record(&self, account: AccountId, network: NetworkId) -> Option<&NetworkRecord> {
        self.accounts
            .get(&account)
            .and_then(|networks| networks.get(&network))
    }
}

#[async_trait]
impl Store for StaticStore {
    async fn select_accounts(&self) -> Result<Vec<AccountId>> {
        let mut accounts: Vec<AccountId> = self.accounts.keys().copied().collect();
        accounts.sort_by_key(|a| a.0);
        Ok(accounts)
    }

    async fn select_servers_to_reconnect(
        &self,
        account: AccountId,
    ) -> Result<Vec<(NetworkId, ServerSpec)>> {
        let mut servers: Vec<(NetworkId, ServerSpec)> = self
            .accounts
            .get(&account)
            .map(|networks| {
                networks
                    .iter()
                    .map(|(id, record)| (*id, record.server.clone()))
                    .collect()
            })
            .unwrap_or_default();
        servers.sort_by_key(|(id, _)| id.0);
        Ok(servers)
    }

    async fn select_network_identity(
        &self,
        account: AccountId,
        network: NetworkId,
    ) -> Result<Option<Identity>> {
        Ok(self
            .accounts
            .get(&account)
            .and_then(|networks| networks.get(&network))
            .map(|record| record.identity.clone()))
    }

    async fn select_channels(
        &self,
        account: AccountId,
        network: NetworkId,
    ) -> Result<Vec<(String, Option<String>)>> {
        Ok(self
            .accounts
            .get(&account)
            .and_then(|networks| networks.get(&network))
            .map(|record| record.channels.clone())
            .unwrap_or_default())
    }
}
