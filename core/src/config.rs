//! Configuration management
//!
//! TOML configuration for the gateway daemon: one `[[accounts]]` block per
//! account, each with the networks to keep connected and the identity to
//! register with. The parsed configuration builds the in-memory store the
//! supervisor queries.

use crate::store::{AccountId, NetworkId, NetworkRecord, StaticStore};
use crate::{Error, Identity, Result, ServerSpec};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

fn default_reconnect_interval() -> u64 {
    60
}

/// Daemon configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// General daemon settings
    #[serde(default)]
    pub general: GeneralConfig,
    /// Accounts to serve
    #[serde(default)]
    pub accounts: Vec<AccountConfig>,
}

/// General daemon settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Seconds between supervisor refresh cycles
    #[serde(default = "default_reconnect_interval")]
    pub reconnect_interval_secs: u64,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            reconnect_interval_secs: default_reconnect_interval(),
        }
    }
}

/// One account and its networks
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountConfig {
    /// Account identifier
    pub id: u64,
    /// Networks this account keeps connections to
    #[serde(default)]
    pub networks: Vec<NetworkConfig>,
}

/// One network of one account
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Network identifier, unique within the account
    pub id: u64,
    /// Server endpoint
    pub server: ServerSpec,
    /// Registration identity
    pub identity: Identity,
    /// Channels to join after registration
    #[serde(default)]
    pub channels: Vec<ChannelConfig>,
}

/// One channel with its optional join key
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelConfig {
    pub name: String,
    #[serde(default)]
    pub key: Option<String>,
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| Error::Config(format!("failed to read config file: {}", e)))?;
        toml::from_str(&content)
            .map_err(|e| Error::Config(format!("failed to parse config file: {}", e)))
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        let mut account_ids = HashSet::new();
        for account in &self.accounts {
            if !account_ids.insert(account.id) {
                return Err(Error::Config(format!("duplicate account id {}", account.id)));
            }
            let mut network_ids = HashSet::new();
            for network in &account.networks {
                if !network_ids.insert(network.id) {
                    return Err(Error::Config(format!(
                        "duplicate network id {} in account {}",
                        network.id, account.id
                    )));
                }
                if network.server.host.is_empty() {
                    return Err(Error::Config(format!(
                        "network {} in account {} has an empty server host",
                        network.id, account.id
                    )));
                }
                if network.server.port == 0 {
                    return Err(Error::Config(format!(
                        "network {} in account {} has port 0",
                        network.id, account.id
                    )));
                }
                if network.identity.nick.is_empty() {
                    return Err(Error::Config(format!(
                        "network {} in account {} has an empty nick",
                        network.id, account.id
                    )));
                }
                if network.identity.user_name.is_empty() {
                    return Err(Error::Config(format!(
                        "network {} in account {} has an empty user name",
                        network.id, account.id
                    )));
                }
            }
        }
        Ok(())
    }

    /// Build the in-memory store the supervisor queries
    pub fn build_store(&self) -> StaticStore {
        let mut store = StaticStore::new();
        for account in &self.accounts {
            for network in &account.networks {
                store.insert(
                    AccountId(account.id),
                    NetworkId(network.id),
                    NetworkRecord {
                        server: network.server.clone(),
                        identity: network.identity.clone(),
                        channels: network
                            .channels
                            .iter()
                            .map(|c| (c.name.clone(), c.key.clone()))
                            .collect(),
                    },
                );
            }
        }
        store
    }
}
