//! IRC gateway core
//!
//! This crate provides the connection engine for a multi-account IRC
//! gateway: per-connection registration and dispatch, a broadcast hub that
//! fans each connection's structured message stream out to frontend
//! subscribers, and a supervisor that keeps the configured set of
//! connections alive.

pub mod broadcast;
pub mod config;
pub mod connection;
pub mod debug_log;
pub mod error;
pub mod event;
pub mod identity;
pub mod incoming;
pub mod message;
pub mod numeric;
pub mod registration;
pub mod store;
pub mod supervisor;
pub mod transport;

#[cfg(test)]
mod tests;

pub use broadcast::{Broadcast, Subscriber};
pub use config::Config;
pub use connection::{Connection, ConnectionStats, ConnectionStatus, StatsSnapshot, StatusCell};
pub use debug_log::{DebugEntry, DebugLog, Severity};
pub use error::{Error, Result};
pub use event::{Event, NameEntry, UserFlag};
pub use identity::{Identity, ServerSpec, TlsMode};
pub use incoming::{dispatch, resolve, Effects, IncomingResult};
pub use message::{Command, Message, Prefix};
pub use numeric::NumericReply;
pub use registration::RegistrationState;
pub use store::{AccountId, NetworkId, NetworkRecord, StaticStore, Store};
pub use supervisor::{
    start_broadcasting, AccountEvent, AccountPayload, ConnectionMap, NetworkMap, Supervisor,
};
pub use transport::Transport;

/// Re-exports for convenience
pub use async_trait::async_trait;
pub use tracing::{debug, error, info, warn};
