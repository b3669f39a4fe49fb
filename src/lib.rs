//! # hotswap-relay
//!
//! Change propagation for centrally managed configuration.
//!
//! ## Overview
//!
//! `hotswap-relay` carries a configuration edit from the moment it is
//! published to every client watching it:
//! - An append-only change log keyed by topic, pruned in the background
//! - Watch-key resolution, including fan-out of shared (public) namespaces
//! - A notification hub that parks long polls and wakes them in batches
//! - A reactive cache of rendered config files, invalidated by the same events
//! - A per-namespace edit lock backed by a uniqueness constraint
//! - A client that resolves configuration through remote, disk, bundled and
//!   default tiers and keeps it current
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use hotswap_relay::prelude::*;
//!
//! # async fn example() -> hotswap_relay::error::Result<()> {
//! // Server side: load settings and serve long polls and config files
//! let settings: RelaySettings = SettingsLoader::new()
//!     .with_file("config/relay.yaml")
//!     .with_env_overrides("RELAY", "__")
//!     .load()?;
//! let server = ConfigServer::builder(settings).build()?;
//! server.record_release("shop", "default", "application")?;
//!
//! // Client side: resolve a namespace and watch it
//! let mut client_settings = ClientSettings::for_tenant("shop");
//! client_settings.config_services = vec!["http://localhost:8080".to_string()];
//! let client = ConfigClient::builder(client_settings).build().await?;
//! let config = client.namespace("application").await?;
//! println!("timeout = {}", config.get_or("timeout", "30"));
//! # Ok(())
//! # }
//! ```
//!
//! ## Feature Flags
//!
//! - `server` (default): HTTP endpoints and the [`server::ConfigServer`] bootstrap
//! - `client` (default): the client resolver chain
//! - `sqlite`: durable change log and lock table
//! - `metrics`: OpenTelemetry instruments
//!
//! ```toml
//! [dependencies]
//! hotswap-relay = { version = "0.1", features = ["sqlite", "metrics"] }
//! ```

#![warn(missing_docs, rust_2024_compatibility)]
#![deny(unsafe_code)]

pub mod cache;
pub mod changelog;
pub mod content;
pub mod core;
pub mod error;
pub mod lock;
pub mod notify;
pub mod settings;
pub mod store;
pub mod watch;

#[cfg(feature = "server")]
pub mod server;

#[cfg(feature = "client")]
pub mod client;

#[cfg(feature = "metrics")]
pub mod metrics;

/// Convenient re-exports for common usage patterns.
pub mod prelude {
    pub use crate::changelog::ChangeLog;
    pub use crate::core::{ChangeEvent, Notification, Topic, WatchedNamespace};
    pub use crate::error::{RelayError, Result};
    pub use crate::lock::EditLock;
    pub use crate::notify::{NotificationHub, PollOutcome, PollRequest};
    pub use crate::settings::{ClientSettings, RelaySettings, SettingsLoader};
    pub use crate::store::{ChangeLogStore, LockStore, MemoryStore};

    #[cfg(feature = "server")]
    pub use crate::server::ConfigServer;

    #[cfg(feature = "client")]
    pub use crate::client::{ConfigClient, NamespaceConfig, SourceKind};

    #[cfg(feature = "sqlite")]
    pub use crate::store::SqliteStore;
}
