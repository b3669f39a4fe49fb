//! HTTP surface and process bootstrap.
//!
//! [`ConfigServer`] wires the change log, notification hub, file cache, edit
//! lock and change scanner together and serves them over HTTP:
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET` | `/notifications/v2` | Long poll for namespace changes |
//! | `GET` | `/configfiles/{tenant}/{cluster}/{namespace}` | Config file as `key=value` lines |
//! | `GET` | `/configfiles/json/{tenant}/{cluster}/{namespace}` | Config file as a JSON object |
//! | `GET` | `/namespaces/{tenant}/{cluster}/{namespace}/lock` | Current edit lock owner |
//! | `GET` | `/services/config` | Serving instances |

mod api;
mod builder;

pub use builder::ConfigServerBuilder;

use crate::cache::ConfigFileCache;
use crate::changelog::ChangeLog;
use crate::content::NamespaceContent;
use crate::core::{ChangeEvent, Topic};
use crate::error::Result;
use crate::lock::EditLock;
use crate::notify::{ChangeScanner, NotificationHub};
use crate::settings::RelaySettings;
use axum::Router;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// A running set of server-side components.
///
/// Background tasks (change-log pruning, wake-up batching, change scanning)
/// stop when [`shutdown`](Self::shutdown) is called or the server is dropped.
///
/// # Examples
///
/// ```rust,no_run
/// use hotswap_relay::server::ConfigServer;
/// use hotswap_relay::settings::RelaySettings;
///
/// # async fn example() -> hotswap_relay::error::Result<()> {
/// let server = ConfigServer::builder(RelaySettings::default()).build()?;
/// let event = server.record_release("shop", "default", "application")?;
/// println!("released as sequence {}", event.sequence);
/// # Ok(())
/// # }
/// ```
pub struct ConfigServer {
    settings: RelaySettings,
    change_log: ChangeLog,
    hub: Arc<NotificationHub>,
    cache: Arc<ConfigFileCache>,
    scanner: Arc<ChangeScanner>,
    lock: EditLock,
    content: Arc<dyn NamespaceContent>,
    shutdown: CancellationToken,
}

impl ConfigServer {
    /// Start building a server.
    pub fn builder(settings: RelaySettings) -> ConfigServerBuilder {
        ConfigServerBuilder::new(settings)
    }

    /// Settings the server was built with.
    pub fn settings(&self) -> &RelaySettings {
        &self.settings
    }

    /// The change log.
    pub fn change_log(&self) -> &ChangeLog {
        &self.change_log
    }

    /// The notification hub.
    pub fn hub(&self) -> &Arc<NotificationHub> {
        &self.hub
    }

    /// The config file cache.
    pub fn cache(&self) -> &Arc<ConfigFileCache> {
        &self.cache
    }

    /// The edit lock.
    pub fn lock(&self) -> &EditLock {
        &self.lock
    }

    /// Namespace content the lock and lock endpoint read.
    pub fn content(&self) -> &Arc<dyn NamespaceContent> {
        &self.content
    }

    /// Record that a namespace was published.
    ///
    /// Frees the namespace's edit lock and appends a change event for its
    /// topic. Parked clients are woken once the scanner picks the event up.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock cannot be released or the append fails.
    pub fn record_release(&self, tenant: &str, cluster: &str, namespace: &str) -> Result<ChangeEvent> {
        let name = match self.content.find_namespace(tenant, cluster, namespace)? {
            Some(found) => {
                self.lock.release(found.id)?;
                found.name
            }
            None => namespace.to_string(),
        };
        self.change_log.append(&Topic::new(tenant, cluster, &name))
    }

    /// Deliver pending change events now instead of waiting for the next
    /// scan tick.
    ///
    /// # Errors
    ///
    /// Returns an error if the change log cannot be read.
    pub fn scan_now(&self) -> Result<usize> {
        self.scanner.scan_once()
    }

    /// Router serving every endpoint.
    pub fn router(self: &Arc<Self>) -> Router {
        api::router(Arc::clone(self))
    }

    /// Bind the configured address and serve until shutdown.
    ///
    /// # Errors
    ///
    /// Returns an error if the address cannot be bound or serving fails.
    pub async fn serve(self) -> Result<()> {
        let listener = TcpListener::bind(self.settings.server.bind.as_str()).await?;
        Arc::new(self).serve_with_listener(listener).await
    }

    /// Serve on an already bound listener until shutdown.
    ///
    /// # Errors
    ///
    /// Returns an error if serving fails.
    pub async fn serve_with_listener(self: Arc<Self>, listener: TcpListener) -> Result<()> {
        info!(addr = %listener.local_addr()?, "Config server listening");
        let shutdown = self.shutdown.clone();
        axum::serve(listener, self.router())
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await?;
        info!("Config server stopped");
        Ok(())
    }

    /// Stop serving and stop every background task.
    pub fn shutdown(&self) {
        debug!("Config server shutting down");
        self.shutdown.cancel();
    }
}

impl Drop for ConfigServer {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}
