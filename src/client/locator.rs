//! Config service discovery.

use crate::core::ServiceInstance;
use crate::error::{RelayError, Result};
use crate::settings::ClientSettings;
use arc_swap::ArcSwap;
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const DISCOVERY_ATTEMPTS: u32 = 2;

/// Keeps the list of config service base URLs current.
///
/// Explicitly configured URLs are used as-is and never refreshed. Otherwise
/// the meta server's `/services/config` listing is queried; a failed refresh
/// keeps the previous list.
pub struct ServiceLocator {
    services: ArcSwap<Vec<String>>,
    meta_server: Option<String>,
    tenant: String,
    client_ip: Option<String>,
    http: Client,
    retry_interval: Duration,
}

impl ServiceLocator {
    /// Create a locator; no request is made until [`refresh`](Self::refresh).
    pub fn new(settings: &ClientSettings, http: Client) -> Self {
        let explicit: Vec<String> = settings
            .config_services
            .iter()
            .map(|url| trim_url(url))
            .filter(|url| !url.is_empty())
            .collect();
        let meta_server = if explicit.is_empty() {
            settings.meta_server.as_deref().map(trim_url)
        } else {
            None
        };

        Self {
            services: ArcSwap::from_pointee(explicit),
            meta_server,
            tenant: settings.tenant.clone(),
            client_ip: settings.client_ip.clone(),
            http,
            retry_interval: Duration::from_millis(settings.retry_interval_ms),
        }
    }

    /// Current base URLs.
    pub fn services(&self) -> Arc<Vec<String>> {
        self.services.load_full()
    }

    /// Whether the list comes from a meta server.
    pub fn is_discovering(&self) -> bool {
        self.meta_server.is_some()
    }

    /// Re-read the service list from the meta server.
    ///
    /// # Errors
    ///
    /// Returns an error if every attempt failed or the listing was empty;
    /// the previous list stays in place.
    pub async fn refresh(&self) -> Result<()> {
        let Some(meta_server) = &self.meta_server else {
            return Ok(());
        };

        let mut last_error = None;
        for attempt in 1..=DISCOVERY_ATTEMPTS {
            match self.discover(meta_server).await {
                Ok(urls) if !urls.is_empty() => {
                    debug!(services = ?urls, "Discovered config services");
                    self.services.store(Arc::new(urls));
                    return Ok(());
                }
                Ok(_) => {
                    last_error = Some(RelayError::Remote(format!(
                        "No config service listed by {}",
                        meta_server
                    )));
                }
                Err(err) => last_error = Some(err),
            }
            if attempt < DISCOVERY_ATTEMPTS {
                tokio::time::sleep(self.retry_interval).await;
            }
        }

        Err(last_error
            .unwrap_or_else(|| RelayError::Remote("Service discovery failed".to_string())))
    }

    async fn discover(&self, meta_server: &str) -> Result<Vec<String>> {
        let mut request = self
            .http
            .get(format!("{}/services/config", meta_server))
            .query(&[("tenant", self.tenant.as_str())]);
        if let Some(ip) = &self.client_ip {
            request = request.query(&[("ip", ip.as_str())]);
        }

        let response = request
            .send()
            .await
            .map_err(|e| RelayError::Remote(format!("Discovery request failed: {}", e)))?;
        let status = response.status();
        if !status.is_success() {
            return Err(RelayError::Remote(format!(
                "Discovery request failed with status {}",
                status
            )));
        }

        let instances: Vec<ServiceInstance> = response
            .json()
            .await
            .map_err(|e| RelayError::Deserialization(format!("Invalid service listing: {}", e)))?;
        Ok(instances
            .iter()
            .map(|instance| trim_url(&instance.homepage_url))
            .filter(|url| !url.is_empty())
            .collect())
    }

    /// Refresh on a fixed interval until `shutdown` is cancelled.
    pub fn spawn_refresh(
        self: Arc<Self>,
        interval: Duration,
        shutdown: CancellationToken,
    ) -> Option<JoinHandle<()>> {
        if !self.is_discovering() {
            return None;
        }
        Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                if let Err(err) = self.refresh().await {
                    warn!(error = %err, "Config service discovery refresh failed");
                }
            }
            info!("Service discovery refresh stopped");
        }))
    }
}

fn trim_url(url: &str) -> String {
    url.trim().trim_end_matches('/').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_explicit_services_skip_discovery() {
        let mut settings = ClientSettings::for_tenant("shop");
        settings.config_services = vec!["http://config-1:8080/".to_string(), " ".to_string()];
        settings.meta_server = Some("http://meta:8080".to_string());

        let locator = ServiceLocator::new(&settings, Client::new());
        assert!(!locator.is_discovering());
        assert_eq!(*locator.services(), vec!["http://config-1:8080".to_string()]);
    }

    #[tokio::test]
    async fn test_refresh_without_meta_server_is_noop() {
        let locator = ServiceLocator::new(&ClientSettings::for_tenant("shop"), Client::new());
        locator.refresh().await.unwrap();
        assert!(locator.services().is_empty());
    }
}
