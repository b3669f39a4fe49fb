//! Calls to the config service.

use super::locator::ServiceLocator;
use crate::core::{Notification, WatchedNamespace};
use crate::error::{RelayError, Result};
use crate::settings::ClientSettings;
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Remote operations the resolver chain depends on.
#[async_trait]
pub trait ConfigApi: Send + Sync {
    /// Current released properties of `namespace`.
    ///
    /// Returns [`RelayError::NamespaceNotFound`] when the service has no
    /// release for it.
    async fn fetch(&self, namespace: &str) -> Result<BTreeMap<String, String>>;

    /// Long poll. `Ok(None)` means nothing changed within the server's
    /// horizon.
    async fn poll(&self, watched: &[WatchedNamespace]) -> Result<Option<Vec<Notification>>>;
}

/// [`ConfigApi`] over HTTP against discovered config services.
pub struct HttpConfigApi {
    locator: Arc<ServiceLocator>,
    http: Client,
    long_poll_http: Client,
    tenant: String,
    cluster: String,
    region: Option<String>,
    client_ip: Option<String>,
}

impl HttpConfigApi {
    /// Build the HTTP clients from `settings`.
    ///
    /// # Errors
    ///
    /// Returns an error if an HTTP client cannot be constructed.
    pub fn new(settings: &ClientSettings, locator: Arc<ServiceLocator>) -> Result<Self> {
        let connect_timeout = Duration::from_millis(settings.connect_timeout_ms);
        let http = build_client(
            connect_timeout,
            Duration::from_millis(settings.read_timeout_ms),
        )?;
        let long_poll_http = build_client(
            connect_timeout,
            Duration::from_secs(settings.long_poll_read_timeout_secs),
        )?;

        Ok(Self {
            locator,
            http,
            long_poll_http,
            tenant: settings.tenant.clone(),
            cluster: settings.cluster.clone(),
            region: settings.region.clone(),
            client_ip: settings.client_ip.clone(),
        })
    }

    /// Base URLs in random order, spreading load across instances.
    fn shuffled_services(&self) -> Result<Vec<String>> {
        let mut services = self.locator.services().as_ref().clone();
        if services.is_empty() {
            return Err(RelayError::Remote(
                "No config service available".to_string(),
            ));
        }
        fastrand::shuffle(&mut services);
        Ok(services)
    }

    fn with_client_params(&self, mut request: RequestBuilder) -> RequestBuilder {
        if let Some(region) = &self.region {
            request = request.query(&[("region", region.as_str())]);
        }
        if let Some(ip) = &self.client_ip {
            request = request.query(&[("ip", ip.as_str())]);
        }
        request
    }
}

#[async_trait]
impl ConfigApi for HttpConfigApi {
    async fn fetch(&self, namespace: &str) -> Result<BTreeMap<String, String>> {
        let mut last_error = None;
        for base in self.shuffled_services()? {
            let url = format!(
                "{}/configfiles/json/{}/{}/{}",
                base, self.tenant, self.cluster, namespace
            );
            let request = self.with_client_params(self.http.get(&url));

            let response = match request.send().await {
                Ok(response) => response,
                Err(err) => {
                    debug!(url = %url, error = %err, "Config fetch failed, trying next service");
                    last_error = Some(RelayError::Remote(format!("Config fetch failed: {}", err)));
                    continue;
                }
            };

            return match response.status() {
                status if status.is_success() => response.json().await.map_err(|e| {
                    RelayError::Deserialization(format!("Invalid config payload: {}", e))
                }),
                StatusCode::NOT_FOUND => Err(RelayError::NamespaceNotFound(namespace.to_string())),
                status => Err(RelayError::Remote(format!(
                    "Config fetch failed with status {}",
                    status
                ))),
            };
        }

        Err(last_error.unwrap_or_else(|| RelayError::Remote("Config fetch failed".to_string())))
    }

    async fn poll(&self, watched: &[WatchedNamespace]) -> Result<Option<Vec<Notification>>> {
        let services = self.shuffled_services()?;
        let base = &services[0];
        let notifications = serde_json::to_string(watched)?;

        let request = self
            .long_poll_http
            .get(format!("{}/notifications/v2", base))
            .query(&[
                ("tenant", self.tenant.as_str()),
                ("cluster", self.cluster.as_str()),
                ("notifications", notifications.as_str()),
            ]);
        let response = self
            .with_client_params(request)
            .send()
            .await
            .map_err(|e| RelayError::Remote(format!("Long poll failed: {}", e)))?;

        match response.status() {
            StatusCode::NOT_MODIFIED => Ok(None),
            status if status.is_success() => {
                let notifications = response.json().await.map_err(|e| {
                    RelayError::Deserialization(format!("Invalid notification payload: {}", e))
                })?;
                Ok(Some(notifications))
            }
            status => Err(RelayError::Remote(format!(
                "Long poll failed with status {}",
                status
            ))),
        }
    }
}

fn build_client(connect_timeout: Duration, timeout: Duration) -> Result<Client> {
    Client::builder()
        .connect_timeout(connect_timeout)
        .timeout(timeout)
        .build()
        .map_err(|e| RelayError::Remote(format!("Failed to build HTTP client: {}", e)))
}
