//! Reactive cache of rendered config files.
//!
//! Rendering a namespace is delegated to a [`ReleaseRenderer`]; the cache
//! keeps the rendered text and drops it as soon as a change event arrives
//! for any topic the entry depends on. Clients matched by a gray rule are
//! never served from, or written into, the cache.

mod file_cache;

pub use file_cache::ConfigFileCache;

use crate::core::properties;
use crate::error::Result;
use std::collections::BTreeMap;

/// Encoding of a served config file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutputFormat {
    /// Line-oriented `key=value`
    Properties,
    /// A flat JSON object
    Json,
}

impl OutputFormat {
    /// Short name used in cache keys.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Properties => "properties",
            Self::Json => "json",
        }
    }

    /// HTTP content type for the encoding.
    pub fn content_type(self) -> &'static str {
        match self {
            Self::Properties => "text/plain;charset=UTF-8",
            Self::Json => "application/json;charset=UTF-8",
        }
    }

    /// Encode a flat key/value map.
    pub fn render(self, items: &BTreeMap<String, String>) -> Result<String> {
        match self {
            Self::Properties => Ok(properties::render(items)),
            Self::Json => Ok(serde_json::to_string(items)?),
        }
    }
}

/// Decides whether a client is covered by a gray (canary) release.
pub trait GrayPolicy: Send + Sync {
    /// Whether `client_ip` is matched by a gray rule for the namespace.
    fn has_gray_rule(&self, tenant: &str, client_ip: Option<&str>, namespace: &str) -> bool;
}

/// Policy for deployments without gray releases.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoGrayRules;

impl GrayPolicy for NoGrayRules {
    fn has_gray_rule(&self, _tenant: &str, _client_ip: Option<&str>, _namespace: &str) -> bool {
        false
    }
}

/// Produces the effective configuration of a namespace for a client.
pub trait ReleaseRenderer: Send + Sync {
    /// The merged items the client should see, or `None` when the
    /// namespace or its release does not exist.
    fn render(&self, query: &ConfigFileQuery) -> Result<Option<BTreeMap<String, String>>>;
}

/// A request for one config file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigFileQuery {
    /// Requesting tenant
    pub tenant: String,
    /// Cluster to read
    pub cluster: String,
    /// Namespace name; normalized by the cache before use
    pub namespace: String,
    /// Optional region (data center)
    pub region: Option<String>,
    /// Client address, for gray-rule matching
    pub client_ip: Option<String>,
}

impl ConfigFileQuery {
    /// A query without region or client address.
    pub fn new(
        tenant: impl Into<String>,
        cluster: impl Into<String>,
        namespace: impl Into<String>,
    ) -> Self {
        Self {
            tenant: tenant.into(),
            cluster: cluster.into(),
            namespace: namespace.into(),
            region: None,
            client_ip: None,
        }
    }

    /// Set the region.
    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }

    /// Set the client address.
    pub fn with_client_ip(mut self, client_ip: impl Into<String>) -> Self {
        self.client_ip = Some(client_ip.into());
        self
    }
}
