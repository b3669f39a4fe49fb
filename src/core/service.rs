//! Service discovery wire type.

use serde::{Deserialize, Serialize};

/// A serving instance advertised by `/services/config`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceInstance {
    /// Base URL the instance answers on
    pub homepage_url: String,
}

impl ServiceInstance {
    /// Create an instance entry.
    pub fn new(homepage_url: impl Into<String>) -> Self {
        Self {
            homepage_url: homepage_url.into(),
        }
    }
}
