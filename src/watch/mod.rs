//! Watch-key resolution and namespace-name normalization.
//!
//! Both need to know who owns a namespace, which comes from a
//! [`NamespaceCatalog`].

mod catalog;
mod normalizer;
mod resolver;

pub use catalog::{AppNamespace, InMemoryCatalog, NamespaceCatalog};
pub use normalizer::NamespaceNormalizer;
pub use resolver::{WatchKeyResolver, WatchKeys, topics_for};
