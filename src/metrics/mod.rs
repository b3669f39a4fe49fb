//! Built-in metrics for the relay.
//!
//! Provides OpenTelemetry metrics tracking:
//! - Parked long polls and their outcomes
//! - Wake-ups, including those handed to the batch worker
//! - Config file cache hits, misses and invalidations
//!
//! # Examples
//!
//! ```rust,no_run
//! use hotswap_relay::metrics::RelayMetrics;
//! use hotswap_relay::server::ConfigServer;
//! use hotswap_relay::settings::RelaySettings;
//! use opentelemetry::global;
//!
//! # async fn example() -> hotswap_relay::error::Result<()> {
//! let server = ConfigServer::builder(RelaySettings::default())
//!     .with_metrics(RelayMetrics::new(global::meter("my-relay")))
//!     .build()?;
//! server.serve().await?;
//! # Ok(())
//! # }
//! ```

mod relay_metrics;

pub use relay_metrics::RelayMetrics;
