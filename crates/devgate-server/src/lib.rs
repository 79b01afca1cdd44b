//! # devgate-server
//!
//! Runtime wiring for the `devgate` binary.
//!
//! The [`Gateway`] owns the device registry, the metric families and the
//! health counters, and connects the rehasher to the service discovery
//! monitor so that devices hashed to another gateway instance are
//! disconnected when membership changes.
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use devgate_device::{ChannelSink, Id};
//! use devgate_discovery::DiscoveryOptions;
//! use devgate_server::{Gateway, GatewayConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut config = GatewayConfig::default();
//!     config.discovery = DiscoveryOptions::default()
//!         .with_fixed(["gw-1:8080", "gw-2:8080"])
//!         .with_registrations(["gw-1:8080"]);
//!
//!     let gateway = Gateway::new(config, None)?;
//!     let (sink, _payloads) = ChannelSink::new(16);
//!     let _connection = gateway.attach(Id::parse("mac:11:22:33:44:55:66")?, sink)?;
//!
//!     gateway.run_until(devgate_server::signal::shutdown_signal()).await;
//!     Ok(())
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod gateway;
pub mod logging;
pub mod signal;

pub use config::{DeviceConfig, GatewayConfig, LogConfig};
pub use error::{ServerError, ServerResult};
pub use gateway::{Connection, Gateway, GatewayStatus, CONNECTION_CLOSED, GATEWAY_SHUTDOWN};
