//! # devgate-discovery
//!
//! Service discovery for the devgate device gateway.
//!
//! Discovery backends publish instance lists through [`Instancer`]s. A
//! [`Monitor`] watches every instancer and turns each change into an
//! [`Event`] that is dispatched to [`Listener`]s. Listeners that need to know
//! which instance owns a device build an [`Accessor`] from the event's
//! instances with an [`AccessorFactory`].
//!
//! ```text
//!  Instancer ──watch──▶ Monitor ──Event──▶ Listeners
//!                                           │
//!                                           ├─▶ MetricsListener
//!                                           └─▶ Rehasher (devgate-rehasher)
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use devgate_discovery::{DiscoveryOptions, Environment, ListenerFunc, Monitor, Event};
//!
//! # async fn example() -> devgate_discovery::Result<()> {
//! let options = DiscoveryOptions::default()
//!     .with_fixed(["talaria-0:8080", "talaria-1:8080"])
//!     .with_registrations(["talaria-0:8080"]);
//!
//! let environment = Environment::from_options(&options, None)?;
//!
//! let monitor = Monitor::builder()
//!     .environment(&environment)
//!     .listener(Arc::new(ListenerFunc::new(|event: &Event| {
//!         println!("{event}");
//!     })))
//!     .start();
//!
//! monitor.stop();
//! monitor.stopped().await;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod accessor;
pub mod environment;
pub mod error;
pub mod instancer;
pub mod listener;
pub mod metrics_listener;
pub mod monitor;
pub mod types;

pub use accessor::{
    Accessor, AccessorFactory, ConsistentAccessor, ConsistentAccessorFactory, EmptyAccessor,
    DEFAULT_VNODE_COUNT,
};
pub use environment::{BackendFactory, DiscoveryOptions, Environment, FIXED_SERVICE};
pub use error::{AccessorError, DiscoveryError, Result};
pub use instancer::{DynamicInstancer, FixedInstancer, Instancer};
pub use listener::{Listener, ListenerFunc, Listeners};
pub use metrics_listener::MetricsListener;
pub use monitor::{Monitor, MonitorBuilder};
pub use types::{normalize_instance, normalize_instances, Event, InstancerState, DEFAULT_SCHEME};
