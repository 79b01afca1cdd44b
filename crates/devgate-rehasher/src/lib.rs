//! # devgate-rehasher
//!
//! Keeps connected devices on the gateway instance that owns them.
//!
//! The [`Rehasher`] is a service discovery [`Listener`](devgate_discovery::Listener).
//! On every membership snapshot it asks a consistent-hash accessor which
//! instance owns each connected device and disconnects the devices that now
//! belong elsewhere. When discovery reports an error, stops, or has no
//! instances at all, ownership is undefined and every device is disconnected.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod rehasher;

pub use error::{RehashError, Result};
pub use rehasher::{
    DisconnectAllReason, RehashReport, Rehasher, RehasherBuilder, REHASH_OTHER_INSTANCE,
};
