//! registry-client
//!
//! Client-side RPC engine for the remote management registry:
//! - correlation id management and pending-call handles
//! - the call engine (bounded-wait synchronous remote calls)
//! - version negotiation and the session handshake
//! - the channel receive loop
//! - notification routing to local listeners

pub mod client;
pub mod config;
pub mod error;
pub mod subscriptions;

// Internal engine modules, not re-exported.
mod calls;
mod correlation;
mod dispatch;
mod framing;
mod negotiate;

pub use client::RegistryClient;
pub use config::ClientConfig;
pub use error::RemoteError;
pub use subscriptions::{NotificationListener, Subscription};
