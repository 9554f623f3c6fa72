//! registry-server
//!
//! Multi-client async TCP server for the remote management registry.

pub mod config;
pub mod server;
pub mod session;
pub mod types;

// these are internal modules, not re-exported
mod framing;
mod handlers;
mod notifications;
