//! Edge servers, their heartbeats and per-application settings.

pub mod heartbeat;
pub mod server;
pub mod vhost;
