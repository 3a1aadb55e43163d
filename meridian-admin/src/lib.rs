//! Meridian Admin
//!
//! Read-only diagnostics for the edge server pool, served over a Unix socket
//! and reusable by the front server for in-band `/loadbalancer` requests.

mod error;
mod query;
mod server;

pub use error::AdminError;
pub use query::{render, AdminResponse, InfoQuery, SERVER_INFO_KEY};
pub use server::{AdminServer, AdminSettings};
