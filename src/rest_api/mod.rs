//! REST API module for external integrations
//!
//! Provides a read-only HTTP API over the managed VirtualDatabases, plus the
//! health and Prometheus endpoints.

mod dto;
mod handlers;
mod server;

pub use server::{router, run_server};
