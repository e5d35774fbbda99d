//! tor_server: REST surface for the TOR approval workflow.

pub mod config;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod notifier;
pub mod router;
