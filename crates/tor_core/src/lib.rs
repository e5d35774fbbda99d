//! tor_core: the TOR approval workflow.
//!
//! Pure domain types, the approval state machine, authorization rules and
//! the port traits storage adapters implement. No sqlx, no axum.
//!
//! Layout:
//! - `types`, `org`, `document`, `history`, `workflow`: data model
//! - `policy`, `engine`: who may act, and what each action does
//! - `ports`, `memory`: storage/notifier seams and the in-memory adapter
//! - `service`: `TorService`, wiring it all together with retries

pub mod document;
pub mod engine;
pub mod error;
pub mod history;
pub mod memory;
pub mod org;
pub mod policy;
pub mod ports;
pub mod principal;
pub mod proto;
pub mod retry;
pub mod seeds;
pub mod service;
pub mod types;
pub mod workflow;

pub use error::TorError;
pub use service::{TorService, TorServiceImpl};
