//! tor_postgres: PostgreSQL adapters for the tor_core port traits.
//!
//! All SQL is runtime-checked (`sqlx::query_as`, not `query!`) so the crate
//! builds without a live database.

mod error;
mod rows;
pub mod seed;
pub mod store;

use sqlx::PgPool;

pub use store::{PgDirectoryStore, PgDocumentStore, PgHistoryStore, PgWorkflowStore};

/// Every store, sharing one pool.
pub struct PgStores {
    pub directory: PgDirectoryStore,
    pub workflows: PgWorkflowStore,
    pub documents: PgDocumentStore,
    pub history: PgHistoryStore,
}

impl PgStores {
    pub fn new(pool: PgPool) -> Self {
        Self {
            directory: PgDirectoryStore::new(pool.clone()),
            workflows: PgWorkflowStore::new(pool.clone()),
            documents: PgDocumentStore::new(pool.clone()),
            history: PgHistoryStore::new(pool),
        }
    }
}

/// Apply embedded migrations.
pub async fn migrate(pool: &PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("./migrations").run(pool).await
}
