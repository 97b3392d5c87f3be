//! Database module for pingmon.
//!
//! One storage contract ([`ResultStore`]) with an embedded SQLite backend and
//! a client/server PostgreSQL backend.

mod models;
mod postgres;
mod sqlite;
mod store;

pub use models::*;
pub use postgres::*;
pub use sqlite::*;
pub use store::*;

use std::sync::Arc;

/// Which backend a database location refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    Sqlite,
    Postgres,
}

/// Open the configured backend behind the shared storage contract.
pub async fn open_store(
    backend: Backend,
    location: &str,
) -> Result<Arc<dyn ResultStore>, StoreError> {
    let store: Arc<dyn ResultStore> = match backend {
        Backend::Sqlite => Arc::new(SqliteStore::new(location)?),
        Backend::Postgres => Arc::new(PostgresStore::connect(location).await?),
    };
    tracing::debug!("Opened {:?} store", backend);
    Ok(store)
}
