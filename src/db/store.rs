//! Storage contract shared by the SQLite and PostgreSQL backends.

use std::collections::BTreeMap;
use std::sync::OnceLock;

use async_trait::async_trait;
use chrono::NaiveDateTime;
use regex::Regex;
use thiserror::Error;

use super::models::*;

/// Database error types.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("PostgreSQL error: {0}")]
    Postgres(#[from] tokio_postgres::Error),
    #[error("Migration error: {0}")]
    Migration(String),
    #[error("Invalid IP address format: {0}")]
    InvalidAddress(String),
    #[error("Database connection lock poisoned")]
    Poisoned,
}

/// Persistence operations the engine's caller and the alert tracker rely on.
///
/// Every time argument is a naive local timestamp; windows and cutoffs are
/// computed by the caller so both backends agree on boundaries.
#[async_trait]
pub trait ResultStore: Send + Sync {
    /// Persist one run's outcomes atomically: validate every address, upsert
    /// the host directory, then append to each address's ping history.
    async fn insert_outcomes(&self, outcomes: &[ProbeOutcome]) -> Result<(), StoreError>;

    /// Address to label map from the host directory, sorted by address.
    async fn list_hosts(&self) -> Result<BTreeMap<String, String>, StoreError>;

    /// Aggregate statistics for one address.
    async fn ip_statistics(&self, address: &str) -> Result<IpStatistics, StoreError>;

    /// Full ping history for one address in chronological order.
    async fn ping_history(&self, address: &str) -> Result<Vec<PingRecord>, StoreError>;

    /// Open an alert unless one already exists. Returns whether a row was inserted.
    async fn add_alert(
        &self,
        address: &str,
        label: &str,
        at: NaiveDateTime,
    ) -> Result<bool, StoreError>;

    /// Close any open alert for `address`, recording a recovery in the same
    /// transaction. Returns `None` when no alert was open.
    async fn resolve_alert(
        &self,
        address: &str,
        recovered_at: NaiveDateTime,
    ) -> Result<Option<RecoveryRecord>, StoreError>;

    /// Open alerts created at or after `since`, or all of them.
    async fn active_alerts(
        &self,
        since: Option<NaiveDateTime>,
    ) -> Result<Vec<AlertRecord>, StoreError>;

    /// Recovery records recovered at or after `since`, or all of them.
    async fn recovery_records(
        &self,
        since: Option<NaiveDateTime>,
    ) -> Result<Vec<RecoveryRecord>, StoreError>;

    /// Delete ping history older than `before`. Returns the number of rows removed.
    async fn cleanup(&self, before: NaiveDateTime) -> Result<u64, StoreError>;
}

/// Reject anything that is not a dotted-quad IPv4 address.
///
/// Octets may carry a leading zero (`010.0.0.1`), which `Ipv4Addr` parsing refuses.
pub fn validate_address(address: &str) -> Result<(), StoreError> {
    static IPV4: OnceLock<Regex> = OnceLock::new();
    let re = IPV4.get_or_init(|| {
        Regex::new(r"^((25[0-5]|2[0-4][0-9]|[01]?[0-9][0-9]?)\.){3}(25[0-5]|2[0-4][0-9]|[01]?[0-9][0-9]?)$")
            .unwrap()
    });
    if re.is_match(address) {
        Ok(())
    } else {
        Err(StoreError::InvalidAddress(address.to_string()))
    }
}

/// Check a whole batch before any mutation happens.
pub(crate) fn validate_batch(outcomes: &[ProbeOutcome]) -> Result<(), StoreError> {
    outcomes
        .iter()
        .try_for_each(|o| validate_address(&o.address))
}
