//! Retention cleanup for ping history.

use chrono::NaiveDateTime;

use crate::alerts::window_start;
use crate::db::{ResultStore, StoreError};

/// Default retention, in days, when cleanup is requested without a value.
pub const DEFAULT_RETENTION_DAYS: u32 = 30;

/// Delete ping history older than `days` days before `now`.
///
/// Returns the number of rows removed. Alerts, recoveries and the host
/// directory are left alone.
pub async fn cleanup_older_than(
    store: &dyn ResultStore,
    days: u32,
    now: NaiveDateTime,
) -> Result<u64, StoreError> {
    let cutoff = window_start(days, now);
    tracing::info!("Cleaning up ping records older than {} days (before {})", days, cutoff);

    let deleted = store.cleanup(cutoff).await?;
    tracing::info!("Retention: deleted {} old ping records", deleted);
    Ok(deleted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{ProbeOutcome, SqliteStore, TIME_FORMAT};
    use chrono::Duration;
    use tempfile::NamedTempFile;

    #[tokio::test]
    async fn test_cleanup_keeps_rows_inside_window() {
        let tmp = NamedTempFile::new().unwrap();
        let store = SqliteStore::new(tmp.path()).unwrap();
        let now = NaiveDateTime::parse_from_str("2024-06-30 12:00:00", TIME_FORMAT).unwrap();

        let mut batch = Vec::new();
        for (ip, age_days) in [("10.0.0.1", 45), ("10.0.0.1", 29), ("10.0.0.2", 31), ("10.0.0.2", 1)] {
            batch.push(ProbeOutcome {
                address: ip.to_string(),
                label: "h".to_string(),
                success: true,
                latency_ms: 1,
                observed_at: now - Duration::days(age_days),
            });
        }
        store.insert_outcomes(&batch).await.unwrap();

        let deleted = cleanup_older_than(&store, DEFAULT_RETENTION_DAYS, now).await.unwrap();
        assert_eq!(deleted, 2);

        for ip in ["10.0.0.1", "10.0.0.2"] {
            let history = store.ping_history(ip).await.unwrap();
            assert_eq!(history.len(), 1, "{}", ip);
            assert!(history[0].timestamp >= now - Duration::days(30));
        }
    }
}
