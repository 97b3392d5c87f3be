//! SQLite database store implementation.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::NaiveDateTime;
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Result as SqlResult, Row};

use super::models::*;
use super::store::{validate_address, validate_batch, ResultStore, StoreError};

/// Thread-safe SQLite store.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open (or create) the database at `path` and bootstrap its schema.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init()?;
        Ok(store)
    }

    fn init(&self) -> Result<(), StoreError> {
        let conn = self.lock()?;
        conn.execute_batch(include_str!("../../migrations/sqlite/000001_init.up.sql"))
            .map_err(|e| StoreError::Migration(format!("Migration 1 failed: {}", e)))?;
        Ok(())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }
}

#[async_trait]
impl ResultStore for SqliteStore {
    async fn insert_outcomes(&self, outcomes: &[ProbeOutcome]) -> Result<(), StoreError> {
        if outcomes.is_empty() {
            return Ok(());
        }
        validate_batch(outcomes)?;

        let conn = self.lock()?;
        let tx = conn.unchecked_transaction()?;

        {
            let mut host_stmt = tx.prepare(
                "INSERT INTO hosts (ip, hostname, created_time, last_seen) VALUES (?1, ?2, ?3, ?3)
                 ON CONFLICT(ip) DO UPDATE SET hostname = excluded.hostname, last_seen = excluded.last_seen",
            )?;
            let mut ping_stmt = tx.prepare(
                "INSERT INTO ping_records (ip, delay_ms, success, timestamp) VALUES (?1, ?2, ?3, ?4)",
            )?;

            for o in outcomes {
                let ts = format_time(&o.observed_at);
                host_stmt.execute(params![o.address, o.label, ts])?;
                ping_stmt.execute(params![o.address, o.latency_ms, o.success, ts])?;
            }
        }

        tx.commit()?;
        tracing::debug!("Persisted {} ping outcomes", outcomes.len());
        Ok(())
    }

    async fn list_hosts(&self) -> Result<BTreeMap<String, String>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT ip, hostname FROM hosts ORDER BY ip")?;
        let hosts = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<SqlResult<BTreeMap<String, String>>>()?;
        Ok(hosts)
    }

    async fn ip_statistics(&self, address: &str) -> Result<IpStatistics, StoreError> {
        let conn = self.lock()?;

        let label: String = conn
            .query_row(
                "SELECT hostname FROM hosts WHERE ip = ?1",
                params![address],
                |row| row.get(0),
            )
            .optional()?
            .unwrap_or_default();

        let (total, success_count): (i64, i64) = conn.query_row(
            "SELECT COUNT(*), COALESCE(SUM(success), 0) FROM ping_records WHERE ip = ?1",
            params![address],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;

        let mut stats = IpStatistics::from_counts(address, label, total, success_count);
        if total == 0 {
            return Ok(stats);
        }

        let (avg, min, max): (Option<f64>, Option<i64>, Option<i64>) = conn.query_row(
            "SELECT AVG(delay_ms), MIN(delay_ms), MAX(delay_ms) FROM ping_records WHERE ip = ?1 AND success = 1",
            params![address],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )?;
        stats.avg_latency_ms = avg;
        stats.min_latency_ms = min;
        stats.max_latency_ms = max;

        let mut stmt = conn.prepare(
            "SELECT delay_ms, success, timestamp FROM ping_records
             WHERE ip = ?1 ORDER BY timestamp DESC, id DESC LIMIT ?2",
        )?;
        stats.recent = stmt
            .query_map(
                params![address, IpStatistics::RECENT_LIMIT as i64],
                ping_record_from_row,
            )?
            .collect::<SqlResult<Vec<_>>>()?;

        Ok(stats)
    }

    async fn ping_history(&self, address: &str) -> Result<Vec<PingRecord>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT delay_ms, success, timestamp FROM ping_records
             WHERE ip = ?1 ORDER BY timestamp ASC, id ASC",
        )?;
        let history = stmt
            .query_map(params![address], ping_record_from_row)?
            .collect::<SqlResult<Vec<_>>>()?;
        Ok(history)
    }

    async fn add_alert(
        &self,
        address: &str,
        label: &str,
        at: NaiveDateTime,
    ) -> Result<bool, StoreError> {
        validate_address(address)?;
        let conn = self.lock()?;
        let inserted = conn.execute(
            "INSERT INTO alerts (ip, hostname, created_time) VALUES (?1, ?2, ?3)
             ON CONFLICT(ip) DO NOTHING",
            params![address, label, format_time(&at)],
        )?;
        Ok(inserted > 0)
    }

    async fn resolve_alert(
        &self,
        address: &str,
        recovered_at: NaiveDateTime,
    ) -> Result<Option<RecoveryRecord>, StoreError> {
        validate_address(address)?;
        let conn = self.lock()?;
        let tx = conn.unchecked_transaction()?;

        let open: Option<(String, NaiveDateTime)> = tx
            .query_row(
                "SELECT hostname, created_time FROM alerts WHERE ip = ?1",
                params![address],
                |row| Ok((row.get(0)?, time_column(row, 1)?)),
            )
            .optional()?;

        let Some((label, alert_start)) = open else {
            return Ok(None);
        };

        tx.execute("DELETE FROM alerts WHERE ip = ?1", params![address])?;
        tx.execute(
            "INSERT INTO recovery_records (ip, hostname, alert_time, recovery_time) VALUES (?1, ?2, ?3, ?4)",
            params![
                address,
                label,
                format_time(&alert_start),
                format_time(&recovered_at)
            ],
        )?;
        let id = tx.last_insert_rowid();
        tx.commit()?;

        Ok(Some(RecoveryRecord {
            id,
            address: address.to_string(),
            label,
            alert_start,
            recovered_at,
        }))
    }

    async fn active_alerts(
        &self,
        since: Option<NaiveDateTime>,
    ) -> Result<Vec<AlertRecord>, StoreError> {
        let conn = self.lock()?;
        let map_row = |row: &Row<'_>| {
            Ok(AlertRecord {
                address: row.get(0)?,
                label: row.get(1)?,
                first_failure: time_column(row, 2)?,
            })
        };

        let alerts = match since {
            Some(since) => {
                let mut stmt = conn.prepare(
                    "SELECT ip, hostname, created_time FROM alerts
                     WHERE created_time >= ?1 ORDER BY created_time, ip",
                )?;
                let rows = stmt.query_map(params![format_time(&since)], map_row)?;
                rows.collect::<SqlResult<Vec<_>>>()?
            }
            None => {
                let mut stmt = conn.prepare(
                    "SELECT ip, hostname, created_time FROM alerts ORDER BY created_time, ip",
                )?;
                let rows = stmt.query_map([], map_row)?;
                rows.collect::<SqlResult<Vec<_>>>()?
            }
        };
        Ok(alerts)
    }

    async fn recovery_records(
        &self,
        since: Option<NaiveDateTime>,
    ) -> Result<Vec<RecoveryRecord>, StoreError> {
        let conn = self.lock()?;
        let map_row = |row: &Row<'_>| {
            Ok(RecoveryRecord {
                id: row.get(0)?,
                address: row.get(1)?,
                label: row.get(2)?,
                alert_start: time_column(row, 3)?,
                recovered_at: time_column(row, 4)?,
            })
        };

        let records = match since {
            Some(since) => {
                let mut stmt = conn.prepare(
                    "SELECT id, ip, hostname, alert_time, recovery_time FROM recovery_records
                     WHERE recovery_time >= ?1 ORDER BY id",
                )?;
                let rows = stmt.query_map(params![format_time(&since)], map_row)?;
                rows.collect::<SqlResult<Vec<_>>>()?
            }
            None => {
                let mut stmt = conn.prepare(
                    "SELECT id, ip, hostname, alert_time, recovery_time FROM recovery_records ORDER BY id",
                )?;
                let rows = stmt.query_map([], map_row)?;
                rows.collect::<SqlResult<Vec<_>>>()?
            }
        };
        Ok(records)
    }

    async fn cleanup(&self, before: NaiveDateTime) -> Result<u64, StoreError> {
        let conn = self.lock()?;
        let deleted = conn.execute(
            "DELETE FROM ping_records WHERE timestamp < ?1",
            params![format_time(&before)],
        )?;
        Ok(deleted as u64)
    }
}

fn format_time(t: &NaiveDateTime) -> String {
    t.format(TIME_FORMAT).to_string()
}

/// Parse a datetime string from the database.
fn parse_db_time(s: &str) -> Option<NaiveDateTime> {
    let formats = [TIME_FORMAT, "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S"];
    formats
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
}

fn time_column(row: &Row<'_>, idx: usize) -> SqlResult<NaiveDateTime> {
    let raw: String = row.get(idx)?;
    parse_db_time(&raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            Type::Text,
            format!("unparseable timestamp: {}", raw).into(),
        )
    })
}

fn ping_record_from_row(row: &Row<'_>) -> SqlResult<PingRecord> {
    Ok(PingRecord {
        latency_ms: row.get(0)?,
        success: row.get(1)?,
        timestamp: time_column(row, 2)?,
    })
}
