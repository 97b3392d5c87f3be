//! PostgreSQL database store implementation.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::NaiveDateTime;
use tokio::sync::Mutex;
use tokio_postgres::{Client, NoTls, Row};

use super::models::*;
use super::store::{validate_address, validate_batch, ResultStore, StoreError};

/// Client/server store backed by a single PostgreSQL connection.
pub struct PostgresStore {
    client: Mutex<Client>,
}

impl PostgresStore {
    /// Connect using a libpq-style connection string and bootstrap the schema.
    pub async fn connect(conn_str: &str) -> Result<Self, StoreError> {
        let (client, connection) = tokio_postgres::connect(conn_str, NoTls).await?;
        tokio::spawn(async move {
            if let Err(e) = connection.await {
                tracing::error!("PostgreSQL connection error: {}", e);
            }
        });

        client
            .batch_execute(include_str!("../../migrations/postgres/000001_init.up.sql"))
            .await
            .map_err(|e| StoreError::Migration(format!("Migration 1 failed: {}", e)))?;

        Ok(Self {
            client: Mutex::new(client),
        })
    }
}

#[async_trait]
impl ResultStore for PostgresStore {
    async fn insert_outcomes(&self, outcomes: &[ProbeOutcome]) -> Result<(), StoreError> {
        if outcomes.is_empty() {
            return Ok(());
        }
        validate_batch(outcomes)?;

        let mut client = self.client.lock().await;
        let tx = client.transaction().await?;

        let host_stmt = tx
            .prepare(
                "INSERT INTO hosts (ip, hostname, created_time, last_seen) VALUES ($1, $2, $3, $3)
                 ON CONFLICT (ip) DO UPDATE SET hostname = EXCLUDED.hostname, last_seen = EXCLUDED.last_seen",
            )
            .await?;
        let ping_stmt = tx
            .prepare(
                "INSERT INTO ping_records (ip, delay_ms, success, timestamp) VALUES ($1, $2, $3, $4)",
            )
            .await?;

        for o in outcomes {
            tx.execute(&host_stmt, &[&o.address, &o.label, &o.observed_at])
                .await?;
            tx.execute(
                &ping_stmt,
                &[&o.address, &o.latency_ms, &o.success, &o.observed_at],
            )
            .await?;
        }

        tx.commit().await?;
        tracing::debug!("Persisted {} ping outcomes", outcomes.len());
        Ok(())
    }

    async fn list_hosts(&self) -> Result<BTreeMap<String, String>, StoreError> {
        let client = self.client.lock().await;
        let rows = client
            .query("SELECT ip, hostname FROM hosts ORDER BY ip", &[])
            .await?;
        Ok(rows
            .iter()
            .map(|row| (row.get(0), row.get(1)))
            .collect())
    }

    async fn ip_statistics(&self, address: &str) -> Result<IpStatistics, StoreError> {
        let client = self.client.lock().await;

        let label = client
            .query_opt("SELECT hostname FROM hosts WHERE ip = $1", &[&address])
            .await?
            .map(|row| row.get::<_, String>(0))
            .unwrap_or_default();

        let counts = client
            .query_one(
                "SELECT COUNT(*), COUNT(*) FILTER (WHERE success) FROM ping_records WHERE ip = $1",
                &[&address],
            )
            .await?;
        let total: i64 = counts.get(0);
        let success_count: i64 = counts.get(1);

        let mut stats = IpStatistics::from_counts(address, label, total, success_count);
        if total == 0 {
            return Ok(stats);
        }

        let latency = client
            .query_one(
                "SELECT AVG(delay_ms)::DOUBLE PRECISION, MIN(delay_ms), MAX(delay_ms)
                 FROM ping_records WHERE ip = $1 AND success",
                &[&address],
            )
            .await?;
        stats.avg_latency_ms = latency.get(0);
        stats.min_latency_ms = latency.get(1);
        stats.max_latency_ms = latency.get(2);

        let limit = IpStatistics::RECENT_LIMIT as i64;
        stats.recent = client
            .query(
                "SELECT delay_ms, success, timestamp FROM ping_records
                 WHERE ip = $1 ORDER BY timestamp DESC, id DESC LIMIT $2",
                &[&address, &limit],
            )
            .await?
            .iter()
            .map(ping_record_from_row)
            .collect();

        Ok(stats)
    }

    async fn ping_history(&self, address: &str) -> Result<Vec<PingRecord>, StoreError> {
        let client = self.client.lock().await;
        let rows = client
            .query(
                "SELECT delay_ms, success, timestamp FROM ping_records
                 WHERE ip = $1 ORDER BY timestamp ASC, id ASC",
                &[&address],
            )
            .await?;
        Ok(rows.iter().map(ping_record_from_row).collect())
    }

    async fn add_alert(
        &self,
        address: &str,
        label: &str,
        at: NaiveDateTime,
    ) -> Result<bool, StoreError> {
        validate_address(address)?;
        let client = self.client.lock().await;
        let inserted = client
            .execute(
                "INSERT INTO alerts (ip, hostname, created_time) VALUES ($1, $2, $3)
                 ON CONFLICT (ip) DO NOTHING",
                &[&address, &label, &at],
            )
            .await?;
        Ok(inserted > 0)
    }

    async fn resolve_alert(
        &self,
        address: &str,
        recovered_at: NaiveDateTime,
    ) -> Result<Option<RecoveryRecord>, StoreError> {
        validate_address(address)?;
        let mut client = self.client.lock().await;
        let tx = client.transaction().await?;

        let Some(open) = tx
            .query_opt(
                "SELECT hostname, created_time FROM alerts WHERE ip = $1 FOR UPDATE",
                &[&address],
            )
            .await?
        else {
            return Ok(None);
        };
        let label: String = open.get(0);
        let alert_start: NaiveDateTime = open.get(1);

        tx.execute("DELETE FROM alerts WHERE ip = $1", &[&address])
            .await?;
        let id: i64 = tx
            .query_one(
                "INSERT INTO recovery_records (ip, hostname, alert_time, recovery_time)
                 VALUES ($1, $2, $3, $4) RETURNING id",
                &[&address, &label, &alert_start, &recovered_at],
            )
            .await?
            .get(0);
        tx.commit().await?;

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
        let client = self.client.lock().await;
        let rows = match since {
            Some(since) => {
                client
                    .query(
                        "SELECT ip, hostname, created_time FROM alerts
                         WHERE created_time >= $1 ORDER BY created_time, ip",
                        &[&since],
                    )
                    .await?
            }
            None => {
                client
                    .query(
                        "SELECT ip, hostname, created_time FROM alerts ORDER BY created_time, ip",
                        &[],
                    )
                    .await?
            }
        };

        Ok(rows
            .iter()
            .map(|row| AlertRecord {
                address: row.get(0),
                label: row.get(1),
                first_failure: row.get(2),
            })
            .collect())
    }

    async fn recovery_records(
        &self,
        since: Option<NaiveDateTime>,
    ) -> Result<Vec<RecoveryRecord>, StoreError> {
        let client = self.client.lock().await;
        let rows = match since {
            Some(since) => {
                client
                    .query(
                        "SELECT id, ip, hostname, alert_time, recovery_time FROM recovery_records
                         WHERE recovery_time >= $1 ORDER BY id",
                        &[&since],
                    )
                    .await?
            }
            None => {
                client
                    .query(
                        "SELECT id, ip, hostname, alert_time, recovery_time FROM recovery_records ORDER BY id",
                        &[],
                    )
                    .await?
            }
        };

        Ok(rows
            .iter()
            .map(|row| RecoveryRecord {
                id: row.get(0),
                address: row.get(1),
                label: row.get(2),
                alert_start: row.get(3),
                recovered_at: row.get(4),
            })
            .collect())
    }

    async fn cleanup(&self, before: NaiveDateTime) -> Result<u64, StoreError> {
        let client = self.client.lock().await;
        let deleted = client
            .execute("DELETE FROM ping_records WHERE timestamp < $1", &[&before])
            .await?;
        Ok(deleted)
    }
}

fn ping_record_from_row(row: &Row) -> PingRecord {
    PingRecord {
        latency_ms: row.get(0),
        success: row.get(1),
        timestamp: row.get(2),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Connection string for a disposable test database; tests are skipped when unset.
    fn test_url() -> Option<String> {
        std::env::var("PINGMON_TEST_PG_URL").ok()
    }

    fn at(s: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(s, TIME_FORMAT).unwrap()
    }

    #[tokio::test]
    async fn test_alert_and_recovery_cycle() {
        let Some(url) = test_url() else {
            return;
        };
        let store = PostgresStore::connect(&url).await.unwrap();
        let ip = "192.0.2.77";
        let _ = store.resolve_alert(ip, at("2000-01-01 00:00:00")).await;

        assert!(store.add_alert(ip, "pg-test", at("2024-03-01 00:00:00")).await.unwrap());
        assert!(!store.add_alert(ip, "pg-test", at("2024-03-01 01:00:00")).await.unwrap());

        let rec = store
            .resolve_alert(ip, at("2024-03-01 02:00:00"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(rec.alert_start, at("2024-03-01 00:00:00"));
        assert!(store.resolve_alert(ip, at("2024-03-01 03:00:00")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_insert_rejects_invalid_address() {
        let Some(url) = test_url() else {
            return;
        };
        let store = PostgresStore::connect(&url).await.unwrap();
        let batch = vec![ProbeOutcome {
            address: "bogus".into(),
            label: "x".into(),
            success: true,
            latency_ms: 1,
            observed_at: at("2024-03-01 00:00:00"),
        }];
        assert!(matches!(
            store.insert_outcomes(&batch).await,
            Err(StoreError::InvalidAddress(_))
        ));
    }
}
