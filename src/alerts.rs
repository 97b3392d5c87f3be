//! Alert and recovery tracking on top of persisted ping history.
//!
//! A failing outcome opens an alert for its address unless one is already
//! open, so an alert always carries the start of its streak. A succeeding
//! outcome closes the open alert and leaves a recovery record behind.

use std::sync::Arc;

use chrono::{Duration as ChronoDuration, Local, NaiveDateTime};

use crate::db::{AlertRecord, IpStatistics, PingRecord, ProbeOutcome, RecoveryRecord, ResultStore, StoreError};

/// Default threshold for the consecutive-failure scan.
pub const DEFAULT_FAILURE_THRESHOLD: usize = 3;

/// Counts from one reconciliation pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileSummary {
    pub opened: usize,
    pub recovered: usize,
    /// Addresses whose alert could not be recorded.
    pub failed: usize,
}

/// Timestamps of the most recent failure streak that reached the threshold.
#[derive(Debug, Clone, PartialEq)]
pub struct FailureStreak {
    pub address: String,
    pub label: String,
    pub timestamps: Vec<NaiveDateTime>,
}

pub struct AlertTracker {
    store: Arc<dyn ResultStore>,
}

impl AlertTracker {
    pub fn new(store: Arc<dyn ResultStore>) -> Self {
        Self { store }
    }

    /// Apply one batch of outcomes to the alert set.
    ///
    /// Failures on one address are logged and do not stop the rest of the batch.
    pub async fn reconcile(&self, outcomes: &[ProbeOutcome]) -> ReconcileSummary {
        let mut summary = ReconcileSummary::default();

        for o in outcomes {
            if !o.success {
                match self.store.add_alert(&o.address, &o.label, o.observed_at).await {
                    Ok(true) => {
                        summary.opened += 1;
                        tracing::info!("Alert opened for {} ({})", o.address, o.label);
                    }
                    Ok(false) => {}
                    Err(e) => {
                        summary.failed += 1;
                        tracing::error!("Failed to add alert for IP {}: {}", o.address, e);
                    }
                }
            } else {
                match self.store.resolve_alert(&o.address, o.observed_at).await {
                    Ok(Some(rec)) => {
                        summary.recovered += 1;
                        tracing::info!(
                            "{} ({}) recovered, down since {}",
                            rec.address,
                            rec.label,
                            rec.alert_start
                        );
                    }
                    Ok(None) => {}
                    Err(e) => {
                        tracing::warn!("Failed to clear alert for IP {}: {}", o.address, e);
                    }
                }
            }
        }

        summary
    }

    /// Open alerts from the last `days` days, or all of them.
    pub async fn active_alerts(&self, days: Option<u32>) -> Result<Vec<AlertRecord>, StoreError> {
        let since = days.map(|d| window_start(d, now()));
        self.store.active_alerts(since).await
    }

    /// Recoveries from the last `days` days, or all of them.
    pub async fn recovery_records(&self, days: Option<u32>) -> Result<Vec<RecoveryRecord>, StoreError> {
        let since = days.map(|d| window_start(d, now()));
        self.store.recovery_records(since).await
    }

    pub async fn statistics(&self, address: &str) -> Result<IpStatistics, StoreError> {
        self.store.ip_statistics(address).await
    }

    /// Scan every known host for failure streaks of at least `threshold` probes.
    pub async fn consecutive_failures(&self, threshold: usize) -> Result<Vec<FailureStreak>, StoreError> {
        let hosts = self.store.list_hosts().await?;
        let mut streaks = Vec::new();

        for (address, label) in hosts {
            let history = self.store.ping_history(&address).await?;
            if let Some(timestamps) = latest_failure_streak(&history, threshold) {
                streaks.push(FailureStreak {
                    address,
                    label,
                    timestamps,
                });
            }
        }

        Ok(streaks)
    }
}

/// Walk `history` in order and return the last `threshold` timestamps of the
/// most recent streak that reached `threshold` consecutive failures.
pub fn latest_failure_streak(history: &[PingRecord], threshold: usize) -> Option<Vec<NaiveDateTime>> {
    if threshold == 0 {
        return None;
    }

    let mut streak: Vec<NaiveDateTime> = Vec::new();
    let mut latest = None;

    for record in history {
        if record.success {
            streak.clear();
            continue;
        }
        streak.push(record.timestamp);
        if streak.len() >= threshold {
            latest = Some(streak[streak.len() - threshold..].to_vec());
        }
    }

    latest
}

/// Start of a window covering the last `days` days before `now`.
pub fn window_start(days: u32, now: NaiveDateTime) -> NaiveDateTime {
    now - ChronoDuration::days(days as i64)
}

pub(crate) fn now() -> NaiveDateTime {
    Local::now().naive_local()
}
