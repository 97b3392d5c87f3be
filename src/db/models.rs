//! Database model types.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// Timestamp layout shared by both backends and all reports.
pub const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// A monitored host: IPv4 address plus display name.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Host {
    pub address: String,
    pub label: String,
}

impl Host {
    pub fn new(address: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            label: label.into(),
        }
    }
}

/// Aggregated result of all probes sent to one host in one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbeOutcome {
    pub address: String,
    pub label: String,
    pub success: bool,
    /// Minimum elapsed time across every attempt, successful or not.
    pub latency_ms: i64,
    #[serde(with = "local_time")]
    pub observed_at: NaiveDateTime,
}

/// One persisted entry of an address's ping history.
#[derive(Debug, Clone, PartialEq)]
pub struct PingRecord {
    pub latency_ms: i64,
    pub success: bool,
    pub timestamp: NaiveDateTime,
}

/// An address currently in a failing streak.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlertRecord {
    pub address: String,
    pub label: String,
    #[serde(with = "local_time")]
    pub first_failure: NaiveDateTime,
}

/// A closed alert streak.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecoveryRecord {
    pub id: i64,
    pub address: String,
    pub label: String,
    #[serde(with = "local_time")]
    pub alert_start: NaiveDateTime,
    #[serde(with = "local_time")]
    pub recovered_at: NaiveDateTime,
}

/// Aggregate view over one address's ping history.
#[derive(Debug, Clone, PartialEq)]
pub struct IpStatistics {
    pub address: String,
    /// Empty when the address is not in the host directory.
    pub label: String,
    pub total: i64,
    pub success_count: i64,
    pub failure_count: i64,
    pub success_rate: f64,
    pub failure_rate: f64,
    /// Latency figures cover successful probes only.
    pub avg_latency_ms: Option<f64>,
    pub min_latency_ms: Option<i64>,
    pub max_latency_ms: Option<i64>,
    /// Most recent records, newest first.
    pub recent: Vec<PingRecord>,
}

impl IpStatistics {
    /// Number of records kept in [`IpStatistics::recent`].
    pub const RECENT_LIMIT: usize = 10;

    /// Build statistics from raw counts, deriving the rates.
    pub fn from_counts(address: &str, label: String, total: i64, success_count: i64) -> Self {
        let failure_count = total - success_count;
        let (success_rate, failure_rate) = if total > 0 {
            (
                round2(success_count as f64 / total as f64 * 100.0),
                round2(failure_count as f64 / total as f64 * 100.0),
            )
        } else {
            (0.0, 0.0)
        };
        Self {
            address: address.to_string(),
            label,
            total,
            success_count,
            failure_count,
            success_rate,
            failure_rate,
            avg_latency_ms: None,
            min_latency_ms: None,
            max_latency_ms: None,
            recent: Vec::new(),
        }
    }
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

/// Serde adapter rendering naive local times in [`TIME_FORMAT`].
mod local_time {
    use chrono::NaiveDateTime;
    use serde::{Deserialize, Deserializer, Serializer};

    use super::TIME_FORMAT;

    pub fn serialize<S: Serializer>(t: &NaiveDateTime, s: S) -> Result<S::Ok, S::Error> {
        s.collect_str(&t.format(TIME_FORMAT))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<NaiveDateTime, D::Error> {
        let raw = String::deserialize(d)?;
        NaiveDateTime::parse_from_str(&raw, TIME_FORMAT).map_err(serde::de::Error::custom)
    }
}
