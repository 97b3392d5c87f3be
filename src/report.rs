//! Tabular and JSON rendering of results and query answers.

use std::io::{self, Write};

use clap::ValueEnum;

use crate::alerts::FailureStreak;
use crate::db::{AlertRecord, IpStatistics, ProbeOutcome, RecoveryRecord, TIME_FORMAT};

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

/// Print one line per host, ordered by address.
pub fn write_outcomes<W: Write>(w: &mut W, outcomes: &[ProbeOutcome], format: OutputFormat) -> io::Result<()> {
    let mut sorted: Vec<&ProbeOutcome> = outcomes.iter().collect();
    sorted.sort_by(|a, b| a.address.cmp(&b.address));

    match format {
        OutputFormat::Text => {
            for o in sorted {
                writeln!(
                    w,
                    "{}\t{}\t{}\t{}ms",
                    o.address,
                    o.label,
                    if o.success { "success" } else { "failed" },
                    o.latency_ms
                )?;
            }
        }
        OutputFormat::Json => {
            serde_json::to_writer_pretty(&mut *w, &sorted)?;
            writeln!(w)?;
        }
    }
    Ok(())
}

pub fn write_statistics<W: Write>(w: &mut W, stats: &IpStatistics) -> io::Result<()> {
    if stats.label.is_empty() {
        writeln!(w, "Statistics for IP: {}", stats.address)?;
    } else {
        writeln!(w, "Statistics for IP: {} ({})", stats.address, stats.label)?;
    }
    writeln!(w, "{}", "=".repeat(57))?;
    writeln!(w, "Total ping records: {}", stats.total)?;

    if stats.total == 0 {
        writeln!(w, "No ping records found for this IP.")?;
        return Ok(());
    }

    writeln!(w, "Successful pings: {}", stats.success_count)?;
    writeln!(w, "Failed pings: {}", stats.failure_count)?;
    writeln!(w, "Success rate: {:.2}%", stats.success_rate)?;
    writeln!(w, "Failure rate: {:.2}%", stats.failure_rate)?;
    writeln!(
        w,
        "Average delay (successful pings): {:.2}ms",
        stats.avg_latency_ms.unwrap_or(0.0)
    )?;
    writeln!(
        w,
        "Maximum delay (successful pings): {}ms",
        stats.max_latency_ms.unwrap_or(0)
    )?;
    writeln!(
        w,
        "Minimum delay (successful pings): {}ms",
        stats.min_latency_ms.unwrap_or(0)
    )?;

    writeln!(w)?;
    writeln!(w, "Recent ping records (last {}):", IpStatistics::RECENT_LIMIT)?;
    writeln!(w, "Timestamp           \tDelay\tStatus")?;
    writeln!(w, "{}", "-".repeat(56))?;
    for r in &stats.recent {
        writeln!(
            w,
            "{}\t{}ms\t{}",
            r.timestamp.format(TIME_FORMAT),
            r.latency_ms,
            if r.success { "Success" } else { "Failed" }
        )?;
    }
    Ok(())
}

fn window_suffix(days: Option<u32>) -> String {
    match days {
        Some(d) => format!(" within the last {} days", d),
        None => String::new(),
    }
}

pub fn write_alerts<W: Write>(w: &mut W, alerts: &[AlertRecord], days: Option<u32>) -> io::Result<()> {
    if alerts.is_empty() {
        return writeln!(w, "No active alerts{}.", window_suffix(days));
    }

    writeln!(w, "Active alerts{}:", window_suffix(days))?;
    writeln!(w, "IP Address\tHostname\tCreated Time")?;
    writeln!(w, "{}", "-".repeat(48))?;
    for a in alerts {
        writeln!(w, "{}\t{}\t{}", a.address, a.label, a.first_failure.format(TIME_FORMAT))?;
    }
    Ok(())
}

pub fn write_recoveries<W: Write>(w: &mut W, records: &[RecoveryRecord], days: Option<u32>) -> io::Result<()> {
    if records.is_empty() {
        return writeln!(w, "No recovery records{}.", window_suffix(days));
    }

    writeln!(w, "Recovery records{}:", window_suffix(days))?;
    writeln!(w, "ID\tIP Address\tHostname\tAlert Time\t\tRecovery Time")?;
    writeln!(w, "{}", "-".repeat(96))?;
    for r in records {
        writeln!(
            w,
            "{}\t{}\t\t{}\t\t{}\t{}",
            r.id,
            r.address,
            r.label,
            r.alert_start.format(TIME_FORMAT),
            r.recovered_at.format(TIME_FORMAT)
        )?;
    }
    Ok(())
}

pub fn write_failure_streaks<W: Write>(w: &mut W, streaks: &[FailureStreak], threshold: usize) -> io::Result<()> {
    if streaks.is_empty() {
        return writeln!(w, "No hosts with {} consecutive failures.", threshold);
    }

    writeln!(w, "Hosts with {} consecutive failures:", threshold)?;
    writeln!(w, "{}", "-".repeat(50))?;
    for s in streaks {
        if s.label.is_empty() {
            writeln!(w, "{}:", s.address)?;
        } else {
            writeln!(w, "{} ({}):", s.address, s.label)?;
        }
        for t in &s.timestamps {
            writeln!(w, "  {}", t.format(TIME_FORMAT))?;
        }
        writeln!(w)?;
    }
    Ok(())
}

pub fn write_cleanup<W: Write>(w: &mut W, days: u32, deleted: u64) -> io::Result<()> {
    writeln!(w, "Cleaning up data older than {} days...", days)?;
    writeln!(w, "Total deleted records: {}", deleted)?;
    writeln!(w, "Cleanup completed.")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::PingRecord;
    use chrono::NaiveDateTime;

    fn at(s: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(s, TIME_FORMAT).unwrap()
    }

    fn render(f: impl FnOnce(&mut Vec<u8>) -> io::Result<()>) -> String {
        let mut buf = Vec::new();
        f(&mut buf).unwrap();
        String::from_utf8(buf).unwrap()
    }

    fn outcomes() -> Vec<ProbeOutcome> {
        vec![
            ProbeOutcome {
                address: "10.0.0.2".into(),
                label: "db1".into(),
                success: false,
                latency_ms: 3001,
                observed_at: at("2024-01-01 00:00:00"),
            },
            ProbeOutcome {
                address: "10.0.0.1".into(),
                label: "web1".into(),
                success: true,
                latency_ms: 4,
                observed_at: at("2024-01-01 00:00:00"),
            },
        ]
    }

    #[test]
    fn test_outcomes_text_sorted() {
        let out = render(|w| write_outcomes(w, &outcomes(), OutputFormat::Text));
        assert_eq!(out, "10.0.0.1\tweb1\tsuccess\t4ms\n10.0.0.2\tdb1\tfailed\t3001ms\n");
    }

    #[test]
    fn test_outcomes_json() {
        let out = render(|w| write_outcomes(w, &outcomes(), OutputFormat::Json));
        let parsed: serde_json::Value = serde_json::from_str(&out).unwrap();
        assert_eq!(parsed[0]["address"], "10.0.0.1");
        assert_eq!(parsed[1]["success"], false);
        assert_eq!(parsed[1]["observed_at"], "2024-01-01 00:00:00");
    }

    #[test]
    fn test_statistics_report() {
        let mut stats = IpStatistics::from_counts("10.0.0.1", "web1".into(), 2, 1);
        stats.avg_latency_ms = Some(12.5);
        stats.min_latency_ms = Some(12);
        stats.max_latency_ms = Some(13);
        stats.recent = vec![PingRecord {
            latency_ms: 12,
            success: true,
            timestamp: at("2024-01-01 00:00:00"),
        }];
        let out = render(|w| write_statistics(w, &stats));
        assert!(out.starts_with("Statistics for IP: 10.0.0.1 (web1)\n"));
        assert!(out.contains("Success rate: 50.00%\n"));
        assert!(out.contains("Average delay (successful pings): 12.50ms\n"));
        assert!(out.contains("2024-01-01 00:00:00\t12ms\tSuccess\n"));
    }

    #[test]
    fn test_statistics_without_records() {
        let stats = IpStatistics::from_counts("10.0.0.9", String::new(), 0, 0);
        let out = render(|w| write_statistics(w, &stats));
        assert!(out.starts_with("Statistics for IP: 10.0.0.9\n"));
        assert!(out.ends_with("No ping records found for this IP.\n"));
    }

    #[test]
    fn test_empty_alert_and_recovery_messages() {
        assert_eq!(render(|w| write_alerts(w, &[], None)), "No active alerts.\n");
        assert_eq!(
            render(|w| write_alerts(w, &[], Some(7))),
            "No active alerts within the last 7 days.\n"
        );
        assert_eq!(
            render(|w| write_recoveries(w, &[], Some(0))),
            "No recovery records within the last 0 days.\n"
        );
    }

    #[test]
    fn test_alert_rows() {
        let alerts = vec![AlertRecord {
            address: "10.0.0.1".into(),
            label: "web1".into(),
            first_failure: at("2024-01-01 08:00:00"),
        }];
        let out = render(|w| write_alerts(w, &alerts, None));
        assert!(out.starts_with("Active alerts:\n"));
        assert!(out.ends_with("10.0.0.1\tweb1\t2024-01-01 08:00:00\n"));
    }

    #[test]
    fn test_failure_streak_rows() {
        let streaks = vec![FailureStreak {
            address: "10.0.0.1".into(),
            label: "web1".into(),
            timestamps: vec![at("2024-01-01 08:00:00"), at("2024-01-01 08:05:00")],
        }];
        let out = render(|w| write_failure_streaks(w, &streaks, 2));
        assert!(out.contains("10.0.0.1 (web1):\n  2024-01-01 08:00:00\n  2024-01-01 08:05:00\n"));
    }
}
