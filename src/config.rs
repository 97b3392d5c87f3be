//! Configuration module for pingmon.
//!
//! Command-line flags are parsed with clap, then a couple of environment
//! variables may fill in what the flags left unset.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use clap::{value_parser, Parser};
use thiserror::Error;

use crate::alerts::DEFAULT_FAILURE_THRESHOLD;
use crate::db::Backend;
use crate::engine::{EngineSettings, DEFAULT_MAX_CONCURRENT};
use crate::report::OutputFormat;
use crate::retention::DEFAULT_RETENTION_DAYS;

/// Host file used when neither a file nor a database is given.
pub const DEFAULT_HOST_FILE: &str = "ip.txt";
/// SQLite path used when cleanup is requested without `--database`.
pub const DEFAULT_DB_PATH: &str = "ping_monitor.db";

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Database must be enabled to {0}. Use -d option to specify database path.")]
    DatabaseRequired(&'static str),
    #[error("--postgresql requires --database with a connection string")]
    PostgresWithoutConnection,
    #[error("invalid value for {name}: {reason}")]
    InvalidValue { name: &'static str, reason: String },
}

#[derive(Debug, Parser)]
#[command(
    name = "pingmon",
    version,
    about = "Concurrent ICMP host monitor with alert and recovery history",
    after_help = "If no file is given and a database is enabled, hosts are read from the database; otherwise from ip.txt."
)]
pub struct Cli {
    /// Host file, one `address label` per line
    #[arg(value_name = "FILE")]
    pub positional_file: Option<PathBuf>,

    /// Host file (default: ip.txt)
    #[arg(short = 'f', long = "file", value_name = "FILE")]
    pub file: Option<PathBuf>,

    /// Enable persistence at this SQLite path, or PostgreSQL connection string with -P
    #[arg(short = 'd', long = "database", value_name = "PATH")]
    pub database: Option<String>,

    /// Treat --database as a PostgreSQL connection string
    #[arg(short = 'P', long = "postgresql")]
    pub postgresql: bool,

    /// Show statistics for one IP address (requires -d)
    #[arg(short = 'q', long = "query", value_name = "IP")]
    pub query: Option<String>,

    /// Show active alerts, optionally only those from the last DAYS days (requires -d)
    #[arg(short = 'a', long = "alerts", value_name = "DAYS", num_args = 0..=1)]
    pub alerts: Option<Option<u32>>,

    /// Show recovery records, optionally only those from the last DAYS days (requires -d)
    #[arg(short = 'r', long = "recovery", value_name = "DAYS", num_args = 0..=1)]
    pub recovery: Option<Option<u32>>,

    /// Show hosts whose history holds N consecutive failures (default: 3, requires -d)
    #[arg(short = 'c', long = "consecutive-failures", value_name = "N", num_args = 0..=1)]
    pub consecutive_failures: Option<Option<usize>>,

    /// Delete ping history older than DAYS days (default: 30)
    #[arg(short = 'C', long = "cleanup", value_name = "DAYS", num_args = 0..=1)]
    pub cleanup: Option<Option<u32>>,

    /// Suppress per-host output
    #[arg(short = 's', long = "silent")]
    pub silent: bool,

    /// Number of ping packets sent to each host
    #[arg(short = 'n', long = "count", default_value_t = 3, value_parser = value_parser!(u32).range(1..))]
    pub count: u32,

    /// Timeout for each ping in seconds
    #[arg(short = 't', long = "timeout", default_value_t = 3, value_parser = value_parser!(u64).range(1..))]
    pub timeout: u64,

    /// Maximum number of hosts probed at once (default: 50)
    #[arg(short = 'j', long = "max-concurrent", value_parser = value_parser!(u64).range(1..))]
    pub max_concurrent: Option<u64>,

    /// Output format for probe results
    #[arg(long = "format", value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,
}

/// What a single invocation does.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mode {
    Probe(HostSource),
    Statistics(String),
    Cleanup(u32),
    Alerts(Option<u32>),
    Recovery(Option<u32>),
    ConsecutiveFailures(usize),
}

/// Where a probe run gets its hosts from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostSource {
    File(PathBuf),
    Database,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseConfig {
    pub backend: Backend,
    pub location: String,
}

#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub mode: Mode,
    pub database: Option<DatabaseConfig>,
    pub silent: bool,
    pub format: OutputFormat,
    pub engine: EngineSettings,
}

impl MonitorConfig {
    /// Build the configuration from parsed flags and the process environment.
    ///
    /// Environment variables:
    /// - `PINGMON_DB_PATH`: database location when `-d` is absent
    /// - `PINGMON_MAX_CONCURRENT`: worker ceiling when `-j` is absent
    pub fn load(cli: Cli) -> Result<Self, ConfigError> {
        Self::from_cli(cli, |key| env::var(key).ok())
    }

    pub fn from_cli(mut cli: Cli, env_var: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        if cli.database.is_none() {
            cli.database = env_var("PINGMON_DB_PATH").filter(|v| !v.is_empty());
        }
        if cli.max_concurrent.is_none() {
            if let Some(raw) = env_var("PINGMON_MAX_CONCURRENT") {
                let parsed = raw.parse::<u64>().ok().filter(|n| *n > 0);
                cli.max_concurrent = Some(parsed.ok_or_else(|| ConfigError::InvalidValue {
                    name: "PINGMON_MAX_CONCURRENT",
                    reason: format!("expected a positive integer, got {:?}", raw),
                })?);
            }
        }

        if cli.postgresql && cli.database.is_none() {
            return Err(ConfigError::PostgresWithoutConnection);
        }
        // Cleanup falls back to the default SQLite file rather than failing
        if cli.cleanup.is_some() && cli.query.is_none() && cli.database.is_none() {
            cli.database = Some(DEFAULT_DB_PATH.to_string());
        }

        let database = cli.database.clone().map(|location| DatabaseConfig {
            backend: if cli.postgresql {
                Backend::Postgres
            } else {
                Backend::Sqlite
            },
            location,
        });
        let has_db = database.is_some();

        let mode = if let Some(ip) = cli.query.clone() {
            require_db(has_db, "query statistics")?;
            Mode::Statistics(ip)
        } else if let Some(days) = cli.cleanup {
            Mode::Cleanup(days.unwrap_or(DEFAULT_RETENTION_DAYS))
        } else if let Some(days) = cli.alerts {
            require_db(has_db, "query alerts")?;
            Mode::Alerts(days)
        } else if let Some(days) = cli.recovery {
            require_db(has_db, "query recovery records")?;
            Mode::Recovery(days)
        } else if let Some(threshold) = cli.consecutive_failures {
            require_db(has_db, "query consecutive failures")?;
            let threshold = threshold.unwrap_or(DEFAULT_FAILURE_THRESHOLD);
            if threshold == 0 {
                return Err(ConfigError::InvalidValue {
                    name: "--consecutive-failures",
                    reason: "threshold must be at least 1".to_string(),
                });
            }
            Mode::ConsecutiveFailures(threshold)
        } else {
            // A positional file wins over -f, as the last word on the command line
            let source = match cli.positional_file.or(cli.file) {
                Some(path) => HostSource::File(path),
                None if has_db => HostSource::Database,
                None => HostSource::File(PathBuf::from(DEFAULT_HOST_FILE)),
            };
            Mode::Probe(source)
        };

        Ok(Self {
            mode,
            database,
            silent: cli.silent,
            format: cli.format,
            engine: EngineSettings {
                ping_count: cli.count,
                timeout: Duration::from_secs(cli.timeout),
                max_concurrent: cli
                    .max_concurrent
                    .map(|n| n as usize)
                    .unwrap_or(DEFAULT_MAX_CONCURRENT),
            },
        })
    }
}

fn require_db(has_db: bool, action: &'static str) -> Result<(), ConfigError> {
    if has_db {
        Ok(())
    } else {
        Err(ConfigError::DatabaseRequired(action))
    }
}
