//! pingmon - concurrent host availability monitor
//!
//! Probes a list of hosts over ICMP, optionally persists the results, and
//! keeps an alert and recovery history per address.

mod alerts;
mod config;
mod db;
mod engine;
mod hosts;
mod probe;
mod report;
mod retention;

use std::collections::BTreeMap;
use std::io::{self, Write};
use std::process::ExitCode;
use std::sync::Arc;

use clap::{CommandFactory, Parser};
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use alerts::AlertTracker;
use config::{Cli, HostSource, MonitorConfig, Mode};
use db::{open_store, ResultStore};
use engine::PingEngine;
use probe::{IcmpProber, Prober};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Exit code for a run cut short by Ctrl-C, as shells report SIGINT.
const INTERRUPTED_EXIT: u8 = 130;

/// How a probe run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunStatus {
    Completed,
    /// Outcomes were stored but this many alerts could not be recorded.
    AlertFailures(usize),
    /// Dispatch stopped early; only `probed` of `total` hosts have outcomes.
    Interrupted { probed: usize, total: usize },
}

impl RunStatus {
    fn exit_code(self) -> u8 {
        match self {
            RunStatus::Completed => 0,
            RunStatus::AlertFailures(_) => 1,
            RunStatus::Interrupted { .. } => INTERRUPTED_EXIT,
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("pingmon=warn")),
        )
        .init();

    if std::env::args_os().len() <= 1 {
        return ExitCode::from(finish(write_help(&mut io::stdout()).map(|_| 0).map_err(BoxError::from)));
    }

    let cfg = match MonitorConfig::load(Cli::parse()) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    ExitCode::from(finish(run(cfg).await))
}

/// Map the result of a run to the process exit code.
///
/// A closed stdout (`pingmon ... | head`) is a normal end of output.
fn finish(result: Result<u8, BoxError>) -> u8 {
    match result {
        Ok(code) => code,
        Err(e) if is_broken_pipe(e.as_ref()) => 0,
        Err(e) => {
            eprintln!("error: {}", e);
            1
        }
    }
}

fn is_broken_pipe(e: &(dyn std::error::Error + Send + Sync + 'static)) -> bool {
    e.downcast_ref::<io::Error>()
        .is_some_and(|e| e.kind() == io::ErrorKind::BrokenPipe)
}

fn write_help<W: Write>(w: &mut W) -> io::Result<()> {
    Cli::command().write_help(w)?;
    w.flush()
}

async fn run(cfg: MonitorConfig) -> Result<u8, BoxError> {
    let store = match &cfg.database {
        Some(db) => {
            tracing::info!("Using {:?} database at {}", db.backend, db.location);
            Some(open_store(db.backend, &db.location).await?)
        }
        None => None,
    };
    let mut out = io::stdout();

    match &cfg.mode {
        Mode::Probe(source) => {
            let shutdown = spawn_interrupt_handler();
            let status = probe_hosts(&cfg, source, store, Arc::new(IcmpProber), shutdown, &mut out).await?;
            match status {
                RunStatus::Completed => {}
                RunStatus::AlertFailures(n) => eprintln!("error: failed to record {} alert(s)", n),
                RunStatus::Interrupted { probed, total } => {
                    eprintln!("error: interrupted after probing {} of {} hosts", probed, total)
                }
            }
            return Ok(status.exit_code());
        }
        Mode::Statistics(ip) => {
            let stats = tracker(&store)?.statistics(ip).await?;
            report::write_statistics(&mut out, &stats)?;
        }
        Mode::Cleanup(days) => {
            let store = store.ok_or("database is not enabled")?;
            let deleted = retention::cleanup_older_than(store.as_ref(), *days, alerts::now()).await?;
            report::write_cleanup(&mut out, *days, deleted)?;
        }
        Mode::Alerts(days) => {
            let open = tracker(&store)?.active_alerts(*days).await?;
            report::write_alerts(&mut out, &open, *days)?;
        }
        Mode::Recovery(days) => {
            let records = tracker(&store)?.recovery_records(*days).await?;
            report::write_recoveries(&mut out, &records, *days)?;
        }
        Mode::ConsecutiveFailures(threshold) => {
            let streaks = tracker(&store)?.consecutive_failures(*threshold).await?;
            report::write_failure_streaks(&mut out, &streaks, *threshold)?;
        }
    }
    out.flush()?;

    Ok(0)
}

fn tracker(store: &Option<Arc<dyn ResultStore>>) -> Result<AlertTracker, BoxError> {
    let store = store.clone().ok_or("database is not enabled")?;
    Ok(AlertTracker::new(store))
}

/// First Ctrl-C stops dispatch and lets hosts in progress finish.
/// A second one exits immediately.
fn spawn_interrupt_handler() -> watch::Receiver<bool> {
    let (tx, rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_err() {
            return;
        }
        tracing::warn!("Interrupt received, finishing hosts already in progress (Ctrl-C again to abort)");
        let _ = tx.send(true);

        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("error: aborted");
            std::process::exit(INTERRUPTED_EXIT as i32);
        }
    });
    rx
}

async fn probe_hosts(
    cfg: &MonitorConfig,
    source: &HostSource,
    store: Option<Arc<dyn ResultStore>>,
    prober: Arc<dyn Prober>,
    shutdown: watch::Receiver<bool>,
    out: &mut impl Write,
) -> Result<RunStatus, BoxError> {
    let hosts = load_hosts(source, store.as_deref()).await?;
    if hosts.is_empty() {
        return Err("no hosts to monitor".into());
    }

    let engine = PingEngine::new(prober, cfg.engine.clone()).with_shutdown(shutdown);
    let outcomes = engine.run(&hosts).await;

    let mut status = RunStatus::Completed;
    if outcomes.len() < hosts.len() {
        tracing::warn!("Run interrupted: {} of {} hosts probed", outcomes.len(), hosts.len());
        status = RunStatus::Interrupted {
            probed: outcomes.len(),
            total: hosts.len(),
        };
    }

    if let Some(store) = store {
        store.insert_outcomes(&outcomes).await?;
        let summary = AlertTracker::new(store).reconcile(&outcomes).await;
        tracing::info!(
            "Alerts: {} opened, {} recovered, {} failed",
            summary.opened,
            summary.recovered,
            summary.failed
        );
        if summary.failed > 0 && status == RunStatus::Completed {
            status = RunStatus::AlertFailures(summary.failed);
        }
    }

    if !cfg.silent {
        report::write_outcomes(out, &outcomes, cfg.format)?;
    }
    out.flush()?;

    Ok(status)
}

async fn load_hosts(
    source: &HostSource,
    store: Option<&dyn ResultStore>,
) -> Result<BTreeMap<String, String>, BoxError> {
    match (source, store) {
        (HostSource::File(path), _) => {
            let hosts = hosts::read_hosts_file(path)?;
            tracing::info!("Loaded {} hosts from {}", hosts.len(), path.display());
            Ok(hosts)
        }
        (HostSource::Database, Some(store)) => {
            let hosts = store.list_hosts().await?;
            tracing::info!("Loaded {} hosts from database", hosts.len());
            Ok(hosts)
        }
        (HostSource::Database, None) => Err("database is not enabled".into()),
    }
}
