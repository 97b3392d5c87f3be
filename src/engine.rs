//! Ping engine: probes every host under a global concurrency ceiling.
//!
//! A fixed pool of workers drains a shared queue of hosts. Each worker runs a
//! host's whole probe sequence before taking the next one, so at most
//! `max_concurrent` hosts are ever mid-sequence. Results come back in no
//! particular order.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use chrono::Local;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinSet;

use crate::db::{Host, ProbeOutcome};
use crate::probe::Prober;

/// Default ceiling on hosts probed at once.
pub const DEFAULT_MAX_CONCURRENT: usize = 50;

/// Per-run probing parameters.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// Sequential probes sent to each host.
    pub ping_count: u32,
    /// Timeout for each individual probe.
    pub timeout: Duration,
    /// Maximum number of hosts with a probe sequence in flight.
    pub max_concurrent: usize,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            ping_count: 3,
            timeout: Duration::from_secs(3),
            max_concurrent: DEFAULT_MAX_CONCURRENT,
        }
    }
}

/// Bounded worker pool over a [`Prober`].
pub struct PingEngine {
    prober: Arc<dyn Prober>,
    settings: EngineSettings,
    shutdown: Option<watch::Receiver<bool>>,
}

impl PingEngine {
    pub fn new(prober: Arc<dyn Prober>, settings: EngineSettings) -> Self {
        Self {
            prober,
            settings,
            shutdown: None,
        }
    }

    /// Stop dispatching new hosts once `shutdown` reads `true`.
    /// Hosts already being probed still run to completion.
    pub fn with_shutdown(mut self, shutdown: watch::Receiver<bool>) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    /// Probe every host and return one outcome per host, in arbitrary order.
    pub async fn run(&self, hosts: &BTreeMap<String, String>) -> Vec<ProbeOutcome> {
        if hosts.is_empty() {
            return Vec::new();
        }

        let queue: VecDeque<Host> = hosts
            .iter()
            .map(|(address, label)| Host::new(address.as_str(), label.as_str()))
            .collect();
        let queue = Arc::new(Mutex::new(queue));

        let workers = self.settings.max_concurrent.max(1).min(hosts.len());
        tracing::info!(
            "Probing {} hosts with {} workers ({} packets, {:?} timeout)",
            hosts.len(),
            workers,
            self.settings.ping_count,
            self.settings.timeout
        );

        let mut set = JoinSet::new();
        for _ in 0..workers {
            set.spawn(run_worker(
                queue.clone(),
                self.prober.clone(),
                self.settings.clone(),
                self.shutdown.clone(),
            ));
        }

        let mut outcomes = Vec::with_capacity(hosts.len());
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(mut batch) => outcomes.append(&mut batch),
                Err(e) => tracing::error!("Ping worker failed: {}", e),
            }
        }
        outcomes
    }
}

async fn run_worker(
    queue: Arc<Mutex<VecDeque<Host>>>,
    prober: Arc<dyn Prober>,
    settings: EngineSettings,
    shutdown: Option<watch::Receiver<bool>>,
) -> Vec<ProbeOutcome> {
    let mut outcomes = Vec::new();

    loop {
        if shutdown.as_ref().is_some_and(|rx| *rx.borrow()) {
            tracing::debug!("Shutdown requested, worker stops dispatching");
            break;
        }

        let next = queue.lock().await.pop_front();
        let Some(host) = next else {
            break;
        };

        outcomes.push(probe_host(prober.as_ref(), &host, &settings).await);
    }

    outcomes
}

/// Run one host's probe sequence and fold it into a single outcome.
///
/// Exactly `ping_count` probes are sent. The host counts as up when any probe
/// succeeds. Latency is the smallest elapsed time over all attempts, failed
/// ones included. With a count of zero nothing is sent and the host is
/// reported down with zero latency.
pub async fn probe_host(prober: &dyn Prober, host: &Host, settings: &EngineSettings) -> ProbeOutcome {
    let mut success = false;
    let mut fastest: Option<Duration> = None;

    for _ in 0..settings.ping_count {
        let attempt = prober.probe(&host.address, settings.timeout).await;
        success |= attempt.success;
        fastest = Some(fastest.map_or(attempt.elapsed, |f| f.min(attempt.elapsed)));
    }

    let latency_ms = fastest.unwrap_or_default().as_millis() as i64;
    tracing::debug!(
        "{} ({}): {} in {}ms",
        host.address,
        host.label,
        if success { "up" } else { "down" },
        latency_ms
    );

    ProbeOutcome {
        address: host.address.clone(),
        label: host.label.clone(),
        success,
        latency_ms,
        observed_at: Local::now().naive_local(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::ProbeAttempt;
    use async_trait::async_trait;
    use std::collections::{HashMap, HashSet};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex as StdMutex;

    /// Replays scripted attempts per address and records concurrency.
    #[derive(Default)]
    struct ScriptedProber {
        scripts: HashMap<String, Vec<(bool, u64)>>,
        calls: StdMutex<HashMap<String, usize>>,
        delay: Duration,
        in_flight: AtomicUsize,
        peak: AtomicUsize,
        stop_after_first: Option<watch::Sender<bool>>,
    }

    impl ScriptedProber {
        fn calls(&self, address: &str) -> usize {
            self.calls.lock().unwrap().get(address).copied().unwrap_or(0)
        }
    }

    #[async_trait]
    impl Prober for ScriptedProber {
        async fn probe(&self, address: &str, _timeout: Duration) -> ProbeAttempt {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);

            let call = {
                let mut calls = self.calls.lock().unwrap();
                let n = calls.entry(address.to_string()).or_insert(0);
                *n += 1;
                *n - 1
            };
            if let Some(tx) = &self.stop_after_first {
                let _ = tx.send(true);
            }
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }

            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            let (success, ms) = self
                .scripts
                .get(address)
                .map(|s| s[call % s.len()])
                .unwrap_or((true, 1));
            ProbeAttempt {
                success,
                elapsed: Duration::from_millis(ms),
            }
        }
    }

    fn hosts(n: usize) -> BTreeMap<String, String> {
        (0..n)
            .map(|i| (format!("10.0.{}.{}", i / 250, i % 250 + 1), format!("host{}", i)))
            .collect()
    }

    fn settings(ping_count: u32, max_concurrent: usize) -> EngineSettings {
        EngineSettings {
            ping_count,
            timeout: Duration::from_secs(1),
            max_concurrent,
        }
    }

    #[tokio::test]
    async fn test_all_failures_report_minimum_elapsed() {
        let prober = ScriptedProber {
            scripts: HashMap::from([(
                "10.0.0.1".to_string(),
                vec![(false, 3000), (false, 1200), (false, 2000)],
            )]),
            ..Default::default()
        };
        let host = Host::new("10.0.0.1", "web1");
        let outcome = probe_host(&prober, &host, &settings(3, 1)).await;

        assert!(!outcome.success);
        assert_eq!(outcome.latency_ms, 1200);
        assert_eq!(prober.calls("10.0.0.1"), 3);
    }

    #[tokio::test]
    async fn test_zero_count_sends_nothing() {
        let prober = ScriptedProber::default();
        let outcome = probe_host(&prober, &Host::new("10.0.0.1", "web1"), &settings(0, 1)).await;

        assert_eq!(prober.calls("10.0.0.1"), 0);
        assert!(!outcome.success);
        assert_eq!(outcome.latency_ms, 0);
    }

    #[tokio::test]
    async fn test_any_success_marks_host_up() {
        let prober = ScriptedProber {
            scripts: HashMap::from([(
                "10.0.0.1".to_string(),
                vec![(false, 50), (true, 80), (false, 10)],
            )]),
            ..Default::default()
        };
        let outcome = probe_host(&prober, &Host::new("10.0.0.1", "web1"), &settings(3, 1)).await;

        assert!(outcome.success);
        // Minimum includes the failed 10ms attempt
        assert_eq!(outcome.latency_ms, 10);
        assert_eq!(outcome.label, "web1");
    }

    #[tokio::test]
    async fn test_ceiling_bounds_hosts_in_flight() {
        let prober = Arc::new(ScriptedProber {
            delay: Duration::from_millis(5),
            ..Default::default()
        });
        let engine = PingEngine::new(prober.clone(), settings(2, 3));
        let hosts = hosts(20);

        let outcomes = engine.run(&hosts).await;

        assert_eq!(outcomes.len(), 20);
        let unique: HashSet<_> = outcomes.iter().map(|o| o.address.clone()).collect();
        assert_eq!(unique.len(), 20);
        assert!(prober.peak.load(Ordering::SeqCst) <= 3);
        for address in hosts.keys() {
            assert_eq!(prober.calls(address), 2, "probe count for {}", address);
        }
    }

    #[tokio::test]
    async fn test_hosts_below_ceiling_all_launch() {
        let prober = Arc::new(ScriptedProber {
            delay: Duration::from_millis(20),
            ..Default::default()
        });
        let engine = PingEngine::new(prober.clone(), settings(1, DEFAULT_MAX_CONCURRENT));

        let outcomes = engine.run(&hosts(4)).await;

        assert_eq!(outcomes.len(), 4);
        assert_eq!(prober.peak.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_multi_thread_runtime_respects_ceiling() {
        let prober = Arc::new(ScriptedProber {
            delay: Duration::from_millis(2),
            ..Default::default()
        });
        let engine = PingEngine::new(prober.clone(), settings(3, 5));

        let outcomes = engine.run(&hosts(40)).await;

        assert_eq!(outcomes.len(), 40);
        assert!(prober.peak.load(Ordering::SeqCst) <= 5);
    }

    #[tokio::test]
    async fn test_empty_host_set() {
        let engine = PingEngine::new(Arc::new(ScriptedProber::default()), EngineSettings::default());
        assert!(engine.run(&BTreeMap::new()).await.is_empty());
    }

    #[tokio::test]
    async fn test_shutdown_stops_dispatch() {
        let (tx, rx) = watch::channel(false);
        let prober = Arc::new(ScriptedProber {
            stop_after_first: Some(tx),
            ..Default::default()
        });
        let engine = PingEngine::new(prober.clone(), settings(2, 1)).with_shutdown(rx);

        let outcomes = engine.run(&hosts(5)).await;

        // The host in progress finishes its full sequence; nothing else starts
        assert_eq!(outcomes.len(), 1);
        assert_eq!(prober.calls(&outcomes[0].address), 2);
    }
}
