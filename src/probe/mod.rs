//! Probe primitive: one ICMP echo round-trip with a timeout.

mod ping;

pub use ping::*;

use std::time::{Duration, Instant};

use async_trait::async_trait;
use thiserror::Error;

/// Probe error types.
#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("probe timed out after {0:?}")]
    Timeout(Duration),
    #[error("network error: {0}")]
    Network(String),
    #[error("command failed: {0}")]
    Command(String),
}

/// Result of a single probe. `elapsed` is wall-clock time and is measured
/// whether or not the probe succeeded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeAttempt {
    pub success: bool,
    pub elapsed: Duration,
}

/// Sends one probe to one address.
#[async_trait]
pub trait Prober: Send + Sync {
    async fn probe(&self, address: &str, timeout: Duration) -> ProbeAttempt;
}

/// Extra time granted beyond the probe timeout before an attempt is abandoned.
/// Covers process spawn for the `ping` command fallback.
const ATTEMPT_GRACE: Duration = Duration::from_secs(2);

/// ICMP echo prober: native sockets when permitted, otherwise the system `ping`.
#[derive(Debug, Default, Clone, Copy)]
pub struct IcmpProber;

#[async_trait]
impl Prober for IcmpProber {
    async fn probe(&self, address: &str, timeout: Duration) -> ProbeAttempt {
        let start = Instant::now();
        let result = match tokio::time::timeout(timeout + ATTEMPT_GRACE, run_ping_probe(address, timeout)).await
        {
            Ok(r) => r,
            Err(_) => Err(ProbeError::Timeout(timeout)),
        };
        let elapsed = start.elapsed();

        if let Err(e) = &result {
            tracing::debug!("Probe to {} failed after {:?}: {}", address, elapsed, e);
        }

        ProbeAttempt {
            success: result.is_ok(),
            elapsed,
        }
    }
}
