//! Readiness gating for freshly started containers.

use std::time::Duration;

use preset_registry::{PresetHandler, ProbeFailure};
use provisioner_shared_types::{Address, Preset, Protocol, ProvisionError, Result};
use tokio::net::TcpStream;
use tokio::time::{self, Instant};
use tracing::{debug, info};

pub const DEFAULT_PROBE_INTERVAL: Duration = Duration::from_millis(250);
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(1);

/// Polls a container at a fixed interval until every published TCP port
/// accepts a connection and the preset's own health check passes.
#[derive(Debug, Clone)]
pub struct ReadinessProber {
    interval: Duration,
    connect_timeout: Duration,
    connect_check: bool,
}

impl Default for ReadinessProber {
    fn default() -> Self {
        Self::new(DEFAULT_PROBE_INTERVAL)
    }
}

impl ReadinessProber {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            connect_check: true,
        }
    }

    /// Toggle the TCP connect step; the handler check always runs.
    pub fn with_connect_check(mut self, enabled: bool) -> Self {
        self.connect_check = enabled;
        self
    }

    /// Returns on the first passing probe or fails with
    /// [`ProvisionError::Timeout`] carrying the last probe failure once
    /// `timeout` has elapsed.
    pub async fn wait_ready(
        &self,
        handler: &dyn PresetHandler,
        preset: &Preset,
        address: &Address,
        timeout: Duration,
    ) -> Result<()> {
        let started = Instant::now();
        let deadline = started + timeout;
        let mut attempt: u32 = 0;
        let mut last_error = String::from("no probe completed");

        loop {
            attempt += 1;
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }

            match time::timeout(remaining, self.probe(handler, preset, address)).await {
                Ok(Ok(())) => {
                    info!(
                        kind = %preset.kind(),
                        attempts = attempt,
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "Container ready"
                    );
                    return Ok(());
                }
                Ok(Err(failure)) => {
                    debug!(kind = %preset.kind(), attempt, error = %failure, "Readiness probe failed");
                    last_error = failure.to_string();
                }
                Err(_) => {
                    last_error = format!("probe still running at deadline (previous: {last_error})");
                    break;
                }
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            time::sleep(self.interval.min(remaining)).await;
        }

        Err(ProvisionError::Timeout {
            what: "readiness".to_string(),
            elapsed: started.elapsed(),
            last_error,
        })
    }

    async fn probe(
        &self,
        handler: &dyn PresetHandler,
        preset: &Preset,
        address: &Address,
    ) -> std::result::Result<(), ProbeFailure> {
        if self.connect_check {
            for (name, bound) in &address.ports {
                if bound.protocol != Protocol::Tcp {
                    continue;
                }
                let target = format!("{}:{}", address.host, bound.port);
                match time::timeout(self.connect_timeout, TcpStream::connect(&target)).await {
                    Ok(Ok(_)) => {}
                    Ok(Err(e)) => {
                        return Err(ProbeFailure::new(format!("port {name} ({target}): {e}")))
                    }
                    Err(_) => {
                        return Err(ProbeFailure::new(format!(
                            "port {name} ({target}): connect timed out"
                        )))
                    }
                }
            }
        }

        handler.health_check(preset, address).await
    }
}
