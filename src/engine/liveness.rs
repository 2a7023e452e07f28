use std::net::IpAddr;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;

/// ICMP echo seam; scenario tests substitute scripted probes.
#[async_trait]
pub trait Pinger: Send + Sync {
    /// One echo round-trip. `Ok(false)` means no reply within `timeout`.
    async fn ping(&self, target: IpAddr, timeout: Duration) -> Result<bool>;
}

/// Probes through the system `ping` binary.
#[derive(Debug, Default, Clone)]
pub struct SystemPinger;

#[async_trait]
impl Pinger for SystemPinger {
    async fn ping(&self, target: IpAddr, timeout: Duration) -> Result<bool> {
        // -W takes whole seconds; anything below rounds up to one
        let timeout_secs = timeout.as_secs_f64().max(1.0);

        let output = tokio::process::Command::new("ping")
            .arg("-c")
            .arg("1")
            .arg("-W")
            .arg(timeout_secs.to_string())
            .arg("-q")
            .arg(target.to_string())
            .output()
            .await
            .context("failed to execute ping")?;

        Ok(output.status.success())
    }
}
