//! Reboot escalation through an external switchable supply.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use tracing::warn;

/// Switchable-supply seam used when the DUT stops announcing readiness.
#[async_trait]
pub trait PowerSwitch: Send + Sync {
    async fn power_off(&self) -> Result<()>;
    async fn power_on(&self) -> Result<()>;
}

/// Drives the supply through configured shell commands.
#[derive(Debug, Clone, Default)]
pub struct CommandPowerSwitch {
    off_cmd: Option<String>,
    on_cmd: Option<String>,
}

impl CommandPowerSwitch {
    pub fn new(off_cmd: Option<String>, on_cmd: Option<String>) -> Self {
        Self { off_cmd, on_cmd }
    }

    async fn run(cmd: &Option<String>, action: &str) -> Result<()> {
        let Some(cmd) = cmd else {
            warn!(action, "no supply command configured; skipping");
            return Ok(());
        };

        let status = tokio::process::Command::new("sh")
            .arg("-c")
            .arg(cmd)
            .status()
            .await
            .with_context(|| format!("failed to run {action} command"))?;
        if !status.success() {
            bail!("{action} command exited with {status}");
        }
        Ok(())
    }
}

#[async_trait]
impl PowerSwitch for CommandPowerSwitch {
    async fn power_off(&self) -> Result<()> {
        Self::run(&self.off_cmd, "power-off").await
    }

    async fn power_on(&self) -> Result<()> {
        Self::run(&self.on_cmd, "power-on").await
    }
}
