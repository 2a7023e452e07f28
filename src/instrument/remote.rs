//! Remote instrument dispatch over the reverse-proxy control link.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufStream};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info};

use super::Instrument;

/// Line-oriented command channel to the instrument proxy.
///
/// Every operation is dispatched by name with an ordered argument list and
/// answered with a `code output` status line; non-zero codes fail the call.
pub struct CommandLink {
    stream: BufStream<TcpStream>,
}

impl CommandLink {
    /// Wait for the proxy to dial back on `port`.
    pub async fn accept(port: u16) -> Result<Self> {
        let listener = TcpListener::bind(("0.0.0.0", port))
            .await
            .with_context(|| format!("failed to listen for the instrument proxy on port {port}"))?;
        let (stream, peer) = listener
            .accept()
            .await
            .context("instrument proxy accept failed")?;
        info!(%peer, "instrument proxy connected");
        Ok(Self {
            stream: BufStream::new(stream),
        })
    }

    /// Dispatch one named operation and return its output.
    pub async fn invoke(&mut self, target: &str, operation: &str, args: &[&str]) -> Result<String> {
        let mut line = format!("invoke {target} {operation}");
        for arg in args {
            line.push(' ');
            line.push_str(arg);
        }
        line.push('\n');

        debug!(target, operation, "instrument invoke");
        self.stream.write_all(line.as_bytes()).await?;
        self.stream.flush().await?;

        let mut response = String::new();
        if self.stream.read_line(&mut response).await? == 0 {
            bail!("instrument proxy closed the link during '{operation}'");
        }
        let trimmed = response.trim_end();
        let (code, output) = trimmed.split_once(' ').unwrap_or((trimmed, ""));
        let code: i32 = code
            .parse()
            .with_context(|| format!("unparsable status line for '{operation}': {trimmed:?}"))?;
        if code != 0 {
            bail!("instrument rejected '{operation}' with code {code}: {output}");
        }
        Ok(output.to_string())
    }
}

/// Session-holding instrument wrapper on top of [`CommandLink`].
pub struct RemoteInstrument {
    link: CommandLink,
    ports: Vec<String>,
    load_mbits: u32,
    inited: bool,
    running: bool,
}

impl RemoteInstrument {
    pub fn new(link: CommandLink, ports: Vec<String>, load_mbits: u32) -> Self {
        Self {
            link,
            ports,
            load_mbits,
            inited: false,
            running: false,
        }
    }
}

#[async_trait]
impl Instrument for RemoteInstrument {
    async fn init(&mut self) -> Result<()> {
        if self.inited {
            return Ok(());
        }

        self.link
            .invoke("SessionManager", "OpenSession", &["StreamSession"])
            .await?;
        for port in &self.ports {
            self.link
                .invoke("Session", "ReservePort", &[port.as_str()])
                .await?;
        }
        let load = self.load_mbits.to_string();
        self.link
            .invoke("Traffic", "SetConstantLoad", &[load.as_str(), "MBITS_PER_SEC"])
            .await?;
        self.link
            .invoke("Capture", "SetCaptureMode", &["CYCLIC"])
            .await?;

        self.inited = true;
        Ok(())
    }

    async fn start_load(&mut self) -> Result<()> {
        if self.inited && !self.running {
            self.link.invoke("Capture", "StartCapture", &[]).await?;
            self.link.invoke("Traffic", "StartTest", &[]).await?;
            self.running = true;
        }
        Ok(())
    }

    async fn stop_load(&mut self) -> Result<()> {
        if self.running {
            self.running = false;
            self.link.invoke("Traffic", "StopTest", &[]).await?;
            self.link.invoke("Capture", "StopCapture", &[]).await?;
        }
        Ok(())
    }

    async fn collect_stats(&mut self) -> Result<Option<String>> {
        if !self.inited {
            return Ok(None);
        }
        let stats = self
            .link
            .invoke("Statistics", "CollectStats", &["INTEGRITY_ERRORS"])
            .await?;
        Ok(Some(stats))
    }

    async fn shutdown(&mut self) -> Result<()> {
        if self.running {
            self.stop_load().await?;
        }
        if self.inited {
            self.inited = false;
            self.link
                .invoke("SessionManager", "CloseSession", &[])
                .await?;
        }
        Ok(())
    }
}
