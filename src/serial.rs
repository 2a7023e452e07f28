//! Background serial console capture.
//!
//! One capture session spans an entire suite run. The reader task is a pure
//! logging side-channel: it only synchronizes with the engine through the
//! cancellation token and the join in [`SerialCapture::close`].

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::info;

pub struct SerialCapture {
    cancel: CancellationToken,
    verbose: Arc<AtomicBool>,
    task: JoinHandle<Result<()>>,
}

impl SerialCapture {
    /// Open `device` and start mirroring it into `log_path`.
    pub async fn init(device: &Path, log_path: &Path, verbose: bool) -> Result<Self> {
        let dev = File::open(device)
            .await
            .with_context(|| format!("failed to open serial device {}", device.display()))?;
        let mut log = File::create(log_path)
            .await
            .with_context(|| format!("failed to create serial log {}", log_path.display()))?;

        let opened = format!(
            "Opened {} @ {}\n",
            device.display(),
            Utc::now().format("%d-%m-%Y_%H-%M-%S")
        );
        let header = format!(
            "DUT serial console log\n{opened}{}\n",
            "*".repeat(opened.len() - 1)
        );
        log.write_all(header.as_bytes()).await?;

        let cancel = CancellationToken::new();
        let verbose = Arc::new(AtomicBool::new(verbose));
        let task = tokio::spawn(read_loop(dev, log, cancel.clone(), verbose.clone()));

        info!(
            device = %device.display(),
            log = %log_path.display(),
            "serial capture started"
        );
        Ok(Self {
            cancel,
            verbose,
            task,
        })
    }

    /// Toggle echoing captured output to stdout.
    pub fn set_verbose(&self, verbose: bool) {
        self.verbose.store(verbose, Ordering::Relaxed);
    }

    /// Stop the reader and flush the log; returns once the task has joined.
    pub async fn close(self) -> Result<()> {
        self.cancel.cancel();
        self.task.await.context("serial capture task panicked")?
    }
}

async fn read_loop(
    mut dev: File,
    mut log: File,
    cancel: CancellationToken,
    verbose: Arc<AtomicBool>,
) -> Result<()> {
    let mut buf = vec![0u8; 4096];
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            read = dev.read(&mut buf) => match read? {
                // regular files reach EOF; a console device just goes quiet
                0 => tokio::time::sleep(Duration::from_millis(200)).await,
                n => write_chunk(&mut log, &buf[..n], &verbose).await?,
            },
        }
    }

    // drain whatever is still pending on the device
    if let Ok(Ok(n)) = timeout(Duration::from_secs(1), dev.read(&mut buf)).await {
        if n > 0 {
            write_chunk(&mut log, &buf[..n], &verbose).await?;
        }
    }
    log.flush().await?;
    Ok(())
}

async fn write_chunk(log: &mut File, chunk: &[u8], verbose: &AtomicBool) -> Result<()> {
    if verbose.load(Ordering::Relaxed) {
        print!("{}", String::from_utf8_lossy(chunk));
    }
    log.write_all(chunk).await?;
    Ok(())
}
