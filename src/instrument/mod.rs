//! Traffic-generation instrument collaborators.

pub mod remote;

pub use remote::{CommandLink, RemoteInstrument};

use anyhow::Result;
use async_trait::async_trait;

/// Opaque start/stop/stat surface of the traffic instrument.
///
/// The engine drives load around each invocation through this trait and
/// stays ignorant of any instrument command vocabulary.
#[async_trait]
pub trait Instrument: Send {
    /// One-time session setup before the first suite runs.
    async fn init(&mut self) -> Result<()>;

    async fn start_load(&mut self) -> Result<()>;

    async fn stop_load(&mut self) -> Result<()>;

    /// Load statistics for the invocation that just finished, if any.
    async fn collect_stats(&mut self) -> Result<Option<String>>;

    /// Tear the session down at the end of the campaign.
    async fn shutdown(&mut self) -> Result<()>;
}

/// Stand-in used when load generation is disabled (`--no-load`).
#[derive(Debug, Default)]
pub struct NullInstrument;

#[async_trait]
impl Instrument for NullInstrument {
    async fn init(&mut self) -> Result<()> {
        Ok(())
    }

    async fn start_load(&mut self) -> Result<()> {
        Ok(())
    }

    async fn stop_load(&mut self) -> Result<()> {
        Ok(())
    }

    async fn collect_stats(&mut self) -> Result<Option<String>> {
        Ok(None)
    }

    async fn shutdown(&mut self) -> Result<()> {
        Ok(())
    }
}
