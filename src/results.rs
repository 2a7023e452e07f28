//! Append-only result stream: one structured line per completed invocation.

use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};

use crate::plan::TestInvocation;

/// Terminal code of one invocation attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultCode {
    Ok,
    /// No ack datagram arrived within the receive window.
    RecvTimeout,
    /// The DUT stopped answering liveness probes mid-test.
    MidTestTimeout,
}

impl ResultCode {
    /// Numeric code written to the result stream. 0 and 4 follow the DUT
    /// firmware convention; 5 disambiguates the mid-test case.
    pub fn as_u32(self) -> u32 {
        match self {
            ResultCode::Ok => 0,
            ResultCode::RecvTimeout => 4,
            ResultCode::MidTestTimeout => 5,
        }
    }
}

/// One recorded invocation outcome. Written once, never mutated.
#[derive(Debug, Clone)]
pub struct TestResult {
    pub sequence: u32,
    pub timestamp: DateTime<Utc>,
    pub code: ResultCode,
    pub test_id: u32,
    pub interface: String,
    pub address: u32,
    pub mask: u32,
    pub elapsed_secs: u64,
    pub retries: u32,
    pub stats: Option<String>,
}

impl TestResult {
    pub fn new(
        invocation: &TestInvocation,
        code: ResultCode,
        elapsed_secs: u64,
        retries: u32,
        stats: Option<String>,
    ) -> Self {
        Self {
            sequence: invocation.sequence,
            timestamp: Utc::now(),
            code,
            test_id: invocation.test_id,
            interface: invocation.interface.clone(),
            address: invocation.address,
            mask: invocation.mask,
            elapsed_secs,
            retries,
            stats,
        }
    }
}

impl fmt::Display for TestResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "#{} ({}) ret: {} id: {} if: {} (o,m/c): ({},{}) time: {}s rtr: {}",
            self.sequence,
            self.timestamp.format("%d-%m-%Y %H-%M-%S"),
            self.code.as_u32(),
            self.test_id,
            self.interface,
            self.address,
            self.mask,
            self.elapsed_secs,
            self.retries,
        )?;
        if let Some(stats) = &self.stats {
            write!(f, " [{stats}]")?;
        }
        Ok(())
    }
}

/// Append-only sink, flushed after every line.
#[derive(Debug)]
pub struct ResultSink {
    file: File,
    path: PathBuf,
}

impl ResultSink {
    pub fn create(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&mut self, result: &TestResult) -> io::Result<()> {
        writeln!(self.file, "{result}")?;
        self.file.flush()
    }
}
