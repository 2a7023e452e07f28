//! Test plan files: campaign options plus one section per suite.
//!
//! A plan file is TOML with a `[main]` table for campaign-wide options and
//! one additional table per suite. Each suite carries a `plan` string of
//! newline-delimited lines in the form
//! `test-id interface duration-secs address mask`, where the address field is
//! either a literal or a `+n`/`-n` delta against the running offset.

pub mod catalog;
pub mod compiler;

pub use catalog::{TestCatalog, TestDefinition};
pub use compiler::{
    AddressSpec, CompiledSuite, Invocations, PlanCompiler, PlanEntry, TestInvocation,
};

use std::net::IpAddr;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PlanError {
    #[error("unknown suite '{0}'")]
    UnknownSuite(String),

    #[error("malformed plan line {line}: {reason}")]
    MalformedPlanLine { line: usize, reason: String },

    #[error("malformed catalog line {line}: {reason}")]
    MalformedCatalogLine { line: usize, reason: String },

    #[error("invalid suite '{name}': {source}")]
    InvalidSuite {
        name: String,
        source: toml::de::Error,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Toml(#[from] toml::de::Error),
}

/// `[main]` campaign options.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct MainConfig {
    /// Address of the device under test.
    pub dut: IpAddr,

    /// Test-type catalog file.
    #[serde(default = "default_catalog")]
    pub catalog: PathBuf,

    /// Serial console device captured during every suite run.
    #[serde(default)]
    pub serial_device: Option<PathBuf>,

    /// TCP port the instrument proxy dials back on.
    #[serde(default = "default_instrument_port")]
    pub instrument_port: u16,

    /// Instrument port identifiers reserved at session init.
    #[serde(default)]
    pub instrument_ports: Vec<String>,

    /// Constant load per stream, in Mbit/s.
    #[serde(default = "default_load_mbits")]
    pub load_mbits: u32,

    /// Commands driving the switchable supply for reboot escalation.
    #[serde(default)]
    pub power_off_cmd: Option<String>,
    #[serde(default)]
    pub power_on_cmd: Option<String>,
}

/// One named suite: ordered plan lines plus execution options.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct SuiteConfig {
    /// Newline-delimited plan lines.
    pub plan: String,

    /// How many times the entry list replays.
    #[serde(default = "default_loops")]
    pub loops: u32,

    /// Seconds between arming the fault and starting load; negative starts
    /// load first.
    #[serde(default)]
    pub load_delay: i64,

    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Per-suite serial device override.
    #[serde(default)]
    pub tty: Option<PathBuf>,
}

#[derive(Debug, Deserialize)]
struct RawPlan {
    main: MainConfig,
    #[serde(flatten)]
    suites: toml::Table,
}

/// A loaded plan file: campaign options plus suites in file order.
#[derive(Debug, Clone)]
pub struct PlanFile {
    pub main: MainConfig,
    suites: Vec<(String, SuiteConfig)>,
}

impl PlanFile {
    pub fn load(path: &Path) -> Result<Self, PlanError> {
        let text = std::fs::read_to_string(path)?;
        Self::parse(&text)
    }

    pub fn parse(text: &str) -> Result<Self, PlanError> {
        let raw: RawPlan = toml::from_str(text)?;
        let mut suites = Vec::with_capacity(raw.suites.len());
        for (name, value) in raw.suites {
            let suite = value
                .try_into()
                .map_err(|source| PlanError::InvalidSuite {
                    name: name.clone(),
                    source,
                })?;
            suites.push((name, suite));
        }
        Ok(Self {
            main: raw.main,
            suites,
        })
    }

    /// Suites in file order.
    pub fn suites(&self) -> &[(String, SuiteConfig)] {
        &self.suites
    }

    pub fn suite(&self, name: &str) -> Result<&SuiteConfig, PlanError> {
        self.suites
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, suite)| suite)
            .ok_or_else(|| PlanError::UnknownSuite(name.to_string()))
    }
}

fn default_catalog() -> PathBuf {
    PathBuf::from("tests.txt")
}

fn default_instrument_port() -> u16 {
    9001
}

fn default_load_mbits() -> u32 {
    1
}

fn default_loops() -> u32 {
    1
}

fn default_enabled() -> bool {
    true
}
