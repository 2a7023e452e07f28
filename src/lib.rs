//! dutmash -- unattended fault and stress campaigns for a network device
//! under test.
//!
//! This crate drives sequences of fault/stress test invocations against a
//! single DUT over a private UDP control protocol, coordinates an external
//! traffic instrument around each invocation, and recovers from DUT hangs
//! through readiness detection and power-cycle escalation.

pub mod engine;
pub mod instrument;
pub mod plan;
pub mod proto;
pub mod results;
pub mod serial;

use std::path::PathBuf;

use anyhow::{Context, Result};
use tracing::{error, info};

use crate::engine::{CommandPowerSwitch, Engine, EngineConfig, SerialRequest, SystemPinger};
use crate::instrument::{CommandLink, Instrument, NullInstrument, RemoteInstrument};
use crate::plan::{PlanCompiler, PlanFile, TestCatalog};

/// Top-level campaign options, straight from the CLI.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub plan_path: PathBuf,
    /// Run only this suite instead of every enabled one.
    pub suite: Option<String>,
    /// Skip instrument initialization and load generation.
    pub no_load: bool,
    /// Echo serial capture to stdout.
    pub verbose_serial: bool,
}

/// Load the catalog and plan once, then execute the campaign suite by suite.
///
/// A fatal suite error abandons that suite and moves on; only configuration
/// failures abort the whole run.
pub async fn run(opts: RunOptions) -> Result<()> {
    let plan = PlanFile::load(&opts.plan_path)
        .with_context(|| format!("failed to load plan {}", opts.plan_path.display()))?;
    let catalog = TestCatalog::load(&plan.main.catalog)
        .with_context(|| format!("failed to load test catalog {}", plan.main.catalog.display()))?;
    info!(
        dut = %plan.main.dut,
        suites = plan.suites().len(),
        test_types = catalog.len(),
        "plan loaded"
    );

    if let Some(name) = &opts.suite {
        plan.suite(name)?;
    }

    let mut instrument: Box<dyn Instrument> = if opts.no_load {
        Box::new(NullInstrument)
    } else {
        info!(
            port = plan.main.instrument_port,
            "waiting for the instrument proxy to connect"
        );
        let link = CommandLink::accept(plan.main.instrument_port).await?;
        Box::new(RemoteInstrument::new(
            link,
            plan.main.instrument_ports.clone(),
            plan.main.load_mbits,
        ))
    };
    instrument
        .init()
        .await
        .context("instrument initialization failed")?;

    let power = CommandPowerSwitch::new(
        plan.main.power_off_cmd.clone(),
        plan.main.power_on_cmd.clone(),
    );
    let engine = Engine::new(
        EngineConfig::new(plan.main.dut),
        Box::new(SystemPinger),
        Box::new(power),
    );

    for (name, suite) in plan.suites() {
        if let Some(only) = &opts.suite {
            if name != only {
                continue;
            }
        }
        if !suite.enabled {
            info!(suite = %name, "suite disabled; skipping");
            continue;
        }

        let compiled = match PlanCompiler::compile(&plan, name) {
            Ok(compiled) => compiled,
            Err(e) => {
                error!(suite = %name, error = %e, "suite plan rejected");
                continue;
            }
        };
        let serial = suite
            .tty
            .clone()
            .or_else(|| plan.main.serial_device.clone())
            .map(|device| SerialRequest {
                device,
                verbose: opts.verbose_serial,
            });

        info!(suite = %name, "starting test suite");
        match engine
            .run_suite(name, &compiled, suite, &catalog, instrument.as_mut(), serial)
            .await
        {
            Ok(summary) => info!(
                suite = %name,
                completed = summary.completed,
                recorded_failures = summary.recorded_failures,
                results = %summary.result_file.display(),
                "suite finished"
            ),
            Err(e) => error!(suite = %name, error = %e, "suite aborted"),
        }
    }

    instrument
        .shutdown()
        .await
        .context("instrument shutdown failed")?;
    Ok(())
}
