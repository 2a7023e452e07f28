//! Test-execution engine: drives the control protocol for each invocation
//! and recovers from DUT hangs through readiness detection and power-cycle
//! escalation.

pub mod liveness;
pub mod power;
pub mod readiness;

pub use liveness::{Pinger, SystemPinger};
pub use power::{CommandPowerSwitch, PowerSwitch};
pub use readiness::ReadinessWatcher;

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;
use tokio::net::UdpSocket;
use tokio::time::{sleep, timeout, Instant};
use tracing::{info, warn};

use crate::instrument::Instrument;
use crate::plan::{CompiledSuite, SuiteConfig, TestCatalog, TestInvocation};
use crate::proto::wire::{self, AckStatus, WireError};
use crate::proto::{CONTROL_PORT, READINESS_PORT};
use crate::results::{ResultCode, ResultSink, TestResult};
use crate::serial::SerialCapture;

/// Fatal suite-level failures. The remaining invocations of the current
/// suite are abandoned; the campaign moves on to the next suite.
#[derive(Debug, Error)]
pub enum SuiteError {
    #[error("DUT did not answer the pre-test ping for test #{sequence}")]
    DutUnreachable { sequence: u32 },

    #[error("ack carries test id {got}, expected {want} (test #{sequence})")]
    AckMismatch { sequence: u32, want: u32, got: i32 },

    #[error("test type {test_id} was not recognized by the DUT (test #{sequence})")]
    UnknownTestType { sequence: u32, test_id: u32 },

    #[error("DUT nacked test #{sequence} with status {status}")]
    Nack { sequence: u32, status: u32 },

    #[error("start exchange for test #{sequence} timed out {attempts} times")]
    StartRetriesExhausted { sequence: u32, attempts: u32 },

    #[error("DUT never announced readiness after {0} power cycles")]
    RebootEscalationExhausted(u32),

    #[error("liveness probe failed: {0:#}")]
    Probe(anyhow::Error),

    #[error("power switch failure: {0:#}")]
    Power(anyhow::Error),

    #[error("instrument failure: {0:#}")]
    Instrument(anyhow::Error),

    #[error("serial capture failure: {0:#}")]
    Serial(anyhow::Error),

    #[error(transparent)]
    Wire(#[from] WireError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Timing and addressing knobs. Defaults match the deployed DUT firmware
/// contract; scenario tests shrink them.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Address of the device under test.
    pub dut: IpAddr,

    /// Destination port of the control exchange on the DUT.
    pub control_port: u16,

    /// Local bind address of the control socket.
    pub control_bind: SocketAddr,

    /// Local bind address of the readiness beacon socket.
    pub readiness_bind: SocketAddr,

    /// Ack receive window per send. Busy acks keep reading within the same
    /// window instead of resetting it.
    pub ack_timeout: Duration,

    /// Mid-test liveness probe cadence.
    pub probe_interval: Duration,

    /// Per-probe reply timeout.
    pub probe_timeout: Duration,

    /// Readiness wait budget, in ticks of `ready_tick`.
    pub ready_ticks: u32,
    pub ready_tick: Duration,

    /// Settle time between power-off and power-on.
    pub power_settle: Duration,

    /// Pause after a beacon before the next invocation.
    pub resume_debounce: Duration,

    /// Consecutive start-exchange timeouts tolerated per invocation.
    pub max_start_attempts: u32,

    /// Power cycles tolerated per readiness wait.
    pub max_power_cycles: u32,

    /// Directory receiving result files and serial logs.
    pub output_dir: PathBuf,
}

impl EngineConfig {
    pub fn new(dut: IpAddr) -> Self {
        Self {
            dut,
            control_port: CONTROL_PORT,
            control_bind: SocketAddr::from((Ipv4Addr::UNSPECIFIED, CONTROL_PORT)),
            readiness_bind: SocketAddr::from((Ipv4Addr::UNSPECIFIED, READINESS_PORT)),
            ack_timeout: Duration::from_secs(10),
            probe_interval: Duration::from_secs(1),
            probe_timeout: Duration::from_secs(1),
            ready_ticks: 120,
            ready_tick: Duration::from_secs(1),
            power_settle: Duration::from_secs(10),
            resume_debounce: Duration::from_secs(5),
            max_start_attempts: 3,
            max_power_cycles: 3,
            output_dir: PathBuf::from("."),
        }
    }
}

/// Serial capture request for one suite run.
#[derive(Debug, Clone)]
pub struct SerialRequest {
    pub device: PathBuf,
    pub verbose: bool,
}

/// Outcome summary of one suite run.
#[derive(Debug, Clone)]
pub struct SuiteSummary {
    pub suite: String,
    pub completed: u32,
    pub recorded_failures: u32,
    pub result_file: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ExchangeOutcome {
    Acked,
    TimedOut,
}

/// Sequential, single-flight executor for one DUT.
pub struct Engine {
    cfg: EngineConfig,
    pinger: Box<dyn Pinger>,
    power: Box<dyn PowerSwitch>,
}

impl Engine {
    pub fn new(cfg: EngineConfig, pinger: Box<dyn Pinger>, power: Box<dyn PowerSwitch>) -> Self {
        Self { cfg, pinger, power }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.cfg
    }

    /// Run every invocation of a compiled suite, strictly sequentially.
    ///
    /// Recorded per-invocation failures land in the result file and
    /// execution continues; a fatal [`SuiteError`] abandons the rest of the
    /// suite after releasing its resources.
    pub async fn run_suite(
        &self,
        name: &str,
        compiled: &CompiledSuite,
        suite: &SuiteConfig,
        catalog: &TestCatalog,
        instrument: &mut dyn Instrument,
        serial: Option<SerialRequest>,
    ) -> Result<SuiteSummary, SuiteError> {
        let stamp = chrono::Utc::now().format("%d-%m-%Y_%H-%M-%S");
        let result_path = self.cfg.output_dir.join(format!("results_{name}_{stamp}.txt"));
        let mut sink = ResultSink::create(&result_path)?;

        // one capture session spans the whole suite run
        let capture = match &serial {
            Some(request) => {
                let log_path = self.cfg.output_dir.join(format!("serial_{name}_{stamp}.log"));
                let capture = SerialCapture::init(&request.device, &log_path, request.verbose)
                    .await
                    .map_err(SuiteError::Serial)?;
                Some(capture)
            }
            None => None,
        };

        let outcome = self
            .run_invocations(name, compiled, suite, catalog, instrument, &mut sink)
            .await;

        if outcome.is_err() {
            if let Err(e) = instrument.stop_load().await {
                warn!(error = %e, "failed to stop load during suite teardown");
            }
        }
        if let Some(capture) = capture {
            if let Err(e) = capture.close().await {
                warn!(error = %e, "serial capture close failed");
            }
        }

        let (completed, recorded_failures) = outcome?;
        Ok(SuiteSummary {
            suite: name.to_string(),
            completed,
            recorded_failures,
            result_file: result_path,
        })
    }

    async fn run_invocations(
        &self,
        name: &str,
        compiled: &CompiledSuite,
        suite: &SuiteConfig,
        catalog: &TestCatalog,
        instrument: &mut dyn Instrument,
        sink: &mut ResultSink,
    ) -> Result<(u32, u32), SuiteError> {
        let control = UdpSocket::bind(self.cfg.control_bind).await?;
        let mut watcher = ReadinessWatcher::bind(self.cfg.readiness_bind, self.cfg.dut).await?;

        info!(
            suite = name,
            total = compiled.total(),
            loops = compiled.loops(),
            "suite started"
        );

        let mut completed = 0u32;
        let mut recorded_failures = 0u32;
        let mut invocations = compiled.invocations().peekable();

        while let Some(invocation) = invocations.next() {
            let remaining = invocations.peek().is_some();
            let description = catalog
                .get(invocation.test_id)
                .map(|t| t.description.as_str())
                .unwrap_or("?");
            info!(
                seq = invocation.sequence,
                id = invocation.test_id,
                test = description,
                iface = %invocation.interface,
                addr = invocation.address,
                "executing test"
            );

            let code = self
                .run_invocation(
                    &control,
                    &mut watcher,
                    instrument,
                    &invocation,
                    suite.load_delay,
                    remaining,
                    sink,
                )
                .await?;
            completed += 1;
            if code != ResultCode::Ok {
                recorded_failures += 1;
            }

            // a beacon left over from this invocation must not satisfy the
            // next one
            watcher = watcher.rebind().await?;
        }

        info!(suite = name, completed, recorded_failures, "suite done");
        Ok((completed, recorded_failures))
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_invocation(
        &self,
        control: &UdpSocket,
        watcher: &mut ReadinessWatcher,
        instrument: &mut dyn Instrument,
        invocation: &TestInvocation,
        load_delay: i64,
        remaining: bool,
        sink: &mut ResultSink,
    ) -> Result<ResultCode, SuiteError> {
        // network-layer unreachability before the first send is fatal to the
        // suite, unlike the recorded protocol timeouts below
        match self.pinger.ping(self.cfg.dut, self.cfg.probe_timeout).await {
            Ok(true) => {}
            Ok(false) => {
                return Err(SuiteError::DutUnreachable {
                    sequence: invocation.sequence,
                })
            }
            Err(e) => return Err(SuiteError::Probe(e)),
        }

        let mut retries = 0u32;
        loop {
            match self
                .armed_start(control, instrument, invocation, load_delay)
                .await?
            {
                ExchangeOutcome::Acked => break,
                ExchangeOutcome::TimedOut => {
                    retries += 1;
                    if retries >= self.cfg.max_start_attempts {
                        return Err(SuiteError::StartRetriesExhausted {
                            sequence: invocation.sequence,
                            attempts: retries,
                        });
                    }
                    warn!(
                        seq = invocation.sequence,
                        retries, "no start ack; waiting for the DUT before retrying"
                    );
                    self.await_ready(watcher, false).await?;
                }
            }
        }

        // RUNNING: one liveness probe per second of test duration
        let mut ticks = 0u64;
        for _ in 0..invocation.duration_secs {
            sleep(self.cfg.probe_interval).await;
            ticks += 1;
            let alive = match self.pinger.ping(self.cfg.dut, self.cfg.probe_timeout).await {
                Ok(alive) => alive,
                Err(e) => {
                    warn!(seq = invocation.sequence, error = %e, "mid-test probe error");
                    false
                }
            };
            if !alive {
                warn!(
                    seq = invocation.sequence,
                    ticks, "DUT stopped answering mid-test"
                );
                instrument.stop_load().await.map_err(SuiteError::Instrument)?;
                sink.append(&TestResult::new(
                    invocation,
                    ResultCode::MidTestTimeout,
                    ticks,
                    retries,
                    None,
                ))?;
                return Ok(ResultCode::MidTestTimeout);
            }
        }

        // graceful stop: a timeout here is recorded, not fatal
        let mut code = ResultCode::Ok;
        match self.exchange(control, invocation, true).await? {
            ExchangeOutcome::Acked => {}
            ExchangeOutcome::TimedOut => {
                warn!(
                    seq = invocation.sequence,
                    "no stop ack; recording a receive timeout"
                );
                code = ResultCode::RecvTimeout;
            }
        }

        instrument.stop_load().await.map_err(SuiteError::Instrument)?;
        let stats = instrument
            .collect_stats()
            .await
            .map_err(SuiteError::Instrument)?;
        sink.append(&TestResult::new(invocation, code, ticks, retries, stats))?;

        info!(
            seq = invocation.sequence,
            "test done; waiting for the DUT to announce readiness"
        );
        self.await_ready(watcher, remaining).await?;

        Ok(code)
    }

    /// Ordering policy: a negative delay arms load before the fault, a
    /// non-negative delay arms the fault before load.
    async fn armed_start(
        &self,
        control: &UdpSocket,
        instrument: &mut dyn Instrument,
        invocation: &TestInvocation,
        load_delay: i64,
    ) -> Result<ExchangeOutcome, SuiteError> {
        if load_delay < 0 {
            instrument.start_load().await.map_err(SuiteError::Instrument)?;
            sleep(Duration::from_secs(load_delay.unsigned_abs())).await;
            self.exchange(control, invocation, false).await
        } else {
            match self.exchange(control, invocation, false).await? {
                ExchangeOutcome::Acked => {}
                ExchangeOutcome::TimedOut => return Ok(ExchangeOutcome::TimedOut),
            }
            sleep(Duration::from_secs(load_delay as u64)).await;
            instrument.start_load().await.map_err(SuiteError::Instrument)?;
            Ok(ExchangeOutcome::Acked)
        }
    }

    /// One send plus a bounded ack window. Busy acks keep reading within
    /// the remaining window without consuming a retry.
    async fn exchange(
        &self,
        control: &UdpSocket,
        invocation: &TestInvocation,
        stop: bool,
    ) -> Result<ExchangeOutcome, SuiteError> {
        let packet = wire::encode_control(invocation, stop)?;
        control
            .send_to(&packet, (self.cfg.dut, self.cfg.control_port))
            .await?;

        let deadline = Instant::now() + self.cfg.ack_timeout;
        let mut buf = [0u8; 64];
        loop {
            let now = Instant::now();
            if now >= deadline {
                return Ok(ExchangeOutcome::TimedOut);
            }
            let (len, _from) = match timeout(deadline - now, control.recv_from(&mut buf)).await {
                Err(_) => return Ok(ExchangeOutcome::TimedOut),
                Ok(received) => received?,
            };

            let ack = wire::decode_ack(&buf[..len])?;
            match ack.status {
                AckStatus::Ack => {
                    if ack.test_id != invocation.test_id as i32 {
                        return Err(SuiteError::AckMismatch {
                            sequence: invocation.sequence,
                            want: invocation.test_id,
                            got: ack.test_id,
                        });
                    }
                    return Ok(ExchangeOutcome::Acked);
                }
                AckStatus::Busy => continue,
                AckStatus::UnknownTestType => {
                    return Err(SuiteError::UnknownTestType {
                        sequence: invocation.sequence,
                        test_id: invocation.test_id,
                    })
                }
                AckStatus::Nack(status) => {
                    return Err(SuiteError::Nack {
                        sequence: invocation.sequence,
                        status,
                    })
                }
            }
        }
    }

    /// Shared readiness path, used after every recorded invocation and
    /// between start-exchange retries: poll for the beacon, escalating
    /// through power cycles while the DUT stays silent.
    async fn await_ready(
        &self,
        watcher: &mut ReadinessWatcher,
        debounce: bool,
    ) -> Result<(), SuiteError> {
        let mut cycles = 0u32;
        loop {
            if watcher
                .wait_for_beacon(self.cfg.ready_ticks, self.cfg.ready_tick)
                .await?
            {
                if debounce {
                    info!(
                        delay_secs = self.cfg.resume_debounce.as_secs(),
                        "DUT ready; resuming shortly"
                    );
                    sleep(self.cfg.resume_debounce).await;
                }
                return Ok(());
            }

            cycles += 1;
            if cycles > self.cfg.max_power_cycles {
                return Err(SuiteError::RebootEscalationExhausted(
                    self.cfg.max_power_cycles,
                ));
            }
            warn!(cycles, "DUT silent past the readiness budget; power cycling");
            self.power.power_off().await.map_err(SuiteError::Power)?;
            sleep(self.cfg.power_settle).await;
            self.power.power_on().await.map_err(SuiteError::Power)?;
        }
    }
}
