use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;

#[derive(Parser)]
#[command(
    name = "dutmash",
    about = "Unattended fault and stress test campaigns for a network device under test",
    version,
    long_about = None
)]
struct Cli {
    /// Path to the test plan file
    plan: PathBuf,

    /// Run only the named suite
    #[arg(long)]
    suite: Option<String>,

    /// Skip instrument initialization and load generation
    #[arg(long)]
    no_load: bool,

    /// Echo serial console capture to stdout
    #[arg(long)]
    verbose_serial: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    dutmash::run(dutmash::RunOptions {
        plan_path: cli.plan,
        suite: cli.suite,
        no_load: cli.no_load,
        verbose_serial: cli.verbose_serial,
    })
    .await
}
