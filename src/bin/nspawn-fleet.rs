//! nspawn-fleet - converge systemd-nspawn machines to a desired-state document
//!
//! ## Usage
//!
//! ```sh
//! nspawn-fleet --mode create  --config fleet.yaml
//! nspawn-fleet --mode start   < fleet.yaml
//! nspawn-fleet --mode stop    --config fleet.json
//! nspawn-fleet --mode destroy --config fleet.yaml --debug
//! ```
//!
//! The document is read from standard input unless `--config` names a file.
//! Files ending in `.json` are decoded as JSON, everything else as YAML.

use clap::Parser;
use nspawn_fleet::{
    ConfigFormat, Error, Fleet, FleetOptions, FleetSpec, Mode, Result, SystemdBus, WaitPolicy,
};
use std::io::Read;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

// =============================================================================
// Arguments
// =============================================================================

#[derive(Parser, Debug)]
#[command(name = "nspawn-fleet", version, about)]
struct Cli {
    /// Desired-state document, `-` for standard input
    #[arg(long, default_value = "-")]
    config: String,

    /// What to do with each machine: create, start, stop, destroy
    #[arg(long, default_value = "create")]
    mode: Mode,

    /// Enable debug logging
    #[arg(long)]
    debug: bool,

    /// First delay between two polls of the bus, in milliseconds
    #[arg(long, value_name = "MS")]
    poll_interval_ms: Option<u64>,

    /// Upper bound on every wait, in seconds
    #[arg(long, value_name = "SECS")]
    timeout_secs: Option<u64>,
}

impl Cli {
    fn wait_policy(&self) -> WaitPolicy {
        let mut policy = WaitPolicy::default();
        if let Some(ms) = self.poll_interval_ms {
            policy = policy.with_interval(Duration::from_millis(ms));
        }
        if let Some(secs) = self.timeout_secs {
            policy = policy.with_timeout(Duration::from_secs(secs));
        }
        policy
    }
}

// =============================================================================
// Commands
// =============================================================================

fn read_config(source: &str) -> Result<FleetSpec> {
    let text = if source == "-" {
        info!("Reading config from stdin");
        let mut text = String::new();
        std::io::stdin().read_to_string(&mut text)?;
        text
    } else {
        info!(file = %source, "Reading config");
        std::fs::read_to_string(source)?
    };

    let format = ConfigFormat::from_path(source);
    info!(?format, "Decoding config");
    FleetSpec::parse(&text, format)
}

async fn execute(cli: &Cli) -> Result<()> {
    info!(mode = %cli.mode, "Starting with mode");
    let mut spec = read_config(&cli.config)?;

    let options = FleetOptions {
        wait: cli.wait_policy(),
        ..FleetOptions::default()
    };
    let bus = Arc::new(SystemdBus::connect().await?);
    let mut fleet = Fleet::for_spec(bus, &spec, options);
    fleet.run(cli.mode, &mut spec).await
}

// =============================================================================
// Main
// =============================================================================

fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = if cli.debug {
        "nspawn_fleet=debug"
    } else {
        "nspawn_fleet=info"
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| filter.into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!(error = %Error::Io(e), "Failed to start runtime");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(execute(&cli)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(mode = %cli.mode, error = %e, "Run failed");
            ExitCode::FAILURE
        }
    }
}
