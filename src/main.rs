//! Audiobat - audio loopback hardware verification
//!
//! Entry point for the command-line tool. Exit status is 0 when every
//! channel passed, 1 on a negative verdict and 2 when the run failed.

use anyhow::{Context, Result};
use audiobat::cli::Cli;
use audiobat_core::audio::endpoint::PcmBackend;
use audiobat_core::audio::stream::CancelToken;
use audiobat_core::audio::virtual_loop::VirtualLoopback;
use audiobat_core::config::{BackendKind, TestConfig};
use audiobat_core::{Orchestrator, RunReport};
use clap::Parser;
use std::process::ExitCode;
use tracing::{info, warn};

fn main() -> ExitCode {
    // Initialize logging
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("audiobat=info,audiobat_core=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match run(&cli) {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::from(2)
        }
    }
}

fn run(cli: &Cli) -> Result<u8> {
    if cli.list_devices {
        list_devices()?;
        return Ok(0);
    }

    let options = cli.to_options()?;
    let config = TestConfig::resolve(&options).context("invalid configuration")?;
    info!(
        version = audiobat::VERSION,
        build_date = audiobat::BUILD_DATE,
        mode = %config.mode,
        backend = %config.backend,
        "audiobat starting"
    );

    let cancel = CancelToken::new();
    let handler_token = cancel.clone();
    if let Err(e) = ctrlc::set_handler(move || handler_token.cancel()) {
        warn!(error = %e, "Ctrl+C handler not installed");
    }

    let report = match config.backend {
        BackendKind::Virtual => execute(VirtualLoopback::new(), config, cancel)?,
        #[cfg(feature = "hardware")]
        BackendKind::Cpal => execute(audiobat_core::audio::hardware::CpalBackend::new(), config, cancel)?,
        #[cfg(not(feature = "hardware"))]
        BackendKind::Cpal => anyhow::bail!("built without hardware support, use --backend virtual"),
    };

    if cli.json {
        println!("{}", report.to_json()?);
    } else {
        print!("{}", report.render());
    }
    Ok(report.exit_code() as u8)
}

fn execute<B: PcmBackend>(backend: B, config: TestConfig, cancel: CancelToken) -> Result<RunReport> {
    let report = Orchestrator::new(backend, config).with_cancel(cancel).run()?;
    Ok(report)
}

#[cfg(feature = "hardware")]
fn list_devices() -> Result<()> {
    use audiobat_core::audio::endpoint::Direction;
    use audiobat_core::audio::hardware::CpalBackend;

    let backend = CpalBackend::new();
    for direction in [Direction::Playback, Direction::Capture] {
        let names = backend.device_names(direction)?;
        println!("{} devices:", direction);
        if names.is_empty() {
            println!("  (none)");
        }
        for (card, name) in names.iter().enumerate() {
            println!("  {}: {}", card, name);
        }
    }
    Ok(())
}

#[cfg(not(feature = "hardware"))]
fn list_devices() -> Result<()> {
    anyhow::bail!("built without hardware support")
}
