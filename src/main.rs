//! Step Recorder - native messaging host
//!
//! Launched by the browser for the recorder extension. Reads framed JSON
//! messages on stdin, answers on stdout, and logs to stderr.
//!
//! # Usage
//!
//! ```bash
//! step-recorder                            # default config
//! step-recorder --config /path/to/config.toml
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use step_recorder::{host, CapturePrimitive, CaptureSession, CommandCapture, Config, NullCapture};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Parse command line arguments, returning an explicit config path if given
fn parse_args() -> Option<PathBuf> {
    let args: Vec<String> = std::env::args().collect();
    let mut config_path = None;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--help" | "-h" => {
                print_help();
                std::process::exit(0);
            }
            "--version" | "-v" => {
                eprintln!("step-recorder v{}", env!("CARGO_PKG_VERSION"));
                std::process::exit(0);
            }
            "--config" | "-c" => {
                i += 1;
                if i < args.len() {
                    config_path = Some(PathBuf::from(&args[i]));
                }
            }
            // Browsers pass the extension origin (and a window handle on Windows)
            other if other.starts_with("chrome-extension://") || other.starts_with("--parent-window") => {}
            other => {
                eprintln!("Unknown argument: {}", other);
                eprintln!("Use --help for usage information.");
                std::process::exit(1);
            }
        }
        i += 1;
    }

    config_path
}

fn print_help() {
    eprintln!(
        r#"Step Recorder - turns recorded browser actions into documented steps

USAGE:
    step-recorder [OPTIONS]

OPTIONS:
    -h, --help              Show this help message
    -v, --version           Show version
    -c, --config <PATH>     Use a specific configuration file

The host speaks the browser native messaging protocol on stdin/stdout.
Logs go to stderr; set RUST_LOG to override the configured log level."#
    );
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config_path = parse_args();

    let config = match config_path {
        Some(path) => Config::load_from_path(path),
        None => Config::load(),
    };

    // stdout carries protocol frames, so logs must go to stderr
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| config.general.log_level.clone()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    info!("Starting Step Recorder host");

    if !config.general.enabled {
        info!("Recorder is disabled in configuration, exiting");
        return Ok(());
    }

    let primitive: Arc<dyn CapturePrimitive> = match config
        .acquisition
        .capture_command
        .as_deref()
        .and_then(CommandCapture::from_argv)
    {
        Some(capture) => {
            info!("Capturing screenshots with {:?}", capture.program());
            Arc::new(capture)
        }
        None => {
            warn!("No capture_command configured, steps will be recorded without screenshots");
            Arc::new(NullCapture)
        }
    };

    let session = CaptureSession::from_config(&config, primitive);

    tokio::select! {
        result = host::run(session.clone(), tokio::io::stdin(), tokio::io::stdout()) => {
            if let Err(e) = result {
                warn!("Host loop ended with error: {}", e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutting down...");
        }
    }

    let steps = session.stop().await;
    info!("Exiting with {} recorded steps", steps.len());

    Ok(())
}
