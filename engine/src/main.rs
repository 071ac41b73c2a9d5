//! Chronos engine entry point
//!
//! Streams stats from every search node of a cluster, raises threshold
//! alerts and writes a report for every retired alert.

use std::panic::AssertUnwindSafe;
use std::process;

use anyhow::Context;
use clap::Parser;
use futures::FutureExt;
use tokio::signal;
use tracing::{debug, error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use chronos_engine::config::{split_additional_flags, CliArgs, EngineConfig, LoggingConfig};
use chronos_engine::event_bus::Notice;
use chronos_engine::service::{EngineService, ServiceChannels};

/// Exit code when the main loop panics
const PANIC_EXIT_CODE: i32 = 2;

#[tokio::main]
async fn main() {
    let code = match AssertUnwindSafe(run()).catch_unwind().await {
        Ok(code) => code,
        Err(_) => {
            eprintln!("chronos: main loop panicked");
            PANIC_EXIT_CODE
        }
    };
    process::exit(code);
}

async fn run() -> i32 {
    let (args, additional) = match split_additional_flags(std::env::args(), &CliArgs::known_flags()) {
        Ok(split) => split,
        Err(e) => {
            eprintln!("chronos: {e}");
            return chronos_engine::EngineError::from(e).exit_code();
        }
    };
    let cli = CliArgs::parse_from(args);

    let (config, adjustments) = match EngineConfig::resolve(&cli) {
        Ok(resolved) => resolved,
        Err(e) => {
            eprintln!("chronos: {e}");
            return chronos_engine::EngineError::from(e).exit_code();
        }
    };

    // Held until the process exits so buffered log lines are flushed
    let _guard = match initialize_logging(&config.logging) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("chronos: failed to initialize logging: {e:#}");
            return 1;
        }
    };

    info!(connection_string = %config.cluster.connection_string, "Starting Chronos");
    for adjustment in adjustments {
        warn!("{adjustment}");
    }

    let flags = config.threshold_flags(&additional);
    let (mut service, channels) = match EngineService::connect(&config, flags) {
        Ok(built) => built,
        Err(e) => {
            error!(error = %e, "failed to build engine service");
            return e.exit_code();
        }
    };

    if let Err(e) = service.start().await {
        error!(error = %e, "failed to start engine service");
        return e.exit_code();
    }

    let code = main_loop(channels).await;

    if let Err(e) = service.stop().await {
        warn!(error = %e, "engine service did not stop cleanly");
    }
    match service.metrics().export_text() {
        Ok(text) => debug!(metrics = %text, "final metrics"),
        Err(e) => debug!(error = %e, "failed to export metrics"),
    }
    info!(exit_code = code, "Chronos stopped");
    code
}

/// Log notices and diagnostics until a fatal diagnostic or Ctrl-C
async fn main_loop(mut channels: ServiceChannels) -> i32 {
    loop {
        tokio::select! {
            _ = signal::ctrl_c() => {
                info!("Received interrupt, shutting down");
                return 0;
            }
            Some(diagnostic) = channels.diagnostics.recv() => {
                if diagnostic.fatal {
                    error!(source = %diagnostic.source, node = ?diagnostic.node, "{}", diagnostic.message);
                    return diagnostic.exit_code;
                }
                warn!(source = %diagnostic.source, node = ?diagnostic.node, "{}", diagnostic.message);
            }
            Some(notice) = channels.notices.recv() => match &notice {
                Notice::Rebalance | Notice::Slow(_) => info!(notice = %notice, "cluster notice"),
                _ => debug!(notice = %notice, "cluster notice"),
            },
            else => return 0,
        }
    }
}

/// Initialize logging based on configuration
fn initialize_logging(config: &LoggingConfig) -> anyhow::Result<WorkerGuard> {
    let level = config.level.to_lowercase();
    let filter = EnvFilter::from_default_env()
        .add_directive(format!("chronos_engine={level}").parse().context("invalid log level")?)
        .add_directive(format!("chronos={level}").parse().context("invalid log level")?)
        .add_directive("hyper=warn".parse()?)
        .add_directive("reqwest=warn".parse()?);

    let (writer, guard) = match &config.file {
        Some(path) => {
            let dir = path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or_else(|| std::path::Path::new("."));
            let name = path.file_name().context("log file path has no file name")?;
            tracing_appender::non_blocking(tracing_appender::rolling::never(dir, name))
        }
        None => tracing_appender::non_blocking(std::io::stderr()),
    };

    if config.json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(writer))
            .try_init()?;
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(false).with_ansi(false).with_writer(writer))
            .try_init()?;
    }

    Ok(guard)
}
