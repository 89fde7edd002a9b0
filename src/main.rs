use clap::{Parser, ValueEnum};
use master_relay::{AppConfig, NodeCreationError, StoreError};
use slog::Drain;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;

#[derive(Parser)]
#[command(name = "master-relay", version, about = "Single-producer worker pool with store-arbitrated failover")]
struct Cli {
    /// Path to the YAML config file
    #[arg(long, default_value = "config/config.yaml")]
    config: PathBuf,

    #[arg(long, value_enum, default_value = "info")]
    log_level: LogLevel,

    /// Print and clear the shared error log, then exit
    #[arg(long)]
    get_errors: bool,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogLevel {
    Trace,
    Debug,
    Info,
    Warning,
    Error,
    Critical,
}

impl From<LogLevel> for slog::Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => slog::Level::Trace,
            LogLevel::Debug => slog::Level::Debug,
            LogLevel::Info => slog::Level::Info,
            LogLevel::Warning => slog::Level::Warning,
            LogLevel::Error => slog::Level::Error,
            LogLevel::Critical => slog::Level::Critical,
        }
    }
}

#[derive(Debug, thiserror::Error)]
enum RunError {
    #[error(transparent)]
    Startup(#[from] NodeCreationError),
    #[error("Failed to drain the error log: {0}")]
    DrainErrors(StoreError),
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let decorator = slog_term::TermDecorator::new().build();
    let drain = slog_term::FullFormat::new(decorator).use_file_location().build().fuse();
    let drain = slog::LevelFilter::new(drain, cli.log_level.into()).fuse();
    let (drain, log_guard) = slog_async::Async::new(drain).build_with_guard();
    let logger = slog::Logger::root(drain.fuse(), slog::o!());

    let result = run(&cli, logger.clone()).await;
    if let Err(e) = &result {
        slog::crit!(logger, "{}", e);
    }

    // Flush before exiting, exit() skips destructors.
    drop(logger);
    drop(log_guard);
    if result.is_err() {
        std::process::exit(1);
    }
}

async fn run(cli: &Cli, logger: slog::Logger) -> Result<(), RunError> {
    let config = AppConfig::from_file(&cli.config).map_err(NodeCreationError::from)?;
    let node = master_relay::try_create_redis_node(logger.clone(), &config).await?;

    if cli.get_errors {
        let errors = node
            .handle()
            .drain_errors()
            .await
            .map_err(RunError::DrainErrors)?;
        slog::info!(logger, "Drained {} error records", errors.len());
        for item in errors {
            slog::info!(logger, "Error record: {}", item);
        }
        return Ok(());
    }

    let shutdown = CancellationToken::new();
    tokio::spawn(cancel_on_signal(logger.clone(), shutdown.clone()));

    slog::info!(logger, "Starting node {}", node.id());
    node.run(shutdown).await;
    Ok(())
}

async fn cancel_on_signal(logger: slog::Logger, shutdown: CancellationToken) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = terminate.recv() => {}
                }
            }
            Err(e) => {
                slog::warn!(logger, "Can't listen for SIGTERM: {}", e);
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }

    slog::info!(logger, "Shutdown signal received, stopping");
    shutdown.cancel();
}
