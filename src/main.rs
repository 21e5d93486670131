use anyhow::Result;
use clap::Parser;
use wa_dispatcher::{cli, logging};

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file before anything else (silently ignore if missing)
    dotenvy::dotenv().ok();

    let cli_args = cli::Cli::parse();

    // Config errors are reported by cli::run once logging is up
    let file_config = cli::load_config(cli_args.config.as_deref()).ok();

    let mut log_config = logging::LogConfig::new()
        .with_debug_mode(cli_args.debug)
        .with_log_dir(cli::log_dir(file_config.as_ref()));
    if let Some(config) = &file_config {
        log_config = log_config.with_level(config.logging.level.clone());
    }

    let _guard = logging::init_logging(log_config)
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;

    // Clean up old log files (keep last 7 days)
    if cli_args.debug
        && let Ok(removed) = logging::cleanup_logs_in(&cli::log_dir(file_config.as_ref()), 7)
        && removed > 0
    {
        tracing::info!("Cleaned up {} old log file(s)", removed);
    }

    cli::run(cli_args).await
}
