//! CLI Module
//!
//! Command-line interface for wa-dispatcher using Clap v4.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;

use crate::config::Config;
use crate::logging;
use crate::session::StoreCleaner;

/// wa-dispatcher - bulk and scheduled WhatsApp messaging over one paired session
#[derive(Parser, Debug)]
#[command(name = "wa-dispatcher")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Enable debug mode (writes JSON log files under ~/.wa-dispatcher/logs/)
    #[arg(short, long, global = true)]
    pub debug: bool,

    /// Configuration file path
    #[arg(short, long, global = true)]
    pub config: Option<String>,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the HTTP service and pair the session (default)
    Serve,

    /// Write a default configuration file
    Init {
        /// Force overwrite existing configuration
        #[arg(short, long)]
        force: bool,
    },

    /// Show the effective configuration
    Config {
        /// Print the full configuration as TOML
        #[arg(long)]
        full: bool,
    },

    /// Log management operations
    Logs {
        #[command(subcommand)]
        operation: LogCommands,
    },

    /// Session store operations (run while the service is stopped)
    Session {
        #[command(subcommand)]
        operation: SessionCommands,
    },
}

#[derive(Subcommand, Debug)]
pub enum LogCommands {
    /// Show log file location and status
    Status,
    /// View recent log entries (requires debug mode)
    View {
        /// Number of lines to show (default: 50)
        #[arg(short, long, default_value = "50")]
        lines: usize,
    },
    /// Clean up old log files
    Clean {
        /// Maximum age in days (default: 7)
        #[arg(short = 'a', long, default_value = "7")]
        days: u64,
    },
}

#[derive(Subcommand, Debug)]
pub enum SessionCommands {
    /// Delete the session store so the next start asks for pairing
    Clean {
        /// Skip confirmation prompt
        #[arg(short, long)]
        force: bool,
    },
}

/// Main CLI entry point
pub async fn run(cli: Cli) -> Result<()> {
    if cli.debug {
        tracing::info!("Debug mode enabled");
    }

    // init writes the file the other commands read
    if let Some(Commands::Init { force }) = cli.command {
        return cmd_init(cli.config.as_deref(), force);
    }

    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        None | Some(Commands::Serve) => crate::app::serve(config).await,
        Some(Commands::Init { .. }) => Ok(()),
        Some(Commands::Config { full }) => cmd_config(&config, full),
        Some(Commands::Logs { operation }) => cmd_logs(&config, operation),
        Some(Commands::Session { operation }) => cmd_session(&config, operation).await,
    }
}

/// Load configuration from `config_path` or the default locations, then validate it.
pub fn load_config(config_path: Option<&str>) -> Result<Config> {
    let config = if let Some(path) = config_path {
        tracing::info!("Loading configuration from custom path: {}", path);
        Config::load_from_path(path)?
    } else {
        tracing::debug!("Loading default configuration");
        Config::load()?
    };

    config.validate()?;

    Ok(config)
}

/// Log directory in effect: `DEBUG_LOGS_LOCATION`, then config, then the default.
pub fn log_dir(config: Option<&Config>) -> PathBuf {
    if let Ok(dir) = std::env::var("DEBUG_LOGS_LOCATION") {
        return PathBuf::from(dir);
    }
    config
        .and_then(|c| c.logging.dir.clone())
        .unwrap_or_else(logging::default_log_dir)
}

fn cmd_init(config_path: Option<&str>, force: bool) -> Result<()> {
    let path = match config_path {
        Some(path) => PathBuf::from(path),
        None => Config::system_config_path().context("Could not determine config directory")?,
    };

    if path.exists() && !force {
        anyhow::bail!(
            "Configuration file already exists at: {}\nUse --force to overwrite",
            path.display()
        );
    }

    Config::default().save(&path)?;

    println!("✅ Configuration initialized at: {}", path.display());
    println!("\nNext steps:");
    println!("   1. Run 'wa-dispatcher serve'");
    println!("   2. Scan the pairing QR from WhatsApp > Linked devices");

    Ok(())
}

fn cmd_config(config: &Config, full: bool) -> Result<()> {
    if full {
        let rendered = toml::to_string_pretty(config).context("Failed to serialize config to TOML")?;
        println!("{}", rendered);
        return Ok(());
    }

    println!("wa-dispatcher configuration\n");
    println!("Listen: {}:{}", config.server.bind, config.server.port);
    println!("Uploads: {}", config.server.uploads_dir.display());
    println!("Session store: {}", config.session.store_dir.display());
    println!(
        "Scheduler: tick {} ms, keeps {} finished job(s)",
        config.scheduler.tick_ms, config.scheduler.history_limit
    );
    println!("Segments: {}", config.contacts.segments_path.display());
    println!("Log level: {}", config.logging.level);
    println!("\n💡 Use --full to print every setting");

    Ok(())
}

fn cmd_logs(config: &Config, operation: LogCommands) -> Result<()> {
    let dir = log_dir(Some(config));

    match operation {
        LogCommands::Status => {
            println!("Log directory: {}", dir.display());
            match logging::latest_log_file(&dir) {
                Some(latest) => {
                    let size = std::fs::metadata(&latest).map(|m| m.len()).unwrap_or(0);
                    println!("Latest log: {} ({:.2} KB)", latest.display(), size as f64 / 1024.0);
                }
                None => {
                    println!("Status: no log files");
                    println!("\n💡 Run with -d to write debug logs:");
                    println!("   wa-dispatcher -d serve");
                }
            }
            Ok(())
        }

        LogCommands::View { lines } => {
            let Some(path) = logging::latest_log_file(&dir) else {
                println!("No log files found in {}", dir.display());
                return Ok(());
            };
            println!("Last {} lines of: {}\n", lines, path.display());

            let file = std::fs::File::open(&path)?;
            let all_lines: Vec<String> = BufReader::new(file).lines().map_while(std::result::Result::ok).collect();
            let start = all_lines.len().saturating_sub(lines);
            for line in &all_lines[start..] {
                println!("{}", line);
            }
            if all_lines.is_empty() {
                println!("(empty log file)");
            }
            Ok(())
        }

        LogCommands::Clean { days } => {
            let removed = logging::cleanup_logs_in(&dir, days)?;
            if removed > 0 {
                println!("🧹 Removed {} old log file(s)", removed);
            } else {
                println!("No log files older than {} days", days);
            }
            Ok(())
        }
    }
}

async fn cmd_session(config: &Config, operation: SessionCommands) -> Result<()> {
    match operation {
        SessionCommands::Clean { force } => {
            let store = &config.session.store_dir;
            if !store.exists() {
                println!("Session store {} does not exist", store.display());
                return Ok(());
            }

            if !force {
                print!(
                    "Delete {}? The device will have to be paired again. Type 'yes' to confirm: ",
                    store.display()
                );
                std::io::stdout().flush()?;

                let mut input = String::new();
                std::io::stdin().read_line(&mut input)?;
                if input.trim().to_lowercase() != "yes" {
                    println!("Cancelled");
                    return Ok(());
                }
            }

            let cleaned = StoreCleaner::default()
                .clean(
                    store,
                    config.session.cleanup_attempts,
                    config.session.cleanup_delay(),
                )
                .await;
            if !cleaned {
                anyhow::bail!(
                    "Session store {} is still locked; stop the service and retry",
                    store.display()
                );
            }

            println!("✅ Removed session store {}", store.display());
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_command_is_serve() {
        let cli = Cli::parse_from(["wa-dispatcher", "-d"]);
        assert!(cli.debug);
        assert!(cli.command.is_none());

        let cli = Cli::parse_from(["wa-dispatcher", "logs", "clean", "--days", "3"]);
        assert!(matches!(
            cli.command,
            Some(Commands::Logs {
                operation: LogCommands::Clean { days: 3 }
            })
        ));
    }

    #[test]
    fn test_init_refuses_to_overwrite() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        let path_str = path.to_str().unwrap();

        cmd_init(Some(path_str), false).unwrap();
        assert!(path.exists());
        assert!(cmd_init(Some(path_str), false).is_err());
        cmd_init(Some(path_str), true).unwrap();

        let loaded = load_config(Some(path_str)).unwrap();
        assert_eq!(loaded.server.port, Config::default().server.port);
    }

    #[tokio::test]
    async fn test_session_clean_removes_store() {
        let dir = TempDir::new().unwrap();
        let mut config = Config::default();
        config.session.store_dir = dir.path().join("session");
        std::fs::create_dir_all(config.session.store_dir.join("Default")).unwrap();

        cmd_session(&config, SessionCommands::Clean { force: true })
            .await
            .unwrap();
        assert!(!config.session.store_dir.exists());
    }
}
