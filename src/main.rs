//! Tunn - SSH tunneling client
//!
//! This is the main entry point for the Tunn application.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use tokio::sync::broadcast;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;
use tunn::config::{load_config, Config, Mode};
use tunn::manager::Manager;

/// Tunn - SSH tunnel exposed as a local SOCKS5 or HTTP proxy
#[derive(Parser, Debug)]
#[command(name = "tunn")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.json")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Enable JSON logging format
    #[arg(long)]
    json_log: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Configuration file helpers
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Write a sample configuration file
    Generate {
        /// Output path
        #[arg(short, long, default_value = "config.json")]
        output: PathBuf,

        /// Connection mode of the sample
        #[arg(short, long, value_enum, default_value_t = ModeArg::Direct)]
        mode: ModeArg,
    },
    /// Validate a configuration file and print a summary
    Validate {
        /// Path to configuration file
        #[arg(short, long)]
        config: PathBuf,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum ModeArg {
    Direct,
    Proxy,
}

impl From<ModeArg> for Mode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Direct => Mode::Direct,
            ModeArg::Proxy => Mode::Proxy,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    match args.command {
        Some(Command::Config { action }) => run_config_command(action),
        None => run_tunnel(args).await,
    }
}

async fn run_tunnel(args: Args) -> Result<()> {
    // Setup logging
    setup_logging(&args.log_level, args.json_log)?;

    // Load configuration
    let config = load_config(&args.config)?;

    info!("Tunn v{}", tunn::VERSION);
    info!("Configuration loaded from: {:?}", args.config);
    info!("SSH target: {}:{}", config.ssh.host, config.ssh.port);
    info!(
        "Local {} proxy port: {}",
        config.listener.proxy_type, config.listener.port
    );

    // Setup shutdown signal
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

    // Handle Ctrl+C and termination signals (cross-platform)
    let shutdown_tx_clone = shutdown_tx.clone();
    tokio::spawn(async move {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            match signal(SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    tokio::select! {
                        _ = tokio::signal::ctrl_c() => {
                            info!("Received Ctrl+C, shutting down...");
                        }
                        _ = sigterm.recv() => {
                            info!("Received SIGTERM, shutting down...");
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!("Failed to setup SIGTERM handler: {}", e);
                    let _ = tokio::signal::ctrl_c().await;
                    info!("Received Ctrl+C, shutting down...");
                }
            }
        }

        #[cfg(not(unix))]
        {
            // On Windows, only handle Ctrl+C
            let _ = tokio::signal::ctrl_c().await;
            info!("Received Ctrl+C, shutting down...");
        }

        let _ = shutdown_tx_clone.send(true);
    });

    // Run the tunnel
    Manager::new(config).run(shutdown_rx).await
}

fn run_config_command(action: ConfigAction) -> Result<()> {
    match action {
        ConfigAction::Generate { output, mode } => {
            let config = Config::sample(mode.into());
            let json = serde_json::to_string_pretty(&config)
                .context("Failed to serialize sample configuration")?;
            std::fs::write(&output, json + "\n")
                .with_context(|| format!("Failed to write {:?}", output))?;
            println!("Sample configuration written to {}", output.display());
            Ok(())
        }
        ConfigAction::Validate { config } => {
            let loaded = load_config(&config)?;
            println!("Configuration is valid: {}", config.display());
            println!("  Mode:        {}", loaded.mode);
            if let (Some(host), Some(port)) = (&loaded.proxy_host, &loaded.proxy_port) {
                println!("  Proxy:       {}:{}", host, port);
            }
            println!("  SSH:         {}@{}:{}", loaded.ssh.username, loaded.ssh.host, loaded.ssh.port);
            println!(
                "  Listener:    {} on 127.0.0.1:{}",
                loaded.listener.proxy_type, loaded.listener.port
            );
            println!("  Payload:     {}", if loaded.http_payload.is_empty() { "none" } else { "set" });
            println!("  Timeout:     {}s", loaded.connection_timeout);
            Ok(())
        }
    }
}

/// Setup logging based on configuration
fn setup_logging(level: &str, json: bool) -> Result<()> {
    let level = match level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" | "warning" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    if json {
        let subscriber = FmtSubscriber::builder()
            .with_max_level(level)
            .json()
            .finish();
        tracing::subscriber::set_global_default(subscriber)?;
    } else {
        let subscriber = FmtSubscriber::builder()
            .with_max_level(level)
            .with_target(true)
            .with_thread_ids(false)
            .with_thread_names(false)
            .finish();
        tracing::subscriber::set_global_default(subscriber)?;
    }

    Ok(())
}
