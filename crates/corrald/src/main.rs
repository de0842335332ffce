//! corrald — the Corral controller daemon and its admin commands.
//!
//! # Usage
//!
//! ```text
//! corrald run --config /etc/corral/corral.toml
//! corrald ping --role primary
//! corrald reconfigure --role secondary
//! corrald shutdown --core
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use corral_core::config::{ControllerConfig, LogFormat};
use corral_core::ControllerRole;
use corral_proto::ControllerClient;
use corrald::ControllerCore;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const DEFAULT_CONFIG: &str = "/etc/corral/corral.toml";

#[derive(Parser)]
#[command(name = "corrald", about = "Corral cluster controller")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the controller in the foreground.
    Run {
        #[arg(long, default_value = DEFAULT_CONFIG)]
        config: PathBuf,
    },
    /// Check that a controller is answering.
    Ping {
        /// primary | secondary (or 1 | 2).
        #[arg(long, default_value = "primary")]
        role: ControllerRole,
        #[arg(long, default_value = DEFAULT_CONFIG)]
        config: PathBuf,
    },
    /// Ask a controller to re-read its configuration.
    Reconfigure {
        #[arg(long, default_value = "primary")]
        role: ControllerRole,
        #[arg(long, default_value = DEFAULT_CONFIG)]
        config: PathBuf,
    },
    /// Shut down both controllers.
    Shutdown {
        /// Stop only the controllers, with a core dump.
        #[arg(long)]
        core: bool,
        #[arg(long, default_value = DEFAULT_CONFIG)]
        config: PathBuf,
    },
}

fn load_config(path: &Path) -> anyhow::Result<ControllerConfig> {
    ControllerConfig::from_file(path)
        .with_context(|| format!("failed to load config from {}", path.display()))
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,corrald=debug,corral=debug"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.init(),
    }
}

fn client(config: &Path) -> anyhow::Result<ControllerClient> {
    let config = load_config(config)?;
    Ok(ControllerClient::from_config(
        &config.controllers,
        config.msg_timeout(),
    ))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Run { config } => run(config).await,
        Command::Ping { role, config } => {
            init_tracing(LogFormat::Text);
            client(&config)?.ping(role)?;
            println!("{role} controller is up");
            Ok(())
        }
        Command::Reconfigure { role, config } => {
            init_tracing(LogFormat::Text);
            client(&config)?.reconfigure(role)?;
            println!("{role} controller reconfigured");
            Ok(())
        }
        Command::Shutdown { core, config } => {
            init_tracing(LogFormat::Text);
            client(&config)?.shutdown(core)?;
            println!("shutdown requested");
            Ok(())
        }
    }
}

async fn run(config_path: PathBuf) -> anyhow::Result<()> {
    let config = load_config(&config_path)?;
    init_tracing(config.log_format);
    info!(cluster = %config.cluster_name, config = ?config_path, "corral controller starting");

    let core = Arc::new(
        ControllerCore::start(config, Some(config_path)).context("controller failed to start")?,
    );

    // ── Wait for a signal or a shutdown request ────────────────

    let waiter = Arc::clone(&core);
    let requested = tokio::task::spawn_blocking(move || waiter.wait_for_shutdown_request());

    #[cfg(unix)]
    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;

    let core_dump = tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("received interrupt");
            false
        }
        _ = async {
            #[cfg(unix)]
            sigterm.recv().await;
            #[cfg(not(unix))]
            std::future::pending::<()>().await;
        } => {
            info!("received SIGTERM");
            false
        }
        result = requested => match result {
            Ok(core_dump) => core_dump,
            Err(e) => {
                warn!(error = %e, "shutdown waiter failed");
                false
            }
        },
    };

    // Flushes state and wakes the waiter if it is still blocked.
    let shutdown_core = Arc::clone(&core);
    tokio::task::spawn_blocking(move || shutdown_core.shutdown()).await?;

    if core_dump {
        warn!("core shutdown requested, aborting");
        std::process::abort();
    }
    info!("corral controller stopped");
    Ok(())
}
