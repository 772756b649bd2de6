mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "sso-broker")]
#[command(about = "Short-lived cloud credentials through single sign-on")]
#[command(version)]
pub struct Cli {
    /// SSO instance to use (defaults to `default_sso`)
    #[arg(short, long, global = true)]
    pub sso: Option<String>,

    /// Configuration file (defaults to ~/.config/sso-broker/config.toml)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Also write logs to this file
    #[arg(long, global = true)]
    pub log_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Authenticate, reusing a cached token when it is still valid
    Login {
        /// Run the device flow even if a token is cached
        #[arg(short, long)]
        force: bool,
    },
    /// Log out and delete the cached token
    Logout,
    /// Delete the cached token and client registration
    Flush,
    /// Discover and list every reachable account and role
    List {
        /// Discovery worker pool size (defaults to `threads`)
        #[arg(short, long)]
        threads: Option<usize>,
    },
    /// Print credentials for one role as JSON
    Credentials {
        /// Account id
        #[arg(short, long)]
        account: String,

        /// Role name
        #[arg(short, long)]
        role: String,
    },
    /// Print the configuration file path
    ConfigPath,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let _guard = init_logging(cli.verbose, cli.log_file.as_deref())?;

    if let Commands::ConfigPath = cli.command {
        return commands::execute_config_path(cli.config.as_deref());
    }

    let config = commands::load_config(cli.config.as_deref())?;
    let broker = commands::open_broker(&config, cli.sso.as_deref())?;

    match cli.command {
        Commands::Login { force } => commands::execute_login(&broker, force).await,
        Commands::Logout => commands::execute_logout(&broker).await,
        Commands::Flush => commands::execute_flush(&broker).await,
        Commands::List { threads } => {
            commands::execute_list(&broker, threads.unwrap_or(config.threads)).await
        }
        Commands::Credentials { account, role } => {
            commands::execute_credentials(&broker, &account, &role).await
        }
        Commands::ConfigPath => Ok(()),
    }
}

fn init_logging(verbose: bool, log_file: Option<&Path>) -> Result<Option<WorkerGuard>> {
    let log_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "sso_broker={},sso_core={},sso_auth={}",
            log_level, log_level, log_level
        ))
    });

    let (file_layer, guard) = match log_file {
        Some(path) => {
            let directory = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or_else(|| Path::new("."));
            let file_name = path
                .file_name()
                .ok_or_else(|| anyhow::anyhow!("Invalid log file: {}", path.display()))?;
            let appender = tracing_appender::rolling::never(directory, file_name);
            let (non_blocking, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_ansi(true),
        )
        .with(file_layer)
        .with(filter)
        .init();

    Ok(guard)
}
