mod config_commands;
mod sessions_commands;

use std::path::PathBuf;

use {
    clap::{Parser, Subcommand},
    tracing::info,
    tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt},
};

#[derive(Parser)]
#[command(name = "zaapi", version, about = "Zaapi: multi-session chat gateway")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Shorthand for `--log-level debug`.
    #[arg(long, global = true, default_value_t = false)]
    debug: bool,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,

    /// Look for the config file only in this directory.
    #[arg(long, global = true, env = "ZAAPI_CONFIG_DIR")]
    config_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP gateway.
    Gateway {
        /// Address to bind (overrides `server.host`).
        #[arg(long)]
        bind: Option<String>,
        /// Port to listen on (overrides `server.port`).
        #[arg(long)]
        port: Option<u16>,
    },
    /// Inspect sessions stored on disk.
    Sessions {
        #[command(subcommand)]
        action: sessions_commands::SessionAction,
    },
    /// Configuration management.
    Config {
        #[command(subcommand)]
        action: config_commands::ConfigAction,
    },
}

fn init_telemetry(cli: &Cli) {
    let level: &str = if cli.debug {
        "debug"
    } else {
        &cli.log_level
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    if cli.json_logs {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_target(true).with_thread_ids(false))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_ansi(true),
            )
            .init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_telemetry(&cli);

    if let Some(dir) = &cli.config_dir {
        zaapi_config::set_config_dir(dir.clone());
    }

    match cli.command {
        Commands::Gateway { bind, port } => {
            info!(version = env!("CARGO_PKG_VERSION"), "zaapi starting");
            let mut config = zaapi_config::discover_and_load();
            if let Some(bind) = bind {
                config.server.host = bind;
            }
            if let Some(port) = port {
                config.server.port = port;
            }
            zaapi_gateway::start_gateway(config).await
        },
        Commands::Sessions { action } => sessions_commands::handle_sessions(action),
        Commands::Config { action } => config_commands::handle_config(action),
    }
}
