use std::sync::Arc;

use {
    clap::{Parser, Subcommand},
    tracing::{info, warn},
    tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt},
};

use {
    manifold_gateway::{mux::Multiplexer, server::start_server, upstream::WsTransport},
    manifold_storage::SqliteStore,
};

#[derive(Parser)]
#[command(name = "manifold", about = "Manifold — gateway session multiplexer")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the multiplexer: upstream gateway link + front-end server.
    Serve {
        /// Override the configured bind address.
        #[arg(long)]
        bind: Option<String>,
        /// Override the configured port.
        #[arg(long)]
        port: Option<u16>,
    },
    /// Print the resolved configuration.
    Config,
}

fn init_telemetry(cli: &Cli) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

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

    match cli.command {
        Commands::Serve { bind, port } => serve(bind, port).await,
        Commands::Config => {
            let config = manifold_config::discover_and_load();
            println!("{}", toml::to_string_pretty(&config)?);
            Ok(())
        },
    }
}

async fn serve(bind: Option<String>, port: Option<u16>) -> anyhow::Result<()> {
    let config = manifold_config::discover_and_load();
    let bind = bind.unwrap_or_else(|| config.server.bind.clone());
    let port = port.unwrap_or(config.server.port);

    info!(version = env!("CARGO_PKG_VERSION"), "manifold starting");

    let store = Arc::new(SqliteStore::open(&config.storage.resolved_path()).await?);
    let transport = Arc::new(WsTransport::new(config.gateway.url.clone()));
    let mux = Multiplexer::new(store, transport, &config.gateway);

    // Only the very first connect failure surfaces here; the link keeps
    // retrying with backoff either way.
    if let Err(e) = mux.connect().await {
        warn!(url = %config.gateway.url, error = %e, "initial gateway connect failed");
    }

    tokio::select! {
        result = start_server(&bind, port, Arc::clone(&mux)) => result?,
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown requested");
            mux.shutdown().await;
        },
    }
    Ok(())
}
