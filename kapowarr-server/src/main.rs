//! # Kapowarr Server
//!
//! The service binary: wires up the core library and serves the REST
//! API and the websocket event channel.

mod auth;
mod config;
mod errors;
mod handlers;
mod routes;
mod state;
mod websocket;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use kapowarr_core::Application;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::config::ServerConfig;
use crate::state::{AppState, PowerAction};

/// Command line arguments for the Kapowarr server.
#[derive(Parser, Debug)]
#[command(name = "kapowarr")]
#[command(about = "Comic library automation service")]
struct Args {
    /// Path to a config file (TOML)
    #[arg(short, long, env = "KAPOWARR_CONFIG")]
    config: Option<PathBuf>,

    /// Server port (overrides config)
    #[arg(short, long, env = "KAPOWARR_PORT")]
    port: Option<u16>,

    /// Server host (overrides config)
    #[arg(long, env = "KAPOWARR_HOST")]
    host: Option<String>,

    /// Data folder (overrides config)
    #[arg(short, long, env = "KAPOWARR_DATA_FOLDER")]
    data_folder: Option<PathBuf>,
}

fn init_tracing(log_file: Option<&PathBuf>) {
    let file_layer = log_file.map(|path| {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .expect("log file must be writable");
        tracing_subscriber::fmt::layer()
            .with_ansi(false)
            .with_writer(std::sync::Mutex::new(file))
    });

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .with(file_layer)
        .init();
}

async fn run(config: ServerConfig) -> anyhow::Result<PowerAction> {
    let app = Application::new(&config.data_folder).await?;

    let shutdown = CancellationToken::new();
    app.start(shutdown.clone());

    let (power_tx, mut power_rx) = mpsc::channel::<PowerAction>(1);
    let app_state = AppState {
        app: app.clone(),
        config: Arc::new(config.clone()),
        power: power_tx,
    };

    let router = routes::router(app_state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let address: SocketAddr =
        format!("{}:{}", config.host, config.port).parse()?;
    let listener = tokio::net::TcpListener::bind(address).await?;
    info!("Kapowarr running on http://{address}{}", config.normalized_url_base());

    let serve_shutdown = shutdown.clone();
    let server = axum::serve(listener, router).with_graceful_shutdown(
        async move { serve_shutdown.cancelled().await },
    );

    let mut action = PowerAction::Shutdown;
    tokio::select! {
        result = server => {
            result?;
        }
        received = power_rx.recv() => {
            if let Some(received) = received {
                action = received;
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received interrupt");
        }
    }

    info!("Shutting down Kapowarr...");
    shutdown.cancel();
    app.database.close().await;
    Ok(action)
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let mut config = match ServerConfig::load(args.config.as_ref()) {
        Ok(config) => config,
        Err(error) => {
            eprintln!("Could not load configuration: {error}");
            return ExitCode::FAILURE;
        }
    };
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(host) = args.host {
        config.host = host;
    }
    if let Some(data_folder) = args.data_folder {
        config.data_folder = data_folder;
    }

    init_tracing(config.log_file.as_ref());

    match run(config).await {
        // A restart is signalled to the wrapper script via the exit
        // code, like service managers expect.
        Ok(PowerAction::Restart) => ExitCode::from(131),
        Ok(PowerAction::Shutdown) => ExitCode::SUCCESS,
        Err(error) => {
            error!("Fatal: {error}");
            ExitCode::FAILURE
        }
    }
}
