use std::sync::Arc;

use clap::Parser;
use tokio::net::TcpListener;
use tokio::signal;
use tonic_health::server::{health_reporter, HealthReporter};
use tracing::{error, info};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracker::auth::IdentityHeader;
use tracker::gateway::Gateway;
use tracker::mux::{Multiplexer, Protocol};
use tracker::proto::api_server::ApiServer;
use tracker::server::{serve_http, serve_rpc, ApiService, ServerConfig, ServerState};

#[derive(Parser, Debug)]
#[command(name = "server")]
#[command(about = "Tracker server: gRPC and HTTP/JSON on a single port", long_about = None)]
#[command(version)]
struct Args {
    /// Host to bind to
    #[arg(short = 'H', long, env = "TRACKER_HOST")]
    host: Option<String>,

    /// Port to listen on
    #[arg(short, long, env = "PORT")]
    port: Option<u16>,

    /// Path to the TOML configuration file
    #[arg(short, long, env = "TRACKER_CONFIG_PATH")]
    config: Option<String>,

    /// Apply database migrations before serving
    #[arg(long)]
    migrate: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut config = match &args.config {
        Some(path) => {
            let _ = dotenvy::dotenv();
            ServerConfig::figment(path).extract()
        }
        None => ServerConfig::from_env(),
    }
    .map_err(|e| {
        error!("Failed to load configuration: {e}");
        e
    })?;

    if let Some(host) = args.host {
        config.host = host;
    }
    if let Some(port) = args.port {
        config.port = port;
    }
    if args.migrate {
        config.database.run_migrations = true;
    }

    if let Err(e) = config.validate() {
        error!("Configuration validation failed: {e}");
        return Err(format!("Invalid configuration: {e}").into());
    }

    if config.metrics.enabled {
        let metrics_addr = config.metrics.addr()?;
        metrics_exporter_prometheus::PrometheusBuilder::new()
            .with_http_listener(metrics_addr)
            .install()?;
        info!("Metrics server started on {metrics_addr}");
    }

    let state = ServerState::connect(&config.database).await?;
    if config.database.run_migrations {
        state.migrate().await?;
    }

    let identity = IdentityHeader::default();
    let api = Arc::new(ApiService::new(state));

    let addr = config.addr()?;
    let socket = TcpListener::bind(addr).await?;
    let mut mux = Multiplexer::new(socket, config.mux.clone());
    let rpc_listener = mux.listener(Protocol::Rpc);
    let http_listener = mux.listener(Protocol::Http);

    let (reporter, health_service) = health_reporter();
    reporter.set_serving::<ApiServer<ApiService>>().await;

    let router = Gateway::new(Arc::clone(&api), identity.clone()).router(&config.docs);

    let mut rpc = tokio::spawn(serve_rpc(
        rpc_listener,
        api,
        identity,
        config.request_timeout(),
        health_service,
    ));
    let mut http = tokio::spawn(serve_http(http_listener, router));

    info!(%addr, "Server starting");

    tokio::select! {
        served = mux.serve(shutdown_signal(reporter)) => served?,
        stopped = &mut rpc => {
            stopped??;
            return Err("rpc stack stopped unexpectedly".into());
        }
        stopped = &mut http => {
            stopped??;
            return Err("http stack stopped unexpectedly".into());
        }
    }

    // The multiplexer is gone, so both sub-listeners report closed.
    rpc.await??;
    http.await??;

    info!("Server shutdown complete");
    Ok(())
}

async fn shutdown_signal(health_reporter: HealthReporter) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received Ctrl+C signal");
        },
        () = terminate => {
            info!("Received terminate signal");
        },
    }

    health_reporter
        .set_not_serving::<ApiServer<ApiService>>()
        .await;

    info!("Initiating graceful shutdown");
}
