//! IDM server
//!
//! Serves the identity module over HTTP: authorization checks, identity and
//! group queries, interactive login and third-party caveat discharge.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use identity::{
    Config, IdentityServer, LogFormat, LoggingConfig, MemIdentityStore, MemMeetingStore,
    ProviderRegistry, Stores,
};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[derive(Parser)]
#[command(name = "idm-server")]
#[command(about = "Identity manager and macaroon discharge authority", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "IDM_CONFIG")]
    config: Option<PathBuf>,

    /// Listen address, overriding `listen-address` from the configuration
    #[arg(short, long)]
    listen: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref()).context("invalid configuration")?;
    init_logging(&config.logging);

    let listen = cli.listen.unwrap_or_else(|| config.listen_address.clone());
    let shutdown = CancellationToken::new();
    let stores = Stores {
        identities: Arc::new(MemIdentityStore::new()),
        meetings: Arc::new(MemMeetingStore::new()),
    };
    let registry = ProviderRegistry::new().with("static", static_idp_plugin::factory);
    let server = IdentityServer::build(&config, stores, &registry, shutdown.clone()).await?;
    let sweeper = server.spawn_sweeper(shutdown.clone());

    let listener = TcpListener::bind(&listen)
        .await
        .with_context(|| format!("cannot bind {listen}"))?;
    info!(address = %listener.local_addr()?, location = %config.location, "idm server listening");

    let signal = shutdown.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        signal.cancel();
    });

    axum::serve(listener, server.router())
        .with_graceful_shutdown(shutdown.clone().cancelled_owned())
        .await
        .context("http server failed")?;

    shutdown.cancel();
    sweeper.await.context("rendezvous sweeper panicked")?;
    info!("idm server stopped");
    Ok(())
}

fn init_logging(cfg: &LoggingConfig) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cfg.level));

    match cfg.format {
        LogFormat::Json => tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
        LogFormat::Text => tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .init(),
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "cannot listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!(error = %e, "cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("received Ctrl+C, shutting down"),
        () = terminate => info!("received terminate signal, shutting down"),
    }
}
