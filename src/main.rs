use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use clap::Parser;
use failure::Error;
use log::{info, warn};
use tokio::signal;

use crate::args::Args;
use crate::registry::UserRegistry;

mod args;
mod broadcaster;
mod command;
mod config;
mod error;
mod message;
mod metrics;
mod registry;
mod server;
mod session;
mod sink;

type Result<T> = std::result::Result<T, Error>;

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Could not listen for ctrl-c: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!("Could not listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Shutdown signal received. Stopping server...");
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init_from_env(
        env_logger::Env::default().filter_or(env_logger::DEFAULT_FILTER_ENV, "info"),
    );
    let args = Args::parse();

    let mut config = config::load(&args.config)?;
    if let Some(metrics_address) = &args.metrics_address {
        config.metrics_address = Some(metrics_address.clone());
    }
    let address = SocketAddr::new(config.bind_host.parse::<IpAddr>()?, args.listen_port());

    metrics::register();
    if let Some(metrics_address) = &config.metrics_address {
        tokio::spawn(metrics::serve(metrics_address.parse()?));
    }

    let listener = server::bind(address).await?;
    info!("Chat server listening on {}", address);

    let registry = Arc::new(UserRegistry::new());
    let mut connections =
        server::serve(listener, registry.clone(), Arc::new(config), shutdown_signal()).await;

    if !connections.is_empty() {
        info!(
            "Waiting for {} connection(s) ({} active users) to end, interrupt again to exit now",
            connections.len(),
            registry.active_count()
        );
        tokio::select! {
            _ = async { while connections.join_next().await.is_some() {} } => {},
            _ = signal::ctrl_c() => warn!("Exiting with sessions still open"),
        }
    }

    Ok(())
}
