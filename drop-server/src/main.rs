// codedrop rendezvous server: maps short-lived share codes to sharer addresses.

mod config;
mod rendezvous;

use std::net::SocketAddr;
use std::sync::Arc;

use drop_core::Registry;
use log::{error, info};
use tokio::net::TcpListener;
use tokio::sync::RwLock;

const VERSION: &str = env!("CARGO_PKG_VERSION");

fn main() -> Result<(), Box<dyn std::error::Error>> {
    for arg in std::env::args().skip(1) {
        if arg == "--version" || arg == "-V" {
            println!("drop-server {}", VERSION);
            return Ok(());
        }
    }

    drop_core::logging::init("info");
    let cfg = config::load();
    let registry: rendezvous::SharedRegistry = Arc::new(RwLock::new(Registry::new(cfg.peer_ttl())));
    let bind = SocketAddr::from(([0, 0, 0, 0], cfg.port));

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async {
        let listener = match TcpListener::bind(bind).await {
            Ok(l) => l,
            Err(e) => {
                error!("cannot bind {}: {}", bind, e);
                return Err(e.into());
            }
        };
        info!(
            "server started on {} (ttl {:?}, sweep every {:?})",
            listener.local_addr()?,
            cfg.peer_ttl(),
            cfg.sweep_interval()
        );
        tokio::spawn(rendezvous::sweep_loop(registry.clone(), cfg.sweep_interval()));
        tokio::select! {
            r = rendezvous::run_rendezvous(listener, registry) => r?,
            r = shutdown_signal() => r?,
        }
        info!("shutting down");
        Ok::<(), Box<dyn std::error::Error>>(())
    })?;
    Ok(())
}

/// Wait for Ctrl+C or SIGTERM (Unix).
async fn shutdown_signal() -> Result<(), Box<dyn std::error::Error>> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate())
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
    }
    Ok(())
}
