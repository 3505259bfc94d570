use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tracing::info;
use tracing_subscriber::EnvFilter;

use roadstay::clock::SystemClock;
use roadstay::config::Config;
use roadstay::directory::InMemoryDirectory;
use roadstay::engine::{Collaborators, Engine};
use roadstay::notify::{self, NotifyHub};
use roadstay::store::ReservationStore;
use roadstay::wire::{self, ServerContext};
use roadstay::{maintenance, observability, tls};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::from_env()?;
    observability::init(config.metrics_port)?;
    let tls_acceptor = tls::load_tls_acceptor(config.tls.as_ref())?;

    std::fs::create_dir_all(&config.data_dir)?;
    let store = Arc::new(ReservationStore::open(config.wal_path())?);

    let directory = Arc::new(match &config.directory_file {
        Some(path) => InMemoryDirectory::from_file(path)?,
        None => InMemoryDirectory::new(),
    });

    let hub = Arc::new(NotifyHub::new());
    tokio::spawn(notify::run_mail_relay(hub.subscribe()));

    let engine = Arc::new(
        Engine::new(
            store.clone(),
            Collaborators {
                units: directory.clone(),
                identity: directory.clone(),
                notifier: hub.clone(),
                clock: Arc::new(SystemClock),
            },
        )
        .with_admins(config.admins.iter().cloned()),
    );

    tokio::spawn(maintenance::run_compactor(store.clone(), config.compact_threshold));
    if let Some(ttl) = config.pending_ttl {
        tokio::spawn(maintenance::run_pending_expiry(engine.clone(), ttl));
    }

    let ctx = Arc::new(ServerContext {
        engine,
        directory,
        password: config.password.clone(),
    });
    let max_connections = config.max_connections;
    let semaphore = Arc::new(Semaphore::new(max_connections));

    let addr = config.listen_addr();
    let listener = TcpListener::bind(addr).await?;
    info!("roadstay listening on {addr}");
    info!("  data_dir: {}", config.data_dir.display());
    info!("  reservations loaded: {}", store.reservation_count());
    info!("  max_connections: {max_connections}");
    info!("  tls: {}", if tls_acceptor.is_some() { "enabled" } else { "disabled" });
    info!(
        "  pending expiry: {}",
        config
            .pending_ttl
            .map_or("disabled".to_string(), |ttl| format!("{}h", ttl.num_hours()))
    );

    // Graceful shutdown: stop accepting on SIGTERM/ctrl-c, drain in-flight connections
    #[cfg(unix)]
    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
    let shutdown = async move {
        let ctrl_c = tokio::signal::ctrl_c();
        #[cfg(unix)]
        {
            tokio::select! {
                _ = ctrl_c => {}
                _ = sigterm.recv() => {}
            }
        }
        #[cfg(not(unix))]
        {
            ctrl_c.await.ok();
        }
    };
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            result = listener.accept() => {
                let (socket, peer) = match result {
                    Ok(conn) => conn,
                    Err(e) => {
                        tracing::error!("accept error: {e}");
                        continue;
                    }
                };

                let permit = match semaphore.clone().try_acquire_owned() {
                    Ok(permit) => permit,
                    Err(_) => {
                        tracing::warn!("connection limit reached, rejecting {peer}");
                        metrics::counter!(observability::CONNECTIONS_REJECTED_TOTAL).increment(1);
                        drop(socket);
                        continue;
                    }
                };

                info!("connection from {peer}");
                metrics::counter!(observability::CONNECTIONS_TOTAL).increment(1);
                metrics::gauge!(observability::CONNECTIONS_ACTIVE).increment(1.0);
                let ctx = ctx.clone();
                let tls = tls_acceptor.clone();

                tokio::spawn(async move {
                    let _permit = permit; // held until connection closes
                    if let Err(e) = wire::process_connection(socket, ctx, tls).await {
                        tracing::error!("connection error from {peer}: {e}");
                    }
                    metrics::gauge!(observability::CONNECTIONS_ACTIVE).decrement(1.0);
                });
            }
            _ = &mut shutdown => {
                info!("shutdown signal received, stopping accept loop");
                break;
            }
        }
    }

    // Wait for in-flight connections to finish (up to 10s)
    info!("draining connections...");
    let drain_deadline = tokio::time::sleep(std::time::Duration::from_secs(10));
    tokio::pin!(drain_deadline);

    loop {
        if semaphore.available_permits() == max_connections {
            info!("all connections drained");
            break;
        }
        tokio::select! {
            _ = &mut drain_deadline => {
                let remaining = max_connections - semaphore.available_permits();
                tracing::warn!("drain timeout, {remaining} connections still open");
                break;
            }
            _ = tokio::time::sleep(std::time::Duration::from_millis(100)) => {}
        }
    }

    info!("roadstay stopped");
    Ok(())
}
