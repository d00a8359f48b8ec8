use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::filter::LevelFilter;

use radvpn_router::config::{Config, StaticRoute};
use radvpn_router::routes::kernel::InterfaceWait;
use radvpn_router::{Gateway, IpCommand, Kernel, Router};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::load()?;

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::from_level(config.log_level).into())
                .from_env_lossy(),
        )
        .init();

    let hostname = hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "unknown".to_string());
    tracing::info!("radvpn-routed starting on {} (interface {})", hostname, config.interface);

    let kernel: Arc<dyn Kernel> = Arc::new(IpCommand::new(config.kernel_timeout));
    wait_for_interface(kernel.clone(), &config.interface).await;

    let cancel = CancellationToken::new();
    let router = Arc::new(Router::new(cancel.clone(), kernel, config.interface.clone()));

    let installer = router.clone();
    let routes = config.routes.clone();
    tokio::task::spawn_blocking(move || {
        install_routes(installer.as_ref(), &routes);
        if let Err(e) = installer.table().dump_stdout() {
            tracing::warn!("Failed to dump routing table: {}", e);
        }
    })
    .await?;

    let reconciler = config
        .reconcile_interval
        .map(|period| spawn_reconciler(router.clone(), cancel.clone(), period));

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down...");

    if config.flush_on_exit {
        let router = router.clone();
        if let Err(e) = tokio::task::spawn_blocking(move || router.shutdown()).await? {
            tracing::error!("Failed to remove routes: {}", e);
        }
    } else {
        cancel.cancel();
    }

    if let Some(handle) = reconciler {
        handle.await?;
    }

    tracing::info!("Stopped");
    Ok(())
}

/// Give the tunnel a moment to come up. Routes added while it is missing
/// stay pending until a reconcile pass finds it.
async fn wait_for_interface(kernel: Arc<dyn Kernel>, name: &str) {
    match InterfaceWait::default().resolve(kernel, name).await {
        Ok(iface) => tracing::info!("Using interface {} (index {})", iface.name, iface.index),
        Err(e) => tracing::warn!("Interface {} not available ({}), routes will stay pending", name, e),
    }
}

fn install_routes(gateway: &dyn Gateway, routes: &[StaticRoute]) {
    for route in routes {
        match gateway.table().add(route.network, route.next_hop) {
            Ok(()) => tracing::info!("Installed route {} via {}", route.network, route.next_hop),
            Err(e) if e.is_retryable() => {
                tracing::warn!("Route {} via {} pending: {}", route.network, route.next_hop, e)
            }
            Err(e) => tracing::error!("Failed to add route {} via {}: {}", route.network, route.next_hop, e),
        }
    }
}

fn spawn_reconciler(
    router: Arc<Router>,
    cancel: CancellationToken,
    period: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let router = router.clone();
                    match tokio::task::spawn_blocking(move || router.table().reconcile()).await {
                        Ok(report) if report.outstanding > 0 => {
                            tracing::debug!("{} route(s) still out of sync", report.outstanding)
                        }
                        Ok(_) => {}
                        Err(e) => tracing::error!("Reconcile task failed: {}", e),
                    }
                }
            }
        }
    })
}
