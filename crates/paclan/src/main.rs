//! paclan — share the pacman package cache with machines on the LAN.

use std::net::{Ipv4Addr, SocketAddrV4};
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use paclan_api::{ApiState, SHUTDOWN_GRACE};
use paclan_core::PaclanConfig;
use paclan_services::{HttpProbe, PackageCache, PeerRegistry, Search};

mod discovery;
mod supervisor;

use discovery::{addr, Discovery};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "paclan=info,paclan_services=info,paclan_api=info".into()
            }),
        )
        .init();

    // Load config
    let config_path = std::env::args()
        .nth(1)
        .map(Into::into)
        .unwrap_or_else(PaclanConfig::file_path);
    let config = PaclanConfig::load(&config_path)?;
    let settings = config.resolve()?;
    tracing::info!(
        config = %config_path.display(),
        cache = %settings.cache_dir.display(),
        arch = %settings.arch,
        port = settings.http_port,
        "paclan starting"
    );

    // Nothing to share and nobody to share with are both fatal
    let cache = PackageCache::new(&settings.cache_dir);
    cache
        .check()
        .with_context(|| format!("cannot read cache dir {}", settings.cache_dir.display()))?;
    let local_ip = addr::local_ipv4(&settings.interface)?;
    tracing::info!(addr = %local_ip, "local address");

    // Shared state
    let shutdown = CancellationToken::new();
    let registry = PeerRegistry::new(settings.peer_ttl);
    let discovery = Discovery::new(&settings, registry.clone(), &shutdown);
    let search = Search::new(registry, HttpProbe::new(&settings.arch)?, &settings.arch)
        .with_arch_rewrite(settings.rewrite_arch);
    let state = ApiState {
        search: Arc::new(search),
        cache,
        arch: settings.arch.clone(),
        shutdown: shutdown.clone(),
    };

    // ── Spawn tasks ──────────────────────────────────────────────────────────

    let (registration_task, listener_task) = discovery.spawn();

    let listener = TcpListener::bind(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, settings.http_port))
        .await
        .with_context(|| format!("failed to bind HTTP port {}", settings.http_port))?;
    let mut http_task = tokio::spawn(paclan_api::serve(listener, state, shutdown.clone()));

    // ── Wait for shutdown ────────────────────────────────────────────────────

    let http_exited = tokio::select! {
        _ = shutdown_signal() => {
            tracing::info!("shutdown signal received");
            false
        }
        result = &mut http_task => {
            match result {
                Ok(Ok(())) => tracing::error!("HTTP server exited unexpectedly"),
                Ok(Err(e)) => tracing::error!(error = %e, "HTTP server failed"),
                Err(e) => tracing::error!(error = %e, "HTTP server task panicked"),
            }
            true
        }
    };

    discovery.close();
    shutdown.cancel();

    if !http_exited {
        match tokio::time::timeout(SHUTDOWN_GRACE, &mut http_task).await {
            Ok(Ok(Err(e))) => tracing::warn!(error = %e, "HTTP server failed during shutdown"),
            Ok(_) => {}
            Err(_) => {
                tracing::warn!(grace_secs = SHUTDOWN_GRACE.as_secs(), "forcing HTTP shutdown");
                http_task.abort();
            }
        }
    }

    let _ = registration_task.await;
    let _ = listener_task.await;

    tracing::info!("exiting");
    Ok(())
}

/// Ctrl-C, or SIGTERM from the service manager.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "cannot listen for SIGTERM");
                tokio::signal::ctrl_c().await.ok();
            }
        }
    }
    #[cfg(not(unix))]
    tokio::signal::ctrl_c().await.ok();
}
