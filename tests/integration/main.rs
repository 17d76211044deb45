//! paclan integration test harness.
//!
//! Every node runs in-process on 127.0.0.1 with its own port and cache dir.
//! A node is either "local" (sees loopback clients and redirects them) or a
//! "peer" (pretends every client is on the LAN and serves its cache).
//!
//!   cargo test --test integration

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::extract::connect_info::MockConnectInfo;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use paclan_api::ApiState;
use paclan_services::{HttpProbe, PackageCache, PeerRegistry, Search};

mod sharing;
mod shutdown;

// ── Harness ───────────────────────────────────────────────────────────────────

pub const ARCH: &str = "x86_64";

static COUNTER: AtomicU64 = AtomicU64::new(0);

/// Fresh, empty cache dir unique to this test.
pub fn cache_dir() -> PathBuf {
    let id = COUNTER.fetch_add(1, Ordering::Relaxed);
    let dir =
        std::env::temp_dir().join(format!("paclan-it-{}-{}", std::process::id(), id));
    let _ = std::fs::remove_dir_all(&dir);
    std::fs::create_dir_all(&dir).expect("create cache dir");
    dir
}

/// Put a package into a cache dir.
pub fn put(dir: &Path, name: &str, contents: &[u8]) {
    std::fs::write(dir.join(name), contents).expect("write package");
}

pub fn node_state(registry: PeerRegistry, cache_dir: &Path, arch: &str) -> Result<ApiState> {
    Ok(ApiState {
        search: Arc::new(Search::new(registry, HttpProbe::new(arch)?, arch)),
        cache: PackageCache::new(cache_dir),
        arch: arch.to_string(),
        shutdown: CancellationToken::new(),
    })
}

/// Start a node that loopback clients reach as their local cache.
pub async fn spawn_local(state: ApiState) -> Result<SocketAddr> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let shutdown = state.shutdown.clone();
    tokio::spawn(paclan_api::serve(listener, state, shutdown));
    Ok(addr)
}

/// Start a node that treats every client as a LAN peer.
pub async fn spawn_peer(state: ApiState) -> Result<SocketAddr> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let lan_client: SocketAddr = "192.168.1.50:40000".parse()?;
    let app = paclan_api::router(state).layer(MockConnectInfo(lan_client));
    tokio::spawn(async move { axum::serve(listener, app).await });
    Ok(addr)
}

/// Start a peer with an arch and a set of cached packages.
pub async fn peer_with(arch: &str, packages: &[(&str, &[u8])]) -> Result<(SocketAddr, PathBuf)> {
    let dir = cache_dir();
    for (name, contents) in packages {
        put(&dir, name, contents);
    }
    let state = node_state(PeerRegistry::new(Duration::from_secs(3600)), &dir, arch)?;
    let addr = spawn_peer(state).await.context("spawn peer")?;
    Ok((addr, dir))
}

/// pacman-like client: never follows redirects, never uses a proxy.
pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .no_proxy()
        .timeout(Duration::from_secs(15))
        .build()
        .expect("build client")
}

pub fn cleanup(dirs: &[&Path]) {
    for dir in dirs {
        let _ = std::fs::remove_dir_all(dir);
    }
}
