//! Distributed search — ask every known peer for a package, first hit wins.
//!
//! One HEAD probe per peer runs concurrently under a shared cancellation
//! scope. The first probe to succeed claims the single result slot and
//! cancels the scope, aborting the others. The losers are drained on a
//! background task so the caller never waits on them.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use paclan_core::ARCH_HEADER;

use crate::peer::PeerRegistry;

/// Upper bound for a single probe, independent of the caller's deadline.
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(10);

// ── Probe ─────────────────────────────────────────────────────────────────────

/// Tests whether a peer has the resource at `url` without fetching it.
///
/// Implementations must return promptly once `cancel` fires. Any failure
/// means "not here".
pub trait Probe: Send + Sync + 'static {
    fn head(&self, url: String, cancel: CancellationToken) -> impl Future<Output = bool> + Send;
}

/// HEAD request over HTTP, tagged with the local architecture.
#[derive(Debug, Clone)]
pub struct HttpProbe {
    client: reqwest::Client,
    arch: String,
}

impl HttpProbe {
    pub fn new(arch: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .no_proxy()
            .timeout(PROBE_TIMEOUT)
            .build()
            .context("failed to build probe client")?;
        Ok(Self {
            client,
            arch: arch.into(),
        })
    }
}

impl Probe for HttpProbe {
    fn head(&self, url: String, cancel: CancellationToken) -> impl Future<Output = bool> + Send {
        async move {
            let request = self
                .client
                .head(&url)
                .header(ARCH_HEADER, self.arch.as_str())
                .send();
            tokio::select! {
                _ = cancel.cancelled() => false,
                result = request => match result {
                    Ok(resp) => resp.status() == reqwest::StatusCode::OK,
                    Err(e) => {
                        tracing::debug!(url, error = %e, "probe failed");
                        false
                    }
                },
            }
        }
    }
}

// ── Search ────────────────────────────────────────────────────────────────────

pub struct Search<P = HttpProbe> {
    registry: PeerRegistry,
    probe: Arc<P>,
    arch: String,
    rewrite_arch: bool,
}

impl<P: Probe> Search<P> {
    pub fn new(registry: PeerRegistry, probe: P, arch: impl Into<String>) -> Self {
        Self {
            registry,
            probe: Arc::new(probe),
            arch: arch.into(),
            rewrite_arch: false,
        }
    }

    /// Rewrite the architecture segment of probed paths to the local one,
    /// for mirrors laid out as `/<repo>/os/<arch>/<file>`.
    pub fn with_arch_rewrite(mut self, enabled: bool) -> Self {
        self.rewrite_arch = enabled;
        self
    }

    /// Find a peer holding `path_and_query`. Returns the peer's URL for it.
    ///
    /// Returns `None` when there are no peers, when every probe misses, or
    /// when `cancel` fires first. Dropping the returned future cancels all
    /// outstanding probes.
    pub async fn search(&self, cancel: &CancellationToken, path_and_query: &str) -> Option<String> {
        let peers = self.registry.list();
        if peers.is_empty() {
            tracing::debug!(path = path_and_query, "no peers to ask");
            return None;
        }

        let path = if self.rewrite_arch {
            rewrite_arch(path_and_query, &self.arch)
        } else {
            path_and_query.to_string()
        };
        tracing::info!(path, peers = peers.len(), "searching peers");

        let scope = cancel.child_token();
        let _abort = scope.clone().drop_guard();
        let (found_tx, mut found_rx) = mpsc::channel::<String>(1);
        let mut probes = JoinSet::new();

        for peer in peers {
            let url = format!("http://{peer}{path}");
            tracing::debug!(peer = %peer, url, "probing peer");
            let probe = self.probe.clone();
            let scope = scope.clone();
            let found = found_tx.clone();
            probes.spawn(async move {
                if probe.head(url.clone(), scope.clone()).await && found.try_send(url).is_ok() {
                    scope.cancel();
                }
            });
        }
        drop(found_tx);

        // losers unwind on the cancelled scope; reap them off the request path
        tokio::spawn(async move { while probes.join_next().await.is_some() {} });

        tokio::select! {
            found = found_rx.recv() => found,
            _ = cancel.cancelled() => None,
        }
    }
}

/// Replace the directory segment holding the file with `arch`.
/// Paths without such a segment are returned unchanged.
fn rewrite_arch(path_and_query: &str, arch: &str) -> String {
    let (path, query) = match path_and_query.split_once('?') {
        Some((p, q)) => (p, Some(q)),
        None => (path_and_query, None),
    };
    let mut segments: Vec<&str> = path.split('/').collect();
    // ["", "core", "os", "x86_64", "file"]: the arch is second to last
    if segments.len() >= 3 && !segments[segments.len() - 2].is_empty() {
        let at = segments.len() - 2;
        segments[at] = arch;
    }
    let mut out = segments.join("/");
    if let Some(q) = query {
        out.push('?');
        out.push_str(q);
    }
    out
}
