//! Peer registry — tracks the LAN nodes we can ask for packages.
//!
//! A concurrent map from peer HTTP address to the last time we heard from
//! it, written by the discovery loops and read by search. Expiry is swept
//! on read: `list()` drops entries older than the TTL as it scans, so no
//! timer runs per peer and a stale entry is never handed to a caller.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::time::Instant;

/// Shared between the discovery loops and search.
///
/// Cheap to clone; every clone sees the same map.
#[derive(Debug, Clone)]
pub struct PeerRegistry {
    peers: Arc<DashMap<SocketAddr, Instant>>,
    ttl: Duration,
}

impl PeerRegistry {
    /// Create a new empty registry whose entries live for `ttl` after their
    /// last refresh.
    pub fn new(ttl: Duration) -> Self {
        Self {
            peers: Arc::new(DashMap::new()),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Record that `peer` is alive now. Refreshes an existing entry.
    pub fn add(&self, peer: SocketAddr) {
        let previous = self.peers.insert(peer, Instant::now());
        if previous.is_none() {
            tracing::info!(peer = %peer, count = self.peers.len(), "registered peer");
        } else {
            tracing::trace!(peer = %peer, "refreshed peer");
        }
    }

    /// Every peer heard from within the TTL. Expired entries are removed.
    ///
    /// Order is unspecified.
    pub fn list(&self) -> Vec<SocketAddr> {
        let now = Instant::now();
        let mut live = Vec::with_capacity(self.peers.len());
        self.peers.retain(|peer, seen| {
            let fresh = now.saturating_duration_since(*seen) < self.ttl;
            if fresh {
                live.push(*peer);
            } else {
                tracing::debug!(peer = %peer, "peer expired");
            }
            fresh
        });
        live
    }

    /// Entries currently held, including expired ones not yet swept.
    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}
