//! Peer discovery over multicast UDP.
//!
//! Two loops feed the peer registry:
//! - `register_self` broadcasts an Announce every ttl/4 and answers
//!   broadcasts from others with a direct reply.
//! - `listen` receives those direct replies.
//!
//! Both run under `supervise` and stop when the discovery token is
//! cancelled, either by `close` or by the daemon's shutdown token.

use std::net::Ipv4Addr;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use paclan_core::Settings;
use paclan_services::PeerRegistry;

use crate::supervisor::supervise;

pub mod addr;
pub mod broadcast;
pub mod listener;

/// The discovery engine. Cheap to clone; clones share one stop token.
#[derive(Debug, Clone)]
pub struct Discovery {
    registry: PeerRegistry,
    interface: String,
    http_port: u16,
    group: Ipv4Addr,
    group_port: u16,
    interval: Duration,
    cancel: CancellationToken,
}

impl Discovery {
    /// The engine stops when `shutdown` is cancelled or `close` is called.
    pub fn new(settings: &Settings, registry: PeerRegistry, shutdown: &CancellationToken) -> Self {
        Self {
            registry,
            interface: settings.interface.clone(),
            http_port: settings.http_port,
            group: settings.multicast_addr,
            group_port: settings.multicast_port,
            interval: settings.broadcast_interval(),
            cancel: shutdown.child_token(),
        }
    }

    /// Start both loops, each restarted on failure until the engine stops.
    pub fn spawn(&self) -> (JoinHandle<()>, JoinHandle<()>) {
        let registration = {
            let this = self.clone();
            tokio::spawn(supervise("registration", self.cancel.clone(), move || {
                let this = this.clone();
                async move { this.register_self().await }
            }))
        };
        let listener = {
            let this = self.clone();
            tokio::spawn(supervise("listener", self.cancel.clone(), move || {
                let this = this.clone();
                async move { this.listen().await }
            }))
        };
        (registration, listener)
    }

    /// Stop both loops. Safe to call more than once.
    pub fn close(&self) {
        if !self.cancel.is_cancelled() {
            tracing::info!("discovery closing");
            self.cancel.cancel();
        }
    }
}
