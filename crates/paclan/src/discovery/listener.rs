//! Passive listener for direct discovery replies.
//!
//! Binds UDP on the HTTP port number and registers every node that
//! announces itself to us directly.

use std::net::{IpAddr, Ipv4Addr, SocketAddr, SocketAddrV4};

use anyhow::{Context, Result};
use tokio::net::UdpSocket;

use paclan_core::wire::MAX_DATAGRAM;
use paclan_core::Announce;
use paclan_services::PeerRegistry;

use super::{addr, Discovery};

impl Discovery {
    /// Receive announces until the discovery token is cancelled.
    ///
    /// The socket is dropped, and so closed, when this returns.
    pub async fn listen(&self) -> Result<()> {
        let local_ip = addr::local_ipv4(&self.interface)?;
        let bind_addr = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, self.http_port);
        let socket = UdpSocket::bind(bind_addr)
            .await
            .with_context(|| format!("failed to bind discovery listener on {bind_addr}"))?;

        tracing::info!(addr = %bind_addr, "discovery listener starting");
        let mut buf = vec![0u8; MAX_DATAGRAM];

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return Ok(()),

                result = socket.recv_from(&mut buf) => {
                    let (len, from) = result.context("recv_from failed")?;
                    announced(&self.registry, local_ip, from, &buf[..len]);
                }
            }
        }
    }
}

/// Handle one direct announce. Returns true if a peer was registered.
pub fn announced(
    registry: &PeerRegistry,
    local_ip: Ipv4Addr,
    from: SocketAddr,
    payload: &[u8],
) -> bool {
    if payload.is_empty() {
        return false;
    }
    if from.ip() == IpAddr::V4(local_ip) {
        tracing::trace!("ignoring own announce");
        return false;
    }
    let msg = match Announce::decode(payload) {
        Ok(m) => m,
        Err(e) => {
            tracing::warn!(from = %from, error = %e, "bad announce");
            return false;
        }
    };
    tracing::debug!(from = %from, port = msg.port, reg = msg.register, "received announce");
    match msg.validated_port() {
        Ok(port) => {
            registry.add(SocketAddr::new(from.ip(), port));
            true
        }
        Err(e) => {
            tracing::warn!(from = %from, error = %e, "invalid port");
            false
        }
    }
}
