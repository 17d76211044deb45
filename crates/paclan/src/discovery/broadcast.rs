//! Discovery broadcast.
//!
//! Periodically sends an Announce to the multicast group so nearby nodes
//! learn our HTTP port, and answers every broadcast we hear with a direct
//! reply so the broadcaster learns about us without waiting for our next
//! tick.

use std::net::{IpAddr, Ipv4Addr, SocketAddr, SocketAddrV4};

use anyhow::{Context, Result};
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tokio::time::{self, MissedTickBehavior};

use paclan_core::wire::MAX_DATAGRAM;
use paclan_core::Announce;
use paclan_services::PeerRegistry;

use super::{addr, Discovery};

impl Discovery {
    /// Broadcast on the multicast group and register everyone who answers.
    ///
    /// Returns `Ok(())` once the discovery token is cancelled. Socket errors
    /// are returned for the supervisor to retry.
    pub async fn register_self(&self) -> Result<()> {
        let local_ip = addr::local_ipv4(&self.interface)?;
        let socket = make_multicast_socket(self.group, self.group_port, local_ip)
            .context("failed to create multicast socket")?;
        let socket = UdpSocket::from_std(socket).context("failed to convert to tokio UdpSocket")?;

        let dest = SocketAddrV4::new(self.group, self.group_port);
        let mut interval = time::interval(self.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut buf = vec![0u8; MAX_DATAGRAM];

        tracing::info!(
            local = %local_ip,
            group = %dest,
            interval_secs = self.interval.as_secs(),
            "discovery started"
        );

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return Ok(()),

                _ = interval.tick() => {
                    let payload = Announce::discovery(self.http_port).encode()?;
                    let n = socket
                        .send_to(&payload, dest)
                        .await
                        .context("multicast send failed")?;
                    tracing::trace!(bytes = n, "broadcast sent");
                }

                result = socket.recv_from(&mut buf) => {
                    let (len, from) = result.context("multicast receive failed")?;
                    let Some((to, reply)) =
                        discovered(&self.registry, local_ip, self.http_port, from, &buf[..len])
                    else {
                        continue;
                    };
                    match reply.encode() {
                        Ok(bytes) => {
                            if let Err(e) = socket.send_to(&bytes, to).await {
                                tracing::warn!(peer = %to, error = %e, "reply send failed");
                            }
                        }
                        Err(e) => tracing::warn!(error = %e, "failed to encode reply"),
                    }
                }
            }
        }
    }
}

/// Handle one datagram heard on the multicast group.
///
/// Registers the sender and, for a plain broadcast, returns the direct reply
/// to send and where to send it: the sender's advertised port, which its
/// passive listener is bound to.
pub fn discovered(
    registry: &PeerRegistry,
    local_ip: Ipv4Addr,
    own_port: u16,
    from: SocketAddr,
    payload: &[u8],
) -> Option<(SocketAddr, Announce)> {
    if from.ip() == IpAddr::V4(local_ip) {
        tracing::trace!("ignoring own broadcast");
        return None;
    }
    let msg = match Announce::decode(payload) {
        Ok(m) => m,
        Err(e) => {
            tracing::warn!(from = %from, error = %e, "bad discovery datagram");
            return None;
        }
    };
    let port = match msg.validated_port() {
        Ok(p) => p,
        Err(e) => {
            tracing::warn!(from = %from, error = %e, "invalid port");
            return None;
        }
    };

    let peer = SocketAddr::new(from.ip(), port);
    registry.add(peer);

    if !msg.is_discovery() {
        return None;
    }
    Some((peer, Announce::reply(own_port)))
}

/// Create a UDP socket joined to the discovery multicast group.
fn make_multicast_socket(
    group: Ipv4Addr,
    port: u16,
    local_ip: Ipv4Addr,
) -> Result<std::net::UdpSocket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP)).context("socket()")?;

    socket.set_reuse_address(true).context("SO_REUSEADDR")?;
    socket.set_nonblocking(true).context("set_nonblocking")?;

    let bind_addr = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port);
    socket.bind(&bind_addr.into()).context("bind()")?;

    socket
        .join_multicast_v4(&group, &local_ip)
        .context("IP_ADD_MEMBERSHIP")?;
    socket
        .set_multicast_if_v4(&local_ip)
        .context("IP_MULTICAST_IF")?;
    // TTL 1: stay on the local network segment
    socket.set_multicast_ttl_v4(1).context("IP_MULTICAST_TTL")?;

    Ok(socket.into())
}
