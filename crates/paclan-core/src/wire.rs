//! paclan wire format — the discovery datagram exchanged between nodes.
//!
//! Every datagram is a single JSON object:
//!
//! ```text
//! {"port": "15678", "tag": "9f2c41d07e55a1b3", "reg": false}
//! ```
//!
//! `port` is the sender's HTTP port as a decimal string. `tag` is an opaque
//! nonce regenerated for every broadcast tick. `reg` distinguishes a
//! multicast discovery broadcast (`false` or absent) from a direct unicast
//! reply (`true`). Receivers never trust `port` until it has been through
//! [`Announce::validated_port`].

use rand::RngCore;
use serde::{Deserialize, Serialize};

// ── Constants ─────────────────────────────────────────────────────────────────

/// Default HTTP port. The passive UDP listener binds the same number.
pub const DEFAULT_HTTP_PORT: u16 = 15678;

/// Default multicast group for discovery broadcasts.
pub const DEFAULT_MULTICAST_ADDR: &str = "224.3.45.67";

/// Default UDP port of the multicast group.
pub const DEFAULT_MULTICAST_PORT: u16 = 15679;

/// Default peer TTL in seconds.
/// Peers not heard from within this window disappear from the peer list.
pub const DEFAULT_PEER_TTL_SECS: u64 = 60 * 60;

/// Request header carrying the requester's architecture between peers.
pub const ARCH_HEADER: &str = "X-Arch-Req";

/// Receive buffer size for discovery datagrams. Announces are tiny.
pub const MAX_DATAGRAM: usize = 2048;

/// Length of the random tag in bytes, before hex encoding.
const TAG_BYTES: usize = 8;

// ── Announce ──────────────────────────────────────────────────────────────────

/// A discovery datagram advertising a node's HTTP port.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Announce {
    pub port: String,
    #[serde(default)]
    pub tag: String,
    #[serde(rename = "reg", default)]
    pub register: bool,
}

impl Announce {
    /// A periodic multicast broadcast carrying a fresh tag.
    pub fn discovery(port: u16) -> Self {
        Self {
            port: port.to_string(),
            tag: fresh_tag(),
            register: false,
        }
    }

    /// A direct reply naming this node's port.
    pub fn reply(port: u16) -> Self {
        Self {
            port: port.to_string(),
            tag: String::new(),
            register: true,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, WireError> {
        serde_json::to_vec(self).map_err(|e| WireError::Malformed(e.to_string()))
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, WireError> {
        if bytes.is_empty() {
            return Err(WireError::Empty);
        }
        serde_json::from_slice(bytes).map_err(|e| WireError::Malformed(e.to_string()))
    }

    /// The advertised port, if it is a usable TCP/UDP port (1–65535).
    pub fn validated_port(&self) -> Result<u16, WireError> {
        match self.port.trim().parse::<u16>() {
            Ok(0) | Err(_) => Err(WireError::InvalidPort(self.port.clone())),
            Ok(p) => Ok(p),
        }
    }

    /// True for a multicast discovery broadcast, false for a direct reply.
    pub fn is_discovery(&self) -> bool {
        !self.register
    }
}

fn fresh_tag() -> String {
    let mut bytes = [0u8; TAG_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

// ── Errors ────────────────────────────────────────────────────────────────────

/// Errors that can arise when interpreting a discovery datagram.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WireError {
    #[error("empty datagram")]
    Empty,

    #[error("malformed announce: {0}")]
    Malformed(String),

    #[error("invalid port {0:?}")]
    InvalidPort(String),
}

// ── Tests ─────────────────────────────────────────────────────────────────────
