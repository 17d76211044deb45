//! paclan-services — peer registry, distributed search, and the local cache.

pub mod cache;
pub mod peer;
pub mod search;

pub use cache::PackageCache;
pub use peer::PeerRegistry;
pub use search::{HttpProbe, Probe, Search};
