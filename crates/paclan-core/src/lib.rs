//! paclan-core — configuration and wire format.
//! All other paclan crates depend on this one.

pub mod config;
pub mod wire;

pub use config::{ConfigError, PaclanConfig, Settings};
pub use wire::{Announce, WireError, ARCH_HEADER};
