//! Configuration system for paclan.
//!
//! Resolution order: environment variables → config file → pacman.conf → defaults.
//!
//! Config file location:
//!   1. path given on the command line
//!   2. $PACLAN_CONFIG (explicit override)
//!   3. /etc/paclan.toml

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use crate::wire::{
    DEFAULT_HTTP_PORT, DEFAULT_MULTICAST_ADDR, DEFAULT_MULTICAST_PORT, DEFAULT_PEER_TTL_SECS,
};

/// Default paclan config file.
pub const DEFAULT_CONFIG_FILE: &str = "/etc/paclan.toml";

/// Default pacman config file, consulted for CacheDir and Architecture.
pub const DEFAULT_PACMAN_CONFIG: &str = "/etc/pacman.conf";

/// Default package cache. Only packages are shared, never sync databases.
pub const DEFAULT_CACHE_DIR: &str = "/var/cache/pacman/pkg/";

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PaclanConfig {
    pub http: HttpConfig,
    pub multicast: MulticastConfig,
    pub pacman: PacmanConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Network interface name. Empty = any.
    pub interface: String,
    /// TCP port for the HTTP server, and UDP port for direct discovery replies.
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MulticastConfig {
    pub address: Ipv4Addr,
    pub port: u16,
    /// Peers silent for this long are dropped. Broadcasts go out every ttl/4.
    pub ttl_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PacmanConfig {
    pub config_file: PathBuf,
    /// Overrides pacman.conf's CacheDir when set.
    pub cache_dir: Option<PathBuf>,
    /// "auto" = pacman.conf's Architecture, falling back to `uname -m`.
    pub architecture: String,
    /// Ask peers for our own architecture's path even when the local mirror
    /// URL names another one.
    pub rewrite_arch: bool,
}

// ── Defaults ──────────────────────────────────────────────────────────────────

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            interface: String::new(),
            port: DEFAULT_HTTP_PORT,
        }
    }
}

impl Default for MulticastConfig {
    fn default() -> Self {
        Self {
            address: DEFAULT_MULTICAST_ADDR
                .parse()
                .unwrap_or(Ipv4Addr::new(224, 3, 45, 67)),
            port: DEFAULT_MULTICAST_PORT,
            ttl_secs: DEFAULT_PEER_TTL_SECS,
        }
    }
}

impl Default for PacmanConfig {
    fn default() -> Self {
        Self {
            config_file: PathBuf::from(DEFAULT_PACMAN_CONFIG),
            cache_dir: None,
            architecture: "auto".to_string(),
            rewrite_arch: false,
        }
    }
}

// ── Resolved settings ─────────────────────────────────────────────────────────

/// Fully resolved configuration handed to the rest of the daemon.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    /// Empty = pick the first usable interface.
    pub interface: String,
    pub http_port: u16,
    pub cache_dir: PathBuf,
    pub arch: String,
    pub multicast_addr: Ipv4Addr,
    pub multicast_port: u16,
    pub peer_ttl: Duration,
    pub rewrite_arch: bool,
}

impl Settings {
    /// Peers are refreshed four times per TTL so they never expire remotely
    /// while this node is alive.
    pub fn broadcast_interval(&self) -> Duration {
        self.peer_ttl / 4
    }
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {0}: {1}")]
    ReadFailed(PathBuf, std::io::Error),
    #[error("failed to parse {0}: {1}")]
    ParseFailed(PathBuf, toml::de::Error),
    #[error("peer ttl must be non-zero")]
    ZeroTtl,
    #[error("failed to detect architecture: {0}")]
    ArchDetect(String),
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl PaclanConfig {
    /// Load config: env vars → file → defaults. A missing file is not an error.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let mut config = if path.exists() {
            let text = std::fs::read_to_string(path)
                .map_err(|e| ConfigError::ReadFailed(path.to_path_buf(), e))?;
            Self::parse(&text).map_err(|e| ConfigError::ParseFailed(path.to_path_buf(), e))?
        } else {
            PaclanConfig::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    pub fn parse(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    /// Config file path, unless one was given explicitly.
    pub fn file_path() -> PathBuf {
        std::env::var("PACLAN_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_FILE))
    }

    /// Apply PACLAN_* env var overrides. Unparseable values are ignored.
    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(v) = var("PACLAN_HTTP__INTERFACE") {
            self.http.interface = v;
        }
        if let Some(p) = var("PACLAN_HTTP__PORT").and_then(|v| v.parse().ok()) {
            self.http.port = p;
        }
        if let Some(a) = var("PACLAN_MULTICAST__ADDRESS").and_then(|v| v.parse().ok()) {
            self.multicast.address = a;
        }
        if let Some(p) = var("PACLAN_MULTICAST__PORT").and_then(|v| v.parse().ok()) {
            self.multicast.port = p;
        }
        if let Some(t) = var("PACLAN_MULTICAST__TTL_SECS").and_then(|v| v.parse().ok()) {
            self.multicast.ttl_secs = t;
        }
        if let Some(v) = var("PACLAN_PACMAN__CACHE_DIR") {
            self.pacman.cache_dir = Some(PathBuf::from(v));
        }
        if let Some(v) = var("PACLAN_PACMAN__ARCHITECTURE") {
            self.pacman.architecture = v;
        }
        if let Some(b) = var("PACLAN_PACMAN__REWRITE_ARCH").and_then(|v| v.parse().ok()) {
            self.pacman.rewrite_arch = b;
        }
    }

    /// Fill the gaps from pacman.conf and the running system.
    pub fn resolve(&self) -> Result<Settings, ConfigError> {
        if self.multicast.ttl_secs == 0 {
            return Err(ConfigError::ZeroTtl);
        }

        let pacman = PacmanOptions::load(&self.pacman.config_file)?;

        let cache_dir = self
            .pacman
            .cache_dir
            .clone()
            .or(pacman.cache_dir)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CACHE_DIR));

        let arch = match self.pacman.architecture.as_str() {
            "" | "auto" => match pacman.architecture.as_deref() {
                Some(a) if a != "auto" => a.to_string(),
                _ => detect_arch()?,
            },
            a => a.to_string(),
        };

        Ok(Settings {
            interface: self.http.interface.clone(),
            http_port: self.http.port,
            cache_dir,
            arch,
            multicast_addr: self.multicast.address,
            multicast_port: self.multicast.port,
            peer_ttl: Duration::from_secs(self.multicast.ttl_secs),
            rewrite_arch: self.pacman.rewrite_arch,
        })
    }
}

/// Machine architecture as pacman names it.
fn detect_arch() -> Result<String, ConfigError> {
    let out = Command::new("uname")
        .arg("-m")
        .output()
        .map_err(|e| ConfigError::ArchDetect(e.to_string()))?;
    if !out.status.success() {
        return Err(ConfigError::ArchDetect(format!("uname exited with {}", out.status)));
    }
    let arch = String::from_utf8_lossy(&out.stdout).trim().to_string();
    if arch.is_empty() {
        return Err(ConfigError::ArchDetect("uname printed nothing".to_string()));
    }
    Ok(arch)
}

// ── pacman.conf ───────────────────────────────────────────────────────────────

/// Upper bound on `Include` files followed from `[options]`.
const MAX_INCLUDES: usize = 16;

/// The two `[options]` keys paclan cares about.
#[derive(Debug, Default, PartialEq, Eq)]
struct PacmanOptions {
    cache_dir: Option<PathBuf>,
    architecture: Option<String>,
    /// `Include` targets seen inside `[options]`, in file order.
    includes: Vec<PathBuf>,
}

impl PacmanOptions {
    /// Read pacman.conf and the files it includes from `[options]`.
    ///
    /// A missing pacman.conf gives defaults. Unreadable includes are skipped,
    /// as are values an earlier file already set.
    fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => return Err(ConfigError::ReadFailed(path.to_path_buf(), e)),
        };
        let mut opts = Self::parse(&text);
        let mut pending: VecDeque<PathBuf> = std::mem::take(&mut opts.includes).into();
        let mut followed = 0;
        while let Some(include) = pending.pop_front() {
            followed += 1;
            if followed > MAX_INCLUDES {
                break;
            }
            let Ok(text) = std::fs::read_to_string(&include) else {
                continue;
            };
            // an included file continues the section it was included from
            let inner = Self::parse_section(&text, true);
            opts.cache_dir = opts.cache_dir.or(inner.cache_dir);
            opts.architecture = opts.architecture.or(inner.architecture);
            pending.extend(inner.includes);
        }
        Ok(opts)
    }

    fn parse(text: &str) -> Self {
        Self::parse_section(text, false)
    }

    fn parse_section(text: &str, mut in_options: bool) -> Self {
        let mut opts = Self::default();
        for line in text.lines() {
            let line = line.split('#').next().unwrap_or("").trim();
            if line.is_empty() {
                continue;
            }
            if let Some(section) = line.strip_prefix('[').and_then(|l| l.strip_suffix(']')) {
                in_options = section.trim() == "options";
                continue;
            }
            if !in_options {
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            let value = value.trim();
            match key.trim() {
                // pacman allows several; the first one is the primary cache
                "CacheDir" if opts.cache_dir.is_none() => {
                    opts.cache_dir = value.split_whitespace().next().map(PathBuf::from);
                }
                "Architecture" => {
                    opts.architecture = value.split_whitespace().next().map(str::to_string);
                }
                "Include" if !value.is_empty() => opts.includes.push(PathBuf::from(value)),
                _ => {}
            }
        }
        opts
    }
}
