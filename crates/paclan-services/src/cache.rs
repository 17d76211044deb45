//! Local package cache lookup.
//!
//! Peers ask for packages by path, but only the final segment is ever
//! looked at: the cache is a flat directory of package files.

use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct PackageCache {
    root: PathBuf,
}

impl PackageCache {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Map a request path to a cached file, if one exists.
    pub async fn resolve(&self, request_path: &str) -> Option<PathBuf> {
        let name = file_name(request_path)?;
        let path = self.root.join(name);
        match tokio::fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => Some(path),
            Ok(_) => None,
            Err(e) => {
                tracing::debug!(file = name, error = %e, "not in cache");
                None
            }
        }
    }

    /// Check the cache directory is readable. Called once at startup.
    pub fn check(&self) -> std::io::Result<()> {
        std::fs::read_dir(&self.root).map(|_| ())
    }
}

/// The final path segment, rejecting anything that could step outside the cache.
fn file_name(request_path: &str) -> Option<&str> {
    let name = request_path.rsplit('/').next()?;
    match name {
        "" | "." | ".." => None,
        n if n.contains('\\') || n.contains('\0') => None,
        n => Some(n),
    }
}
