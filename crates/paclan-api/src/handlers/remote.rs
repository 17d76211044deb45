//! Requests from LAN peers: serve the package from our cache, or 404.

use std::net::SocketAddr;

use axum::body::Body;
use axum::extract::Request;
use axum::http::{Method, StatusCode};
use axum::response::{IntoResponse, Response};
use tower_http::services::ServeFile;

use paclan_core::ARCH_HEADER;

use super::ApiState;

pub async fn handle_remote(
    state: &ApiState,
    peer: SocketAddr,
    path: &str,
    request: Request,
) -> Response {
    tracing::debug!(peer = %peer, path, "remote request");

    let wanted_arch = request
        .headers()
        .get(ARCH_HEADER)
        .map(|v| String::from_utf8_lossy(v.as_bytes()).into_owned());
    if let Some(arch) = wanted_arch.filter(|a| !a.is_empty()) {
        if arch != state.arch {
            tracing::info!(peer = %peer, path, arch, "arch mismatch");
            return StatusCode::NOT_FOUND.into_response();
        }
    }

    let Some(file) = state.cache.resolve(path).await else {
        tracing::info!(peer = %peer, path, "package not cached");
        return StatusCode::NOT_FOUND.into_response();
    };

    tracing::info!(peer = %peer, file = %file.display(), "package found");
    if request.method() == Method::HEAD {
        return StatusCode::OK.into_response();
    }

    match ServeFile::new(&file).try_call(request).await {
        Ok(resp) => resp.map(Body::new).into_response(),
        Err(e) => {
            tracing::warn!(file = %file.display(), error = %e, "failed to serve package");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
