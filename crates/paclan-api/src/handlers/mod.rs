//! Request routing — local clients search, remote peers get served.

pub mod local;
pub mod remote;

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use axum::extract::rejection::PathRejection;
use axum::extract::{ConnectInfo, Path, Request, State};
use axum::http::{Method, StatusCode};
use axum::response::{IntoResponse, Response};
use tokio_util::sync::CancellationToken;

use paclan_services::{PackageCache, Search};

#[derive(Clone)]
pub struct ApiState {
    pub search: Arc<Search>,
    pub cache: PackageCache,
    /// This node's architecture. Peers asking for another one get 404.
    pub arch: String,
    /// Fires on daemon shutdown; aborts searches still in flight.
    pub shutdown: CancellationToken,
}

pub async fn handle(
    State(state): State<ApiState>,
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
    path: Result<Path<String>, PathRejection>,
    request: Request,
) -> Response {
    if !is_served_method(request.method()) {
        return StatusCode::METHOD_NOT_ALLOWED.into_response();
    }
    if is_loopback(remote.ip()) {
        // forwarded to peers as received, never decoded here
        return local::handle_local(&state, request).await;
    }
    match path {
        Ok(Path(path)) => remote::handle_remote(&state, remote, &path, request).await,
        Err(e) => {
            tracing::debug!(peer = %remote, error = %e, "undecodable path");
            StatusCode::NOT_FOUND.into_response()
        }
    }
}

/// Paths with nothing to look up, such as `/`.
pub async fn handle_unmatched(method: Method) -> StatusCode {
    if is_served_method(&method) {
        StatusCode::NOT_FOUND
    } else {
        StatusCode::METHOD_NOT_ALLOWED
    }
}

fn is_served_method(method: &Method) -> bool {
    method == Method::GET || method == Method::HEAD
}

/// Loopback, including IPv4 loopback seen through a dual-stack socket.
fn is_loopback(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => v4.is_loopback(),
        IpAddr::V6(v6) => {
            v6.is_loopback() || v6.to_ipv4_mapped().is_some_and(|v4| v4.is_loopback())
        }
    }
}
