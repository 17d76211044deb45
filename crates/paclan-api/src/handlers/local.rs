//! Requests from this machine: find a peer with the package and redirect.

use std::time::Duration;

use axum::extract::Request;
use axum::http::{header, Method, StatusCode};
use axum::response::{IntoResponse, Response};

use super::ApiState;

/// How long a local client waits for any peer to answer.
pub const SEARCH_TIMEOUT: Duration = Duration::from_secs(10);

pub async fn handle_local(state: &ApiState, request: Request) -> Response {
    let path_and_query = request
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/")
        .to_string();
    let is_head = request.method() == Method::HEAD;
    drop(request);
    tracing::info!(path = path_and_query, "local request");

    let found = tokio::time::timeout(
        SEARCH_TIMEOUT,
        state.search.search(&state.shutdown, &path_and_query),
    )
    .await
    .ok()
    .flatten();

    let Some(url) = found else {
        tracing::info!(path = path_and_query, "not found on any peer");
        return StatusCode::NOT_FOUND.into_response();
    };

    tracing::info!(path = path_and_query, url, "found on peer");
    if is_head {
        StatusCode::OK.into_response()
    } else {
        (StatusCode::FOUND, [(header::LOCATION, url)]).into_response()
    }
}
