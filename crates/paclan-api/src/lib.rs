//! paclan-api — the HTTP face of a node.
//!
//! pacman on this machine talks to us over loopback and gets redirected to a
//! peer that has the package. Peers talk to us over the LAN and get served
//! straight from the package cache.

mod conn;
pub mod handlers;

use std::sync::Arc;
use std::time::Duration;

use axum::http::StatusCode;
use axum::routing::any;
use axum::Router;
use tokio::net::TcpListener;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tower_http::timeout::TimeoutLayer;

pub use handlers::ApiState;

/// Request headers must arrive within this long.
pub const HEADER_READ_TIMEOUT: Duration = Duration::from_secs(2);

/// Bound on reading a request body, counted from the last frame.
pub const READ_TIMEOUT: Duration = Duration::from_secs(5);

/// Whole-request budget, standing in for the write timeout.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(20);

/// Keep-alive connections with nothing in flight are closed after this.
pub const IDLE_TIMEOUT: Duration = Duration::from_secs(120);

/// How long in-flight requests get to finish once shutdown starts.
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

/// Pause after a failed accept, so fd exhaustion does not spin the loop.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/{*path}", any(handlers::handle))
        .fallback(handlers::handle_unmatched)
        .with_state(state)
}

/// Serve until `shutdown` fires, then drain in-flight requests.
///
/// Each connection is served by hyper directly so header, body and idle
/// timeouts apply per connection. The caller bounds the drain with
/// [`SHUTDOWN_GRACE`].
pub async fn serve(
    listener: TcpListener,
    state: ApiState,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let app = router(state).layer(TimeoutLayer::with_status_code(
        StatusCode::REQUEST_TIMEOUT,
        REQUEST_TIMEOUT,
    ));
    tracing::info!(addr = %listener.local_addr()?, "HTTP listening");

    let builder = Arc::new(conn::builder());
    let mut connections = JoinSet::new();

    loop {
        let (stream, remote) = tokio::select! {
            _ = shutdown.cancelled() => break,

            accepted = listener.accept() => match accepted {
                Ok(pair) => pair,
                Err(e) => {
                    tracing::warn!(error = %e, "accept failed");
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                    continue;
                }
            },
        };
        connections.spawn(conn::serve_connection(
            builder.clone(),
            app.clone(),
            stream,
            remote,
            shutdown.clone(),
        ));
        while connections.try_join_next().is_some() {}
    }

    drop(listener);
    tracing::debug!(open = connections.len(), "draining connections");
    while connections.join_next().await.is_some() {}
    tracing::info!("HTTP server stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;

    use paclan_services::PeerRegistry;

    use crate::handlers::tests::{state, temp_dir};

    async fn spawn_served() -> (std::net::SocketAddr, CancellationToken, std::path::PathBuf) {
        let dir = temp_dir();
        let state = state(PeerRegistry::new(Duration::from_secs(60)), &dir, "x86_64");
        let shutdown = state.shutdown.clone();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(serve(listener, state, shutdown.clone()));
        (addr, shutdown, dir)
    }

    async fn read_all(stream: &mut TcpStream) -> String {
        let mut buf = Vec::new();
        let _ = tokio::time::timeout(Duration::from_secs(5), stream.read_to_end(&mut buf))
            .await
            .expect("connection should be closed by the server");
        String::from_utf8_lossy(&buf).into_owned()
    }

    #[tokio::test]
    async fn prompt_request_is_answered() {
        let (addr, shutdown, dir) = spawn_served().await;

        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream
            .write_all(b"GET / HTTP/1.1\r\nHost: x\r\nConnection: close\r\n\r\n")
            .await
            .unwrap();
        let reply = read_all(&mut stream).await;
        assert!(reply.starts_with("HTTP/1.1 404"), "got {reply:?}");

        shutdown.cancel();
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn stalled_headers_close_the_connection() {
        let (addr, shutdown, dir) = spawn_served().await;

        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream.write_all(b"GET / HTTP/1.1\r\n").await.unwrap();
        tokio::time::sleep(HEADER_READ_TIMEOUT + Duration::from_secs(1)).await;
        // the server may already have reset the connection
        let _ = stream
            .write_all(b"Host: x\r\nConnection: close\r\n\r\n")
            .await;

        let reply = read_all(&mut stream).await;
        assert!(!reply.starts_with("HTTP/1.1 404"), "got {reply:?}");

        shutdown.cancel();
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn shutdown_stops_accepting() {
        let (addr, shutdown, dir) = spawn_served().await;
        shutdown.cancel();
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert!(TcpStream::connect(addr).await.is_err());
        let _ = std::fs::remove_dir_all(&dir);
    }
}
