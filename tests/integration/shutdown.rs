//! Cancelling the shutdown token stops the server.

use std::time::Duration;

use reqwest::StatusCode;

use paclan_services::PeerRegistry;

use crate::*;

#[tokio::test]
async fn serve_returns_after_shutdown() {
    let dir = cache_dir();
    let state = node_state(PeerRegistry::new(Duration::from_secs(3600)), &dir, ARCH).unwrap();
    let shutdown = state.shutdown.clone();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = tokio::spawn(paclan_api::serve(listener, state, shutdown.clone()));

    let resp = client().get(format!("http://{addr}/")).send().await.unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);

    shutdown.cancel();
    let result = tokio::time::timeout(Duration::from_secs(5), server)
        .await
        .expect("server should stop")
        .unwrap();
    assert!(result.is_ok());

    cleanup(&[&dir]);
}

#[tokio::test]
async fn search_in_flight_is_abandoned_on_shutdown() {
    // a peer that accepts connections but never answers
    let silent = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let silent_addr = silent.local_addr().unwrap();

    let registry = PeerRegistry::new(Duration::from_secs(3600));
    registry.add(silent_addr);
    let dir = cache_dir();
    let state = node_state(registry, &dir, ARCH).unwrap();
    let shutdown = state.shutdown.clone();
    let local = spawn_local(state).await.unwrap();

    let request = tokio::spawn(async move {
        client()
            .get(format!("http://{local}/core/os/x86_64/foo.pkg.tar.zst"))
            .send()
            .await
    });
    tokio::time::sleep(Duration::from_millis(200)).await;
    shutdown.cancel();

    let resp = tokio::time::timeout(Duration::from_secs(5), request)
        .await
        .expect("request should finish well before the probe timeout")
        .unwrap()
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);

    drop(silent);
    cleanup(&[&dir]);
}
