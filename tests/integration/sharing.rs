//! A local pacman fetches a package that only a LAN peer has.

use std::time::Duration;

use reqwest::StatusCode;

use paclan_services::PeerRegistry;

use crate::*;

const PKG_PATH: &str = "/core/os/x86_64/foo-1.0-1-x86_64.pkg.tar.zst";
const PKG_NAME: &str = "foo-1.0-1-x86_64.pkg.tar.zst";

#[tokio::test]
async fn redirects_to_peer_then_peer_serves() {
    let body: &[u8] = b"package bytes";
    let (peer, peer_dir) = peer_with(ARCH, &[(PKG_NAME, body)]).await.unwrap();

    let registry = PeerRegistry::new(Duration::from_secs(3600));
    registry.add(peer);
    let local_dir = cache_dir();
    let local = spawn_local(node_state(registry, &local_dir, ARCH).unwrap())
        .await
        .unwrap();

    // pacman probes first
    let resp = client()
        .head(format!("http://{local}{PKG_PATH}"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    // then downloads: redirected to the peer
    let resp = client()
        .get(format!("http://{local}{PKG_PATH}"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::FOUND);
    let location = resp.headers()["location"].to_str().unwrap().to_string();
    assert_eq!(location, format!("http://{peer}{PKG_PATH}"));

    // and the peer serves the file from its cache
    let resp = client()
        .get(&location)
        .header("X-Arch-Req", ARCH)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.bytes().await.unwrap().as_ref(), body);

    cleanup(&[&peer_dir, &local_dir]);
}

#[tokio::test]
async fn skips_peers_without_the_package_or_with_other_arch() {
    let body: &[u8] = b"the real one";
    let (empty, empty_dir) = peer_with(ARCH, &[]).await.unwrap();
    let (arm, arm_dir) = peer_with("aarch64", &[(PKG_NAME, &b"wrong arch"[..])]).await.unwrap();
    let (holder, holder_dir) = peer_with(ARCH, &[(PKG_NAME, body)]).await.unwrap();

    let registry = PeerRegistry::new(Duration::from_secs(3600));
    registry.add(empty);
    registry.add(arm);
    registry.add(holder);
    let local_dir = cache_dir();
    let local = spawn_local(node_state(registry, &local_dir, ARCH).unwrap())
        .await
        .unwrap();

    let resp = client()
        .get(format!("http://{local}{PKG_PATH}"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::FOUND);
    assert_eq!(
        resp.headers()["location"].to_str().unwrap(),
        format!("http://{holder}{PKG_PATH}")
    );

    cleanup(&[&empty_dir, &arm_dir, &holder_dir, &local_dir]);
}

#[tokio::test]
async fn nobody_has_it() {
    let (peer, peer_dir) = peer_with(ARCH, &[("bar-2.0-1-x86_64.pkg.tar.zst", &b"bar"[..])])
        .await
        .unwrap();

    let registry = PeerRegistry::new(Duration::from_secs(3600));
    registry.add(peer);
    let local_dir = cache_dir();
    let local = spawn_local(node_state(registry, &local_dir, ARCH).unwrap())
        .await
        .unwrap();

    for resp in [
        client().head(format!("http://{local}{PKG_PATH}")).send().await.unwrap(),
        client().get(format!("http://{local}{PKG_PATH}")).send().await.unwrap(),
    ] {
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    cleanup(&[&peer_dir, &local_dir]);
}

#[tokio::test]
async fn peer_never_serves_sync_databases_outside_its_cache() {
    let (peer, peer_dir) = peer_with(ARCH, &[(PKG_NAME, &b"pkg"[..])]).await.unwrap();

    let resp = client()
        .get(format!("http://{peer}/core/os/x86_64/core.db"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);

    let resp = client()
        .get(format!("http://{peer}/../../etc/passwd"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);

    cleanup(&[&peer_dir]);
}
