//! End-to-end tests for node assembly.
//!
//! These tests verify:
//! - The embedded node orders and commits submitted transfers
//! - A remote node and a sequencer converge over TCP
//! - Configuration errors stop the node before anything starts

use axum::{body::Body, http::Request, http::StatusCode, Router};
use serde_json::Value;
use std::path::Path;
use std::time::Duration;
use tessera_consensus::{BridgeError, Identity, Peer};
use tessera_node::{EmbeddedNode, NodeConfig, NodeError, RemoteNode, Sequencer};
use tessera_state::Transfer;
use tessera_types::Address;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tower::ServiceExt;

const ALICE: &str = "0x00000000000000000000000000000000000000aa";
const BOB: &str = "0x00000000000000000000000000000000000000bb";

async fn json_body(response: axum::response::Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap()
}

/// Writes a key and a genesis funding Alice, and returns a fast-block config.
fn test_config(dir: &Path) -> NodeConfig {
    Identity::generate()
        .write_key_file(dir.join("priv_key"))
        .unwrap();
    let genesis = dir.join("genesis.json");
    std::fs::write(
        &genesis,
        format!(r#"{{"alloc": {{"{ALICE}": {{"balance": 100}}}}}}"#),
    )
    .unwrap();

    let mut config = NodeConfig::default();
    config.data_dir = dir.to_path_buf();
    config.state.genesis_file = Some(genesis);
    config.solo.block_interval_ms = 10;
    config
}

fn transfer_body(value: u64, nonce: u64) -> Vec<u8> {
    let from: Address = ALICE.parse().unwrap();
    let to: Address = BOB.parse().unwrap();
    Transfer {
        from,
        to,
        value,
        nonce,
    }
    .to_transaction()
    .payload()
    .to_vec()
}

async fn submit(router: &Router, body: Vec<u8>) {
    let request = Request::builder()
        .method("POST")
        .uri("/tx")
        .body(Body::from(body))
        .unwrap();
    let response = router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

async fn get_json(router: &Router, uri: &str) -> Value {
    let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
    json_body(router.clone().oneshot(request).await.unwrap()).await
}

async fn wait_for_balance(router: &Router, address: &str, balance: u64) {
    for _ in 0..300 {
        let body = get_json(router, &format!("/account/{address}")).await;
        if body["balance"] == balance {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("{address} never reached balance {balance}");
}

#[tokio::test]
async fn test_embedded_node_commits_transfers() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path());

    let node = EmbeddedNode::start(&config).unwrap();
    let router = node.router();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let (stop, stopped) = oneshot::channel::<()>();
    let running = tokio::spawn(node.run(listener, async move {
        let _ = stopped.await;
    }));

    for nonce in 0..3 {
        submit(&router, transfer_body(10, nonce)).await;
    }
    wait_for_balance(&router, BOB, 30).await;
    wait_for_balance(&router, ALICE, 70).await;

    let info = get_json(&router, "/info").await;
    assert_eq!(info["engine"]["type"], "solo");
    assert!(info["height"].as_u64().unwrap() >= 1);

    stop.send(()).unwrap();
    tokio::time::timeout(Duration::from_secs(5), running)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn test_remote_node_and_sequencer_converge() {
    let seq_dir = tempfile::tempdir().unwrap();
    let mut seq_config = test_config(seq_dir.path());
    seq_config.sequencer.listen_addr = "127.0.0.1:0".into();
    let sequencer = Sequencer::start(&seq_config).await.unwrap();
    let engine_addr = sequencer.local_addr().to_string();
    assert_eq!(sequencer.info()["type"], "solo");

    let app_dir = tempfile::tempdir().unwrap();
    let mut app_config = test_config(app_dir.path());
    app_config.remote.engine_addr = engine_addr.clone();
    app_config.remote.reconnect_max_attempts = Some(50);
    app_config.remote.reconnect_initial_delay_ms = 10;
    let node = RemoteNode::new(&app_config).unwrap();
    let router = node.router();

    let (stop_seq, seq_stopped) = oneshot::channel::<()>();
    let seq_task = tokio::spawn(sequencer.run(async move {
        let _ = seq_stopped.await;
    }));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let (stop_node, node_stopped) = oneshot::channel::<()>();
    let node_task = tokio::spawn(node.run(listener, async move {
        let _ = node_stopped.await;
    }));

    submit(&router, transfer_body(30, 0)).await;
    wait_for_balance(&router, BOB, 30).await;

    let info = get_json(&router, "/info").await;
    assert_eq!(info["engine"]["type"], "remote");
    assert_eq!(info["engine"]["engine_addr"], engine_addr);

    // Stop the application first so the sequencer has nothing in flight.
    stop_node.send(()).unwrap();
    tokio::time::timeout(Duration::from_secs(5), node_task)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    stop_seq.send(()).unwrap();
    tokio::time::timeout(Duration::from_secs(5), seq_task)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn test_missing_key_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = NodeConfig::default();
    config.data_dir = dir.path().to_path_buf();

    let err = EmbeddedNode::start(&config).err().unwrap();
    assert!(matches!(err, NodeError::Bridge(BridgeError::Config(_))));
}

#[tokio::test]
async fn test_node_outside_peer_set_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path());

    let stranger = Identity::generate();
    let peers = vec![Peer {
        net_addr: "127.0.0.1:1337".into(),
        pub_key_hex: stranger.public_key_hex(),
        moniker: "stranger".into(),
    }];
    std::fs::write(
        dir.path().join("peers.json"),
        serde_json::to_string(&peers).unwrap(),
    )
    .unwrap();

    let err = EmbeddedNode::start(&config).err().unwrap();
    assert!(err.to_string().contains("not in the peer set"));
}

#[tokio::test]
async fn test_invalid_genesis_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(dir.path());
    let genesis = dir.path().join("bad.json");
    std::fs::write(&genesis, "{ not json").unwrap();
    config.state.genesis_file = Some(genesis);

    let err = RemoteNode::new(&config).err().unwrap();
    assert!(matches!(err, NodeError::State(_)));
}

#[tokio::test]
async fn test_invalid_config_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(dir.path());
    config.solo.max_txs_per_block = 0;

    let err = EmbeddedNode::start(&config).err().unwrap();
    assert!(matches!(err, NodeError::Config(_)));
}
