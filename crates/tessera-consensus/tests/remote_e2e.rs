//! End-to-end tests for the remote topology over real TCP sockets.

use async_trait::async_trait;
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tessera_consensus::remote::wire::{codec, Message, MAX_FRAME_LEN};
use tessera_consensus::{
    BridgeError, CommitProxy, EmbeddedBridge, Identity, InmemProxy, OrderingService, PeerSet,
    ReconnectPolicy, RemoteBridge, RemoteBridgeConfig, Result, SocketProxy, SocketProxyConfig,
    SoloConfig, SoloEngine, SubmissionReceiver,
};
use tessera_state::{Genesis, SharedState, StateExecutor, Transfer};
use tessera_types::{Address, Block, CommitOutcome, StateHash, Transaction};
use tokio::net::TcpListener;
use tokio_util::codec::Framed;

fn addr(b: u8) -> Address {
    let mut bytes = [0u8; 20];
    bytes[19] = b;
    Address::from_bytes(bytes)
}

fn app_proxy() -> Arc<InmemProxy> {
    let mut executor = StateExecutor::new();
    executor
        .bootstrap(&Genesis::empty().with_account(addr(0xa), 100))
        .unwrap();
    Arc::new(InmemProxy::new(SharedState::new(executor)))
}

fn pay(value: u64, nonce: u64) -> Transaction {
    Transfer {
        from: addr(0xa),
        to: addr(0xb),
        value,
        nonce,
    }
    .to_transaction()
}

fn bridge_config(engine_addr: String) -> RemoteBridgeConfig {
    RemoteBridgeConfig {
        engine_addr,
        connect_timeout: Duration::from_millis(200),
        write_timeout: Duration::from_millis(200),
        reconnect: ReconnectPolicy::bounded(50, Duration::from_millis(10)),
    }
}

/// Delays every commit so a request is reliably outstanding.
struct SlowProxy {
    inner: Arc<InmemProxy>,
    delay: Duration,
}

#[async_trait]
impl CommitProxy for SlowProxy {
    fn submission_channel(&self) -> Result<SubmissionReceiver> {
        self.inner.submission_channel()
    }

    async fn commit_block(&self, block: Block) -> Result<CommitOutcome> {
        tokio::time::sleep(self.delay).await;
        self.inner.commit_block(block).await
    }

    async fn get_snapshot(&self, height: u64) -> Result<Bytes> {
        self.inner.get_snapshot(height).await
    }

    async fn restore(&self, snapshot: &[u8]) -> Result<StateHash> {
        self.inner.restore(snapshot).await
    }

    async fn height(&self) -> Result<u64> {
        self.inner.height().await
    }
}

/// Answers snapshot requests with more bytes than a frame can carry.
struct OversizedSnapshotProxy {
    inner: Arc<InmemProxy>,
}

#[async_trait]
impl CommitProxy for OversizedSnapshotProxy {
    fn submission_channel(&self) -> Result<SubmissionReceiver> {
        self.inner.submission_channel()
    }

    async fn commit_block(&self, block: Block) -> Result<CommitOutcome> {
        self.inner.commit_block(block).await
    }

    async fn get_snapshot(&self, _height: u64) -> Result<Bytes> {
        Ok(Bytes::from(vec![0u8; MAX_FRAME_LEN + 1024 * 1024]))
    }

    async fn restore(&self, snapshot: &[u8]) -> Result<StateHash> {
        self.inner.restore(snapshot).await
    }

    async fn height(&self) -> Result<u64> {
        self.inner.height().await
    }
}

/// Binds a socket proxy, starts a bridge for `app` and waits for the connection.
async fn connected_pair(
    app: Arc<dyn CommitProxy>,
) -> (Arc<SocketProxy>, tokio::task::JoinHandle<Result<()>>) {
    let socket = Arc::new(
        SocketProxy::bind("127.0.0.1:0", SocketProxyConfig::default())
            .await
            .unwrap(),
    );
    let bridge = RemoteBridge::new(bridge_config(socket.local_addr().to_string()), app);
    let bridge_task = tokio::spawn(async move { bridge.run().await });
    for _ in 0..200 {
        if socket.is_connected() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(socket.is_connected(), "bridge never connected");
    (socket, bridge_task)
}

#[tokio::test]
async fn test_remote_commit_flow() {
    // Ordering service process.
    let socket = Arc::new(
        SocketProxy::bind("127.0.0.1:0", SocketProxyConfig::default())
            .await
            .unwrap(),
    );
    let engine_addr = socket.local_addr().to_string();
    let identity = Identity::from_seed([9; 32]);
    let peers = PeerSet::solo(&identity, engine_addr.clone());
    let engine = EmbeddedBridge::start(identity, peers, socket.clone(), |id, peers, proxy| {
        SoloEngine::new(
            id,
            peers,
            proxy,
            SoloConfig {
                block_interval: Duration::from_millis(10),
                max_txs_per_block: 10,
            },
        )
    })
    .unwrap();

    // Application process.
    let app = app_proxy();
    let bridge = RemoteBridge::new(bridge_config(engine_addr), app.clone());
    let bridge_task = tokio::spawn(async move { bridge.run().await });

    let sender = app.submitter();
    for nonce in 0..3 {
        sender.submit(pay(10, nonce)).await.unwrap();
    }

    let mut committed = false;
    for _ in 0..200 {
        if app.state().read(|s| s.account(&addr(0xb)).balance) == 30 {
            committed = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(committed, "transfers were not committed through the bridge");

    // The engine's view of the chain matches the application's.
    let app_height = app.state().read(|s| s.height());
    for _ in 0..100 {
        if engine.info()["last_block_index"] == app_height.to_string() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(socket.height().await.unwrap(), app_height);
    assert_eq!(
        engine.info()["last_state_hash"],
        app.state().read(|s| s.state_hash().to_hex())
    );

    // Snapshots go through the same connection.
    let snapshot = socket.get_snapshot(app_height).await.unwrap();
    assert!(!snapshot.is_empty());
    assert!(matches!(
        socket.get_snapshot(app_height + 5).await,
        Err(BridgeError::Remote(_))
    ));

    engine.engine().stop();
    engine.wait().await.unwrap();
    bridge_task.abort();
}

#[tokio::test]
async fn test_disconnect_during_commit_is_fatal() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let engine_addr = listener.local_addr().unwrap().to_string();

    let app = Arc::new(SlowProxy {
        inner: app_proxy(),
        delay: Duration::from_millis(300),
    });
    let bridge = RemoteBridge::new(bridge_config(engine_addr), app);
    let bridge_task = tokio::spawn(async move { bridge.run().await });

    let (stream, _) = listener.accept().await.unwrap();
    let mut conn = Framed::new(stream, codec());
    let request = Message::CommitRequest {
        id: 1,
        block: Block::new(1, vec![pay(1, 0)]),
    };
    conn.send(request.encode()).await.unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    drop(conn);

    let result = tokio::time::timeout(Duration::from_secs(5), bridge_task)
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(result, Err(BridgeError::CommitInterrupted("commit"))));
}

#[tokio::test]
async fn test_idle_disconnect_reconnects() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let engine_addr = listener.local_addr().unwrap().to_string();

    let app = app_proxy();
    let bridge = RemoteBridge::new(bridge_config(engine_addr), app.clone());
    let bridge_task = tokio::spawn(async move { bridge.run().await });

    // First connection is dropped with nothing outstanding.
    let (first, _) = listener.accept().await.unwrap();
    drop(first);

    let (second, _) = listener.accept().await.unwrap();
    let mut conn = Framed::new(second, codec());

    let sender = app.submitter();
    let submit = tokio::spawn(async move { sender.submit(pay(5, 0)).await });

    let frame = tokio::time::timeout(Duration::from_secs(5), conn.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(Message::decode(&frame).unwrap(), Message::SubmitTx(pay(5, 0)));
    conn.send(Message::SubmitAck.encode()).await.unwrap();
    submit.await.unwrap().unwrap();
    assert!(!bridge_task.is_finished());

    // A commit on the new connection is answered normally.
    let request = Message::CommitRequest {
        id: 7,
        block: Block::new(1, vec![pay(5, 0)]),
    };
    conn.send(request.encode()).await.unwrap();
    let reply = Message::decode(&conn.next().await.unwrap().unwrap()).unwrap();
    let (id, result) = match reply {
        Message::CommitResponse { id, result } => (id, result),
        other => panic!("expected commit response, got {other:?}"),
    };
    assert_eq!(id, 7);
    assert_eq!(result.unwrap().height, 1);

    bridge_task.abort();
}

#[tokio::test]
async fn test_unreachable_engine_gives_up() {
    // Bind then drop to get a port nothing listens on.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let engine_addr = listener.local_addr().unwrap().to_string();
    drop(listener);

    let config = RemoteBridgeConfig {
        reconnect: ReconnectPolicy::bounded(2, Duration::from_millis(1)),
        ..bridge_config(engine_addr)
    };
    let bridge = RemoteBridge::new(config, app_proxy());
    assert!(matches!(bridge.run().await, Err(BridgeError::Transport(_))));
}

#[tokio::test]
async fn test_malformed_frame_is_fatal() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let engine_addr = listener.local_addr().unwrap().to_string();

    let bridge = RemoteBridge::new(bridge_config(engine_addr), app_proxy());
    let bridge_task = tokio::spawn(async move { bridge.run().await });

    let (stream, _) = listener.accept().await.unwrap();
    let mut conn = Framed::new(stream, codec());
    conn.send(Bytes::from_static(&[99, 0, 0])).await.unwrap();

    let result = tokio::time::timeout(Duration::from_secs(5), bridge_task)
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(result, Err(BridgeError::Protocol(_))));
}

#[tokio::test]
async fn test_ordering_service_info_is_object_safe() {
    let identity = Identity::from_seed([3; 32]);
    let peers = PeerSet::solo(&identity, "127.0.0.1:0");
    let engine = SoloEngine::new(identity, peers, app_proxy(), SoloConfig::default()).unwrap();
    let service: Arc<dyn OrderingService> = Arc::new(engine);
    assert_eq!(service.info()["type"], "solo");
    assert_eq!(service.info()["committed_txs"], "0");
}

#[tokio::test]
async fn test_remote_submit_waits_for_engine_to_take() {
    let app = app_proxy();
    let (socket, bridge_task) = connected_pair(app.clone()).await;
    // The ordering service holds the queue but does not take from it yet.
    let mut receiver = socket.submission_channel().unwrap();

    let sender = app.submitter();
    let first = tokio::spawn({
        let sender = sender.clone();
        async move { sender.submit(pay(1, 0)).await }
    });
    let second = tokio::spawn(async move { sender.submit(pay(1, 1)).await });

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(!first.is_finished());
    assert!(!second.is_finished());

    assert_eq!(receiver.take().await.unwrap(), pay(1, 0));
    tokio::time::timeout(Duration::from_secs(5), first)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!second.is_finished());

    assert_eq!(receiver.take().await.unwrap(), pay(1, 1));
    tokio::time::timeout(Duration::from_secs(5), second)
        .await
        .unwrap()
        .unwrap()
        .unwrap();

    bridge_task.abort();
}

#[tokio::test]
async fn test_restore_through_socket_moves_engine_height() {
    let source = app_proxy();
    source.commit_block(Block::new(1, vec![pay(10, 0)])).await.unwrap();
    source.commit_block(Block::new(2, vec![pay(10, 1)])).await.unwrap();
    let snapshot = source.get_snapshot(2).await.unwrap();

    let replica = app_proxy();
    let (socket, bridge_task) = connected_pair(replica.clone()).await;

    // The replica has already applied a block; the engine-driven restore is a catch-up.
    socket.commit_block(Block::new(1, vec![])).await.unwrap();
    let hash = socket.restore(&snapshot).await.unwrap();
    assert_eq!(hash, source.state().read(|s| s.state_hash()));
    assert_eq!(socket.height().await.unwrap(), 2);
    assert_eq!(replica.height().await.unwrap(), 2);

    let outcome = socket.commit_block(Block::new(3, vec![])).await.unwrap();
    assert_eq!(outcome.height, 3);
    assert_eq!(replica.state().read(|s| s.account(&addr(0xb)).balance), 20);

    // Outside a catch-up, the replica still refuses a local restore.
    assert!(matches!(
        replica.restore(&snapshot).await,
        Err(BridgeError::RestoreNotAllowed)
    ));

    bridge_task.abort();
}

#[tokio::test]
async fn test_oversized_snapshot_is_an_error_reply() {
    let app = Arc::new(OversizedSnapshotProxy { inner: app_proxy() });
    let (socket, bridge_task) = connected_pair(app).await;

    assert!(matches!(
        socket.get_snapshot(0).await,
        Err(BridgeError::Remote(msg)) if msg.contains("frame limit")
    ));

    // The connection survives and keeps serving requests.
    let outcome = socket.commit_block(Block::new(1, vec![])).await.unwrap();
    assert_eq!(outcome.height, 1);
    assert!(!bridge_task.is_finished());

    bridge_task.abort();
}
