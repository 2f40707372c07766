//! Node assembly.
//!
//! Three processes can be built from one [`NodeConfig`]:
//!
//! - **embedded**: state, API and the solo ordering service in one process
//! - **remote**: state and API; blocks come from a sequencer over TCP
//! - **sequencer**: the solo ordering service alone, serving a remote node
//!
//! State and genesis are always built before any ordering service starts, and
//! every configuration error surfaces before a task is spawned.

use crate::api::{self, AppState, EngineInfo};
use crate::config::NodeConfig;
use crate::error::{NodeError, Result};
use crate::metered::MeteredProxy;
use axum::Router;
use std::collections::BTreeMap;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tessera_consensus::{
    CommitProxy, EmbeddedBridge, Identity, InmemProxy, OrderingService, PeerSet, RemoteBridge,
    SocketProxy, SoloEngine,
};
use tessera_state::{Genesis, SharedState, StateExecutor};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

/// Builds the state executor from the configured genesis.
pub fn build_state(config: &NodeConfig) -> Result<SharedState> {
    let genesis = match &config.state.genesis_file {
        Some(path) => Genesis::from_file(path)?,
        None => Genesis::empty(),
    };

    let mut executor = StateExecutor::with_history_limit(config.state.history_limit);
    let state_hash = executor.bootstrap(&genesis)?;
    tracing::info!(
        accounts = genesis.alloc.len(),
        supply = genesis.total_supply()?,
        %state_hash,
        "genesis applied"
    );
    Ok(SharedState::new(executor))
}

/// Loads the node key and the peer set.
///
/// Without a peers file the node runs as the only member of its own set.
pub fn load_identity(config: &NodeConfig) -> Result<(Identity, PeerSet)> {
    let identity = Identity::from_key_file(config.key_file())?;
    let peers_file = config.peers_file();
    let peers = if peers_file.exists() {
        PeerSet::from_file(&peers_file)?
    } else {
        tracing::warn!(
            path = %peers_file.display(),
            "no peers file, running as a single-member set"
        );
        PeerSet::solo(&identity, config.sequencer.listen_addr.clone())
    };
    Ok((identity, peers))
}

/// Serves the API on its own task, stopping when the returned sender fires or drops.
fn spawn_api(
    listener: TcpListener,
    app: AppState,
) -> (oneshot::Sender<()>, JoinHandle<std::io::Result<()>>) {
    let (stop, stopped) = oneshot::channel::<()>();
    let handle = tokio::spawn(api::serve(listener, app, async move {
        let _ = stopped.await;
    }));
    (stop, handle)
}

async fn join_api(
    stop: oneshot::Sender<()>,
    handle: JoinHandle<std::io::Result<()>>,
) -> Result<()> {
    let _ = stop.send(());
    handle.await.map_err(std::io::Error::other)??;
    Ok(())
}

/// State, API and solo ordering service in one process.
pub struct EmbeddedNode {
    app: AppState,
    bridge: EmbeddedBridge<SoloEngine>,
}

impl EmbeddedNode {
    /// Builds state, loads the identity and starts the ordering service.
    pub fn start(config: &NodeConfig) -> Result<Self> {
        config.validate()?;
        let state = build_state(config)?;
        let (identity, peers) = load_identity(config)?;

        let inmem = Arc::new(InmemProxy::new(state.clone()));
        let proxy: Arc<dyn CommitProxy> = Arc::new(MeteredProxy::new(inmem.clone()));
        let solo = config.solo_config();
        let bridge = EmbeddedBridge::start(identity, peers, proxy, move |id, peers, proxy| {
            SoloEngine::new(id, peers, proxy, solo)
        })?;

        let engine = bridge.engine().clone();
        let engine_info: EngineInfo = Arc::new(move || engine.info());
        let app = AppState::new(state, inmem.submitter(), engine_info);

        Ok(Self { app, bridge })
    }

    /// Returns the API router.
    pub fn router(&self) -> Router {
        api::create_router(self.app.clone())
    }

    /// Returns the handler state.
    pub fn app(&self) -> &AppState {
        &self.app
    }

    /// Serves the API until `shutdown` resolves or the ordering service stops.
    ///
    /// On shutdown the engine commits its pending transactions before returning.
    pub async fn run(self, listener: TcpListener, shutdown: impl Future<Output = ()>) -> Result<()> {
        let engine = self.bridge.engine().clone();
        let (stop_api, api_task) = spawn_api(listener, self.app);

        let mut wait = std::pin::pin!(self.bridge.wait());
        let result = tokio::select! {
            result = &mut wait => result,
            _ = shutdown => {
                tracing::info!("shutdown requested, stopping ordering service");
                engine.stop();
                wait.await
            }
        };

        join_api(stop_api, api_task).await?;
        result.map_err(NodeError::from)
    }
}

/// State and API fed by a sequencer in another process.
pub struct RemoteNode {
    app: AppState,
    bridge: RemoteBridge,
}

impl RemoteNode {
    /// Builds state and the bridge. Nothing connects until [`run`](Self::run).
    pub fn new(config: &NodeConfig) -> Result<Self> {
        config.validate()?;
        let state = build_state(config)?;

        let inmem = Arc::new(InmemProxy::new(state.clone()));
        let proxy: Arc<dyn CommitProxy> = Arc::new(MeteredProxy::new(inmem.clone()));
        let bridge = RemoteBridge::new(config.remote_bridge_config(), proxy);

        let engine_addr = config.remote.engine_addr.clone();
        let engine_info: EngineInfo = Arc::new(move || {
            BTreeMap::from([
                ("type".to_string(), "remote".to_string()),
                ("engine_addr".to_string(), engine_addr.clone()),
            ])
        });
        let app = AppState::new(state, inmem.submitter(), engine_info);

        Ok(Self { app, bridge })
    }

    /// Returns the API router.
    pub fn router(&self) -> Router {
        api::create_router(self.app.clone())
    }

    /// Returns the handler state.
    pub fn app(&self) -> &AppState {
        &self.app
    }

    /// Serves the API and runs the bridge until `shutdown` or a fatal bridge error.
    pub async fn run(self, listener: TcpListener, shutdown: impl Future<Output = ()>) -> Result<()> {
        let (stop_api, api_task) = spawn_api(listener, self.app);

        let result = tokio::select! {
            result = self.bridge.run() => result,
            _ = shutdown => {
                tracing::info!("shutdown requested, disconnecting from sequencer");
                Ok(())
            }
        };

        join_api(stop_api, api_task).await?;
        result.map_err(NodeError::from)
    }
}

/// Solo ordering service serving a [`RemoteNode`].
pub struct Sequencer {
    socket: Arc<SocketProxy>,
    bridge: EmbeddedBridge<SoloEngine>,
}

impl Sequencer {
    /// Binds the proxy listener and starts the ordering service.
    pub async fn start(config: &NodeConfig) -> Result<Self> {
        config.validate()?;
        let (identity, peers) = load_identity(config)?;

        let socket = Arc::new(
            SocketProxy::bind(&config.sequencer.listen_addr, config.socket_proxy_config()).await?,
        );
        let proxy: Arc<dyn CommitProxy> = Arc::new(MeteredProxy::new(socket.clone()));
        let solo = config.solo_config();
        let bridge = EmbeddedBridge::start(identity, peers, proxy, move |id, peers, proxy| {
            SoloEngine::new(id, peers, proxy, solo)
        })?;

        Ok(Self { socket, bridge })
    }

    /// Returns the address the application connects to.
    pub fn local_addr(&self) -> SocketAddr {
        self.socket.local_addr()
    }

    /// Returns the engine's diagnostic info.
    pub fn info(&self) -> BTreeMap<String, String> {
        self.bridge.info()
    }

    /// Runs until `shutdown` resolves or the ordering service stops.
    pub async fn run(self, shutdown: impl Future<Output = ()>) -> Result<()> {
        let engine = self.bridge.engine().clone();
        let mut wait = std::pin::pin!(self.bridge.wait());
        let result = tokio::select! {
            result = &mut wait => result,
            _ = shutdown => {
                tracing::info!("shutdown requested, stopping ordering service");
                engine.stop();
                wait.await
            }
        };
        result.map_err(NodeError::from)
    }
}
