//! Runs an ordering service inside the node process.

use crate::error::{BridgeError, Result};
use crate::peers::{Identity, PeerSet};
use crate::proxy::CommitProxy;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::task::JoinHandle;

/// An ordering service driving a [`CommitProxy`].
#[async_trait]
pub trait OrderingService: Send + Sync {
    /// Runs the service until it stops or fails.
    async fn run(&self) -> Result<()>;

    /// Returns diagnostic key/value pairs.
    fn info(&self) -> BTreeMap<String, String>;
}

/// Handle to an ordering service running on its own task.
pub struct EmbeddedBridge<E> {
    engine: Arc<E>,
    handle: JoinHandle<Result<()>>,
}

impl<E: OrderingService + 'static> EmbeddedBridge<E> {
    /// Checks the identity against the peer set, builds the engine and spawns it.
    ///
    /// Configuration errors are returned before anything is spawned.
    pub fn start<F>(
        identity: Identity,
        peers: PeerSet,
        proxy: Arc<dyn CommitProxy>,
        build: F,
    ) -> Result<Self>
    where
        F: FnOnce(Identity, PeerSet, Arc<dyn CommitProxy>) -> Result<E>,
    {
        let position = peers.position_of(&identity)?;
        tracing::info!(
            id = %identity.public_key_hex(),
            position,
            peers = peers.len(),
            "starting embedded ordering service"
        );

        let engine = Arc::new(build(identity, peers, proxy)?);
        let runner = engine.clone();
        let handle = tokio::spawn(async move {
            let result = runner.run().await;
            match &result {
                Ok(()) => tracing::info!("ordering service stopped"),
                Err(e) => tracing::error!(error = %e, "ordering service failed"),
            }
            result
        });

        Ok(Self { engine, handle })
    }

    /// Returns the running engine.
    pub fn engine(&self) -> &Arc<E> {
        &self.engine
    }

    /// Returns the engine's diagnostic info.
    pub fn info(&self) -> BTreeMap<String, String> {
        self.engine.info()
    }

    /// Returns true once the engine task has exited.
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Waits for the engine to stop and returns its result.
    pub async fn wait(self) -> Result<()> {
        self.handle
            .await
            .map_err(|e| BridgeError::Engine(format!("engine task failed: {e}")))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inmem::InmemProxy;
    use tessera_state::{Genesis, SharedState, StateExecutor};

    struct Idle;

    #[async_trait]
    impl OrderingService for Idle {
        async fn run(&self) -> Result<()> {
            Ok(())
        }

        fn info(&self) -> BTreeMap<String, String> {
            BTreeMap::from([("type".to_string(), "idle".to_string())])
        }
    }

    fn proxy() -> Arc<dyn CommitProxy> {
        let mut executor = StateExecutor::new();
        executor.bootstrap(&Genesis::empty()).unwrap();
        Arc::new(InmemProxy::new(SharedState::new(executor)))
    }

    #[tokio::test]
    async fn test_start_and_wait() {
        let identity = Identity::from_seed([7; 32]);
        let peers = PeerSet::solo(&identity, "127.0.0.1:0");
        let bridge = EmbeddedBridge::start(identity, peers, proxy(), |_, _, _| Ok(Idle)).unwrap();
        assert_eq!(bridge.info()["type"], "idle");
        bridge.wait().await.unwrap();
    }

    #[tokio::test]
    async fn test_identity_outside_peer_set_is_fatal() {
        let identity = Identity::from_seed([7; 32]);
        let peers = PeerSet::solo(&Identity::from_seed([8; 32]), "127.0.0.1:0");

        let mut built = false;
        let result = EmbeddedBridge::start(identity, peers, proxy(), |_, _, _| {
            built = true;
            Ok(Idle)
        });
        assert!(matches!(result, Err(BridgeError::Config(_))));
        assert!(!built);
    }

    #[tokio::test]
    async fn test_build_error_is_returned() {
        let identity = Identity::from_seed([7; 32]);
        let peers = PeerSet::solo(&identity, "127.0.0.1:0");
        let result = EmbeddedBridge::<Idle>::start(identity, peers, proxy(), |_, _, _| {
            Err(BridgeError::Config("bad engine settings".into()))
        });
        assert!(matches!(result, Err(BridgeError::Config(_))));
    }
}
