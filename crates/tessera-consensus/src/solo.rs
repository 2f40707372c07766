//! Single-replica ordering service.
//!
//! Orders transactions in arrival order and cuts a block on a timer or when
//! the block is full. There is no agreement protocol: the only participant is
//! the local node, so every proposed block is final.

use crate::embedded::OrderingService;
use crate::error::{BridgeError, Result};
use crate::peers::{Identity, PeerSet};
use crate::proxy::CommitProxy;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tessera_types::{Block, StateHash, Transaction};
use tokio_util::sync::CancellationToken;

/// Configuration for the solo engine.
#[derive(Debug, Clone)]
pub struct SoloConfig {
    /// Time between block cuts.
    pub block_interval: Duration,

    /// Maximum transactions per block.
    pub max_txs_per_block: usize,
}

impl Default for SoloConfig {
    fn default() -> Self {
        Self {
            block_interval: Duration::from_millis(500),
            max_txs_per_block: 1000,
        }
    }
}

#[derive(Debug, Default)]
struct SoloStats {
    last_block_index: u64,
    last_state_hash: Option<StateHash>,
    pending_txs: usize,
    committed_txs: u64,
}

/// The solo ordering service.
pub struct SoloEngine {
    identity: Identity,
    peers: PeerSet,
    proxy: Arc<dyn CommitProxy>,
    config: SoloConfig,
    stats: RwLock<SoloStats>,
    shutdown: CancellationToken,
}

impl SoloEngine {
    /// Creates a new engine.
    pub fn new(
        identity: Identity,
        peers: PeerSet,
        proxy: Arc<dyn CommitProxy>,
        config: SoloConfig,
    ) -> Result<Self> {
        if config.max_txs_per_block == 0 {
            return Err(BridgeError::Config("max_txs_per_block must be positive".into()));
        }
        if config.block_interval.is_zero() {
            return Err(BridgeError::Config("block_interval must be positive".into()));
        }
        Ok(Self {
            identity,
            peers,
            proxy,
            config,
            stats: RwLock::new(SoloStats::default()),
            shutdown: CancellationToken::new(),
        })
    }

    /// Asks the engine to stop after the block in progress, if any.
    ///
    /// Pending transactions are committed before `run` returns.
    pub fn stop(&self) {
        self.shutdown.cancel();
    }

    async fn cut_block(&self, index: u64, pending: &mut Vec<Transaction>) -> Result<()> {
        let transactions = std::mem::take(pending);
        let tx_count = transactions.len();
        let block = Block::new(index, transactions);
        let block_hash = block.hash;

        tracing::debug!(index, tx_count, %block_hash, "proposing block");

        let outcome = self.proxy.commit_block(block).await?;

        let mut stats = self.stats.write();
        stats.last_block_index = index;
        stats.last_state_hash = Some(outcome.state_hash);
        stats.pending_txs = 0;
        stats.committed_txs += tx_count as u64;
        Ok(())
    }
}

#[async_trait]
impl OrderingService for SoloEngine {
    async fn run(&self) -> Result<()> {
        let mut receiver = self.proxy.submission_channel()?;
        let mut next_index = self.proxy.height().await? + 1;
        self.stats.write().last_block_index = next_index - 1;

        let mut pending: Vec<Transaction> = Vec::new();
        let mut block_interval = tokio::time::interval(self.config.block_interval);
        block_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut producers_open = true;

        tracing::info!(next_index, "solo engine running");

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    if !pending.is_empty() {
                        self.cut_block(next_index, &mut pending).await?;
                    }
                    return Ok(());
                }

                maybe_tx = receiver.take(), if producers_open => {
                    match maybe_tx {
                        Some(tx) => {
                            pending.push(tx);
                            self.stats.write().pending_txs = pending.len();
                            if pending.len() >= self.config.max_txs_per_block {
                                self.cut_block(next_index, &mut pending).await?;
                                next_index += 1;
                            }
                        }
                        None => producers_open = false,
                    }
                }

                _ = block_interval.tick() => {
                    // Empty blocks are not proposed.
                    if !pending.is_empty() {
                        self.cut_block(next_index, &mut pending).await?;
                        next_index += 1;
                    } else if !producers_open {
                        return Ok(());
                    }
                }
            }
        }
    }

    fn info(&self) -> BTreeMap<String, String> {
        let stats = self.stats.read();
        BTreeMap::from([
            ("type".to_string(), "solo".to_string()),
            ("id".to_string(), self.identity.public_key_hex()),
            ("peers".to_string(), self.peers.len().to_string()),
            (
                "last_block_index".to_string(),
                stats.last_block_index.to_string(),
            ),
            (
                "last_state_hash".to_string(),
                stats
                    .last_state_hash
                    .map(|h| h.to_hex())
                    .unwrap_or_default(),
            ),
            ("pending_txs".to_string(), stats.pending_txs.to_string()),
            ("committed_txs".to_string(), stats.committed_txs.to_string()),
        ])
    }
}
