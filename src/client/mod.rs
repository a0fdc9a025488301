//! The SPV node actor: dispatcher loop, heartbeat timer and the
//! wallet-facing request handle.
//!
//! [`SpvNode::run`] consumes requests from a bounded channel one at a time;
//! the session record is owned by the loop and never shared. The heartbeat
//! is a separate task posting [`NodeRequest::Heartbeat`] on the same
//! channel, so stall checks serialize with everything else.

mod config;

pub use config::ClientConfig;

use std::time::Duration;

use bitcoin::p2p::message_bloom::FilterLoad;
use bitcoin::{BlockHash, Transaction};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::chain::HeaderStore;
use crate::error::{Result, SpvError};
use crate::network::{FilteredBlock, PeerManager, PeerMessage};
use crate::sync::{NodeRequest, SpvSession};
use crate::types::PeerId;
use crate::wallet::WalletSink;

/// Posting side of the request channel.
///
/// Cloneable; used by the wallet for filter updates, broadcasts and
/// rescans, and by the peer manager to deliver lifecycle events and decoded
/// messages.
#[derive(Debug, Clone)]
pub struct SpvNodeHandle {
    requests: mpsc::Sender<NodeRequest>,
}

impl SpvNodeHandle {
    async fn post(&self, request: NodeRequest) -> Result<()> {
        self.requests
            .send(request)
            .await
            .map_err(|_| SpvError::ChannelClosed)
    }

    /// Install a new bloom filter and push it to every peer.
    pub async fn update_bloom_filter(&self, filter: FilterLoad) -> Result<()> {
        self.post(NodeRequest::UpdateBloomFilter(filter)).await
    }

    /// Broadcast a wallet transaction.
    pub async fn publish_transaction(&self, tx: Transaction) -> Result<()> {
        self.post(NodeRequest::PublishTransaction(tx)).await
    }

    /// Rewind and re-download merkle blocks from `ts`.
    pub async fn rescan(&self, ts: u32) -> Result<()> {
        self.post(NodeRequest::Rescan(ts)).await
    }

    /// Trigger a stall check outside the regular cadence.
    pub async fn heartbeat(&self) -> Result<()> {
        self.post(NodeRequest::Heartbeat).await
    }

    /// Report a completed peer handshake.
    pub async fn peer_handshake(&self, peer: PeerId) -> Result<()> {
        self.post(NodeRequest::PeerHandshake(peer)).await
    }

    /// Report a peer disconnect.
    pub async fn peer_disconnect(&self, peer: PeerId) -> Result<()> {
        self.post(NodeRequest::PeerDisconnect(peer)).await
    }

    /// Deliver a decoded inbound message.
    pub async fn peer_message(&self, peer: PeerId, message: PeerMessage) -> Result<()> {
        self.post(NodeRequest::PeerMessage(peer, message)).await
    }

    /// Deliver a decoded merkle block with its transactions.
    pub async fn peer_merkle_block(&self, peer: PeerId, block: FilteredBlock) -> Result<()> {
        self.post(NodeRequest::PeerMerkleBlock(peer, block)).await
    }
}

/// The SPV node: a session plus the dispatcher that drives it.
pub struct SpvNode<H, P, W> {
    session: SpvSession<H, P, W>,
    requests: mpsc::Receiver<NodeRequest>,
    request_tx: mpsc::Sender<NodeRequest>,
    heartbeat_interval: Duration,
}

impl<H, P, W> SpvNode<H, P, W>
where
    H: HeaderStore,
    P: PeerManager,
    W: WalletSink,
{
    /// Create a node and its request handle.
    ///
    /// `best_block_hash` is the wallet's best known merkle block, usually
    /// restored from wallet storage.
    pub fn new(
        config: ClientConfig,
        store: H,
        peers: P,
        wallet: W,
        best_block_hash: BlockHash,
    ) -> (Self, SpvNodeHandle) {
        let (request_tx, requests) = mpsc::channel(config.request_channel_capacity);
        let heartbeat_interval = config.heartbeat_interval;
        let session = SpvSession::new(config, store, peers, wallet, best_block_hash);
        let handle = SpvNodeHandle {
            requests: request_tx.clone(),
        };
        (
            Self {
                session,
                requests,
                request_tx,
                heartbeat_interval,
            },
            handle,
        )
    }

    /// Initialize the header chain and seed the download queue.
    pub async fn start(&mut self) -> Result<()> {
        self.session.start().await?;
        Ok(())
    }

    /// Run the dispatch loop until `shutdown` is cancelled.
    ///
    /// Each request executes to completion before the next is dequeued.
    pub async fn run(mut self, shutdown: CancellationToken) -> Result<()> {
        let heartbeat = spawn_heartbeat(
            self.request_tx.clone(),
            self.heartbeat_interval,
            shutdown.clone(),
        );
        drop(self.request_tx);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                request = self.requests.recv() => match request {
                    Some(request) => self.session.handle_request(request).await,
                    None => break,
                },
            }
        }

        let _ = heartbeat.await;
        tracing::info!("spv node stopped");
        Ok(())
    }

    /// The session, for direct inspection.
    pub fn session(&self) -> &SpvSession<H, P, W> {
        &self.session
    }

    /// Mutable session access, for embedders driving requests without the
    /// dispatch loop.
    pub fn session_mut(&mut self) -> &mut SpvSession<H, P, W> {
        &mut self.session
    }
}

fn spawn_heartbeat(
    requests: mpsc::Sender<NodeRequest>,
    interval: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // The first tick fires immediately; skip it so the initial check
        // happens one full interval after startup.
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    if requests.send(NodeRequest::Heartbeat).await.is_err() {
                        break;
                    }
                }
            }
        }
    })
}
