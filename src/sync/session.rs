//! Session state record and request dispatch.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::time::Instant;

use bitcoin::block::Header;
use bitcoin::p2p::message_bloom::FilterLoad;
use bitcoin::{BlockHash, Transaction, Txid};
use indexmap::IndexMap;

use crate::chain::HeaderStore;
use crate::client::ClientConfig;
use crate::error::SyncResult;
use crate::network::{filter_is_empty, Message, PeerManager, PeerMessage};
use crate::types::{PeerId, SyncStats};
use crate::wallet::WalletSink;

use super::NodeRequest;

/// A merkle block request sent to a peer and not yet answered.
#[derive(Debug, Clone, Copy)]
pub(crate) struct InflightMerkle {
    pub height: u32,
    pub hash: BlockHash,
    pub issued_at: Instant,
}

/// A transaction request sent to a peer and not yet answered.
#[derive(Debug, Clone, Copy)]
pub(crate) struct InflightTx {
    pub txid: Txid,
    pub issued_at: Instant,
}

/// Per-peer download bookkeeping. Dropped wholesale on disconnect.
#[derive(Debug, Default)]
pub(crate) struct PeerSyncState {
    /// Merkle blocks requested from this peer, with issue timestamps.
    pub inflight_merkles: Vec<InflightMerkle>,

    /// Transactions requested from this peer, with issue timestamps.
    pub inflight_txs: Vec<InflightTx>,

    /// Blocks the peer announced whose headers we have not linked yet.
    /// Once a header lands, the peer's height is raised retroactively.
    pub broadcast_blocks: Vec<BlockHash>,
}

/// A validated merkle block waiting for its parent before wallet delivery.
#[derive(Debug, Clone)]
pub(crate) struct ReceivedBlock {
    pub height: u32,
    pub hash: BlockHash,
    pub header: Header,
    pub matched: Vec<Txid>,
    pub transactions: Vec<Transaction>,
}

/// The SPV session: all coordination state plus the three collaborators.
///
/// Single-threaded by construction. The dispatcher owns the session and
/// executes one [`NodeRequest`] to completion before the next; handlers
/// never suspend except to hand a message to the peer manager.
pub struct SpvSession<H, P, W> {
    pub(crate) config: ClientConfig,
    pub(crate) store: H,
    pub(crate) peers: P,
    pub(crate) wallet: W,

    /// Peer currently driving header sync, if any.
    pub(crate) sync_peer: Option<PeerId>,

    /// Current bloom filter. `None` disables merkle block download.
    pub(crate) bloom: Option<FilterLoad>,

    /// Block hashes awaiting download, keyed by ascending height.
    pub(crate) blocks_to_download: BTreeMap<u32, Vec<BlockHash>>,

    /// Merkle blocks arrived but not yet delivered in chain order.
    pub(crate) received_merkle: BTreeMap<u32, Vec<ReceivedBlock>>,

    /// Hash of the best merkle block delivered to the wallet.
    pub(crate) best_block_hash: BlockHash,

    /// Transactions received outside a merkle block before sync completed,
    /// unique by txid.
    pub(crate) solo_txs: IndexMap<Txid, Transaction>,

    /// Wallet-submitted transactions awaiting the first handshaken peer.
    pub(crate) pending_tx_broadcast: VecDeque<Transaction>,

    /// Deferred rescan timestamp; set while inflight merkles drain.
    pub(crate) pending_rescan: Option<u32>,

    /// Merkle blocks older than this timestamp are not downloaded.
    pub(crate) fast_catchup: u32,

    /// Download bookkeeping per connected peer.
    pub(crate) peer_states: HashMap<PeerId, PeerSyncState>,

    pub(crate) stats: SyncStats,
}

impl<H, P, W> SpvSession<H, P, W>
where
    H: HeaderStore,
    P: PeerManager,
    W: WalletSink,
{
    /// Create a session over the given collaborators.
    ///
    /// `best_block_hash` is the wallet's best known merkle block; the
    /// fast-catchup timestamp comes from the configuration. Call
    /// [`start`](Self::start) before feeding requests.
    pub fn new(config: ClientConfig, store: H, peers: P, wallet: W, best_block_hash: BlockHash) -> Self {
        let fast_catchup = config.fast_catchup;
        Self {
            config,
            store,
            peers,
            wallet,
            sync_peer: None,
            bloom: None,
            blocks_to_download: BTreeMap::new(),
            received_merkle: BTreeMap::new(),
            best_block_hash,
            solo_txs: IndexMap::new(),
            pending_tx_broadcast: VecDeque::new(),
            pending_rescan: None,
            fast_catchup,
            peer_states: HashMap::new(),
            stats: SyncStats::default(),
        }
    }

    /// Execute one request to completion, absorbing any error.
    ///
    /// Nothing propagates out of the dispatcher: failures are logged and the
    /// heartbeat recovers whatever was lost.
    pub async fn handle_request(&mut self, request: NodeRequest) {
        if let Err(err) = self.dispatch(request).await {
            tracing::warn!("request handler failed: {err}");
        }
    }

    async fn dispatch(&mut self, request: NodeRequest) -> SyncResult<()> {
        match request {
            NodeRequest::UpdateBloomFilter(filter) => self.update_bloom_filter(filter).await,
            NodeRequest::PublishTransaction(tx) => self.publish_transaction(tx).await,
            NodeRequest::Rescan(ts) => self.process_rescan(ts).await,
            NodeRequest::Heartbeat => self.heartbeat().await,
            NodeRequest::PeerHandshake(peer) => self.on_peer_handshake(peer).await,
            NodeRequest::PeerDisconnect(peer) => self.on_peer_disconnect(peer).await,
            NodeRequest::PeerMessage(peer, message) => match message {
                PeerMessage::Headers(headers) => self.handle_headers(peer, headers).await,
                PeerMessage::Inv(inventory) => self.handle_inv(peer, inventory).await,
                PeerMessage::Tx(tx) => self.handle_tx(peer, tx).await,
            },
            NodeRequest::PeerMerkleBlock(peer, block) => {
                self.handle_merkle_block(peer, block).await
            }
        }
    }

    /// Install a new bloom filter and broadcast it.
    async fn update_bloom_filter(&mut self, filter: FilterLoad) -> SyncResult<()> {
        if filter_is_empty(&filter) {
            tracing::debug!("ignoring empty bloom filter update");
            return Ok(());
        }
        if self.bloom.as_ref() == Some(&filter) {
            tracing::debug!("bloom filter unchanged");
            return Ok(());
        }
        self.bloom = Some(filter.clone());
        let peers = self.peers.get_peer_keys().await;
        tracing::info!("installing new bloom filter on {} peers", peers.len());
        for peer in &peers {
            self.send(*peer, Message::FilterLoad(filter.clone())).await;
        }
        for peer in peers {
            self.download_blocks(peer).await?;
        }
        Ok(())
    }

    /// Broadcast a wallet transaction, or queue it until a peer appears.
    async fn publish_transaction(&mut self, tx: Transaction) -> SyncResult<()> {
        let handshaken: Vec<PeerId> = self
            .peers
            .get_peers()
            .await
            .into_iter()
            .filter(|(_, data)| data.handshake_complete)
            .map(|(peer, _)| peer)
            .collect();
        if handshaken.is_empty() {
            tracing::debug!(
                "no handshaken peer, queueing transaction {}",
                tx.compute_txid()
            );
            self.pending_tx_broadcast.push_front(tx);
            return Ok(());
        }
        for peer in handshaken {
            self.send(peer, Message::Tx(tx.clone())).await;
        }
        Ok(())
    }

    /// Best-effort send; failures are logged and left to the heartbeat.
    pub(crate) async fn send(&mut self, peer: PeerId, message: Message) {
        if let Err(err) = self.peers.send_message(peer, message).await {
            tracing::debug!("send to {peer} failed: {err}");
        }
    }

    pub(crate) fn peer_state_mut(&mut self, peer: PeerId) -> &mut PeerSyncState {
        self.peer_states.entry(peer).or_default()
    }

    pub(crate) fn enqueue_block(&mut self, height: u32, hash: BlockHash) {
        self.blocks_to_download.entry(height).or_default().push(hash);
    }

    pub(crate) fn any_inflight_txs(&self) -> bool {
        self.peer_states
            .values()
            .any(|state| !state.inflight_txs.is_empty())
    }

    pub(crate) fn any_inflight_merkles(&self) -> bool {
        self.peer_states
            .values()
            .any(|state| !state.inflight_merkles.is_empty())
    }

    /// Header sync is complete when our best header reaches the best
    /// advertised peer height.
    pub(crate) async fn headers_synced(&self) -> SyncResult<bool> {
        let our_height = self.store.best_block_header_height().await?;
        Ok(match self.peers.get_best_peer_height().await {
            Some(peer_height) => our_height >= peer_height,
            None => true,
        })
    }

    /// Merkle download is complete when the wallet's best block reaches the
    /// best advertised peer height.
    pub(crate) async fn merkles_synced(&self) -> SyncResult<bool> {
        let our_height = self
            .store
            .get_block_header_height(&self.best_block_hash)
            .await?
            .unwrap_or(0);
        Ok(match self.peers.get_best_peer_height().await {
            Some(peer_height) => our_height >= peer_height,
            None => true,
        })
    }
}

/// Read-only views over the session, for embedders and tests.
impl<H, P, W> SpvSession<H, P, W> {
    /// The peer currently driving header sync.
    pub fn sync_peer(&self) -> Option<PeerId> {
        self.sync_peer
    }

    /// The currently installed bloom filter.
    pub fn bloom(&self) -> Option<&FilterLoad> {
        self.bloom.as_ref()
    }

    /// Hash of the best merkle block delivered to the wallet.
    pub fn best_block_hash(&self) -> BlockHash {
        self.best_block_hash
    }

    /// The active fast-catchup timestamp.
    pub fn fast_catchup(&self) -> u32 {
        self.fast_catchup
    }

    /// The deferred rescan timestamp, if one is pending.
    pub fn pending_rescan(&self) -> Option<u32> {
        self.pending_rescan
    }

    /// Number of block hashes queued for download.
    pub fn queued_block_count(&self) -> usize {
        self.blocks_to_download.values().map(Vec::len).sum()
    }

    /// Whether a given hash is queued for download.
    pub fn is_block_queued(&self, hash: &BlockHash) -> bool {
        self.blocks_to_download
            .values()
            .any(|hashes| hashes.contains(hash))
    }

    /// Number of merkle blocks buffered out of order.
    pub fn buffered_merkle_count(&self) -> usize {
        self.received_merkle.values().map(Vec::len).sum()
    }

    /// Number of solo transactions held back for sync.
    pub fn solo_tx_count(&self) -> usize {
        self.solo_txs.len()
    }

    /// Number of wallet transactions awaiting a first peer.
    pub fn pending_broadcast_count(&self) -> usize {
        self.pending_tx_broadcast.len()
    }

    /// Merkle block requests currently inflight to a peer.
    pub fn inflight_merkle_count(&self, peer: PeerId) -> usize {
        self.peer_states
            .get(&peer)
            .map_or(0, |state| state.inflight_merkles.len())
    }

    /// Whether a given hash is inflight to any peer.
    pub fn is_block_inflight(&self, hash: &BlockHash) -> bool {
        self.peer_states
            .values()
            .any(|state| state.inflight_merkles.iter().any(|m| m.hash == *hash))
    }

    /// Transaction requests currently inflight to a peer.
    pub fn inflight_tx_count(&self, peer: PeerId) -> usize {
        self.peer_states
            .get(&peer)
            .map_or(0, |state| state.inflight_txs.len())
    }

    /// Whether the session tracks any state for a peer.
    pub fn has_peer_state(&self, peer: PeerId) -> bool {
        self.peer_states.contains_key(&peer)
    }

    /// Progress counters.
    pub fn stats(&self) -> &SyncStats {
        &self.stats
    }

    /// The header store.
    pub fn store(&self) -> &H {
        &self.store
    }

    /// The peer manager.
    pub fn peer_manager(&self) -> &P {
        &self.peers
    }

    /// Mutable access to the peer manager.
    pub fn peer_manager_mut(&mut self) -> &mut P {
        &mut self.peers
    }

    /// The wallet sink.
    pub fn wallet(&self) -> &W {
        &self.wallet
    }

    /// Mutable access to the wallet sink.
    pub fn wallet_mut(&mut self) -> &mut W {
        &mut self.wallet
    }
}
