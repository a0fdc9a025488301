//! Peer-manager interface consumed by the SPV session.
//!
//! The session never touches sockets. A [`PeerManager`] implementation owns
//! connection lifetime, the version handshake and message framing; the
//! session sees peers as opaque [`PeerId`]s with [`PeerData`] attached, sends
//! abstract [`Message`]s and receives decoded inbound traffic through the
//! request channel.

use async_trait::async_trait;
use bitcoin::block::Header;
use bitcoin::merkle_tree::{MerkleBlockError, PartialMerkleTree};
use bitcoin::p2p::message_blockdata::GetHeadersMessage;
use bitcoin::p2p::message_bloom::FilterLoad;
use bitcoin::{BlockHash, Transaction, TxMerkleNode, Txid};

use crate::error::NetworkResult;
use crate::types::{PeerData, PeerId};

/// Inventory vector carried in `GetData` and `Inv` messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Inventory {
    /// A transaction, identified by txid.
    Transaction(Txid),

    /// A full block. Only ever received; the session never requests one.
    Block(BlockHash),

    /// A bloom-filtered block (merkle block).
    FilteredBlock(BlockHash),
}

/// Outbound messages emitted by the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// Install a bloom filter on the remote peer.
    FilterLoad(FilterLoad),

    /// Broadcast a transaction.
    Tx(Transaction),

    /// Request headers following a locator.
    GetHeaders(GetHeadersMessage),

    /// Request inventory items.
    GetData(Vec<Inventory>),

    /// End-of-batch sentinel after a merkle block request.
    Ping(u64),
}

/// Decoded inbound messages the session handles.
///
/// Merkle blocks arrive separately as [`FilteredBlock`] because the decoder
/// pairs the `merkleblock` message with the transactions sent alongside it.
#[derive(Debug, Clone)]
pub enum PeerMessage {
    /// A batch of block headers.
    Headers(Vec<Header>),

    /// An inventory announcement.
    Inv(Vec<Inventory>),

    /// A standalone transaction.
    Tx(Transaction),
}

/// A decoded merkle block: header, partial merkle tree and the transactions
/// the peer delivered alongside it.
#[derive(Debug, Clone)]
pub struct FilteredBlock {
    /// The block header.
    pub header: Header,

    /// Partial merkle tree proving inclusion of the matched transactions.
    pub tree: PartialMerkleTree,

    /// Transactions received together with the merkle block.
    pub transactions: Vec<Transaction>,
}

impl FilteredBlock {
    /// Hash of the underlying block header.
    pub fn block_hash(&self) -> BlockHash {
        self.header.block_hash()
    }

    /// Extract the merkle root and matched txids from the partial tree.
    ///
    /// The caller compares the returned root against the header's merkle
    /// root; a mismatch means the peer sent a proof for different content.
    pub fn extract_matched(&self) -> Result<(TxMerkleNode, Vec<Txid>), MerkleBlockError> {
        let mut matches = Vec::new();
        let mut indexes = Vec::new();
        let root = self.tree.extract_matches(&mut matches, &mut indexes)?;
        Ok((root, matches))
    }
}

/// Returns true for a filter that matches nothing.
///
/// An absent byte string and an all-zero byte string are both "empty": a
/// remote node loaded with either would relay no transactions at all, so the
/// session refuses to install such a filter.
pub fn filter_is_empty(filter: &FilterLoad) -> bool {
    filter.filter.iter().all(|b| *b == 0)
}

/// Interface to the peer manager, invoked by the session.
#[async_trait]
pub trait PeerManager: Send + Sync {
    /// Send a message to a peer. Best-effort; the session logs failures and
    /// relies on the stall heartbeat for recovery.
    async fn send_message(&mut self, peer: PeerId, message: Message) -> NetworkResult<()>;

    /// All connected peers with their data.
    async fn get_peers(&self) -> Vec<(PeerId, PeerData)>;

    /// Identities of all connected peers.
    async fn get_peer_keys(&self) -> Vec<PeerId>;

    /// Data for one peer, if still connected.
    async fn get_peer_data(&self, peer: PeerId) -> Option<PeerData>;

    /// Raise a peer's advertised height. Lower values are ignored.
    async fn increase_peer_height(&mut self, peer: PeerId, height: u32);

    /// The highest advertised height across handshaken peers.
    async fn get_best_peer_height(&self) -> Option<u32>;
}
