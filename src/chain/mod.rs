//! Header-chain store interface and chain types.
//!
//! The session drives the store through the narrow [`HeaderStore`] trait:
//! header insertion with chain-work tie-breaking, best-chain queries, reorg
//! computation on block connect, and timestamp-keyed lookups. A
//! reorg-capable in-memory implementation lives in [`memory`].

pub mod memory;

pub use memory::MemoryHeaderStore;

use async_trait::async_trait;
use bitcoin::block::Header;
use bitcoin::pow::Work;
use bitcoin::BlockHash;
use thiserror::Error;

use crate::error::StorageResult;

/// A header attached to the chain, with its derived position and work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeaderNode {
    /// The raw block header.
    pub header: Header,

    /// Hash of the header.
    pub hash: BlockHash,

    /// Height of the header above genesis.
    pub height: u32,

    /// Cumulative proof-of-work from genesis to this header.
    pub chain_work: Work,
}

/// Outcome of inserting a header into the store.
#[derive(Debug, Clone)]
pub enum HeaderInsertion {
    /// The header extended the chain (not necessarily the best branch).
    Accepted(HeaderNode),

    /// The header was already present.
    Exists(HeaderNode),

    /// The store refused the header.
    Rejected(HeaderRejection),
}

/// Why a header was refused.
#[derive(Debug, Clone, Error)]
pub enum HeaderRejection {
    #[error("previous block {0} not in chain")]
    Orphan(BlockHash),

    #[error("header {0} failed validation: {1}")]
    Invalid(BlockHash, String),
}

/// Outcome of connecting a merkle block on top of the current best block.
#[derive(Debug, Clone)]
pub enum ChainAction {
    /// The block extends the wallet's best chain.
    BestBlock(HeaderNode),

    /// The block lands on a branch with more work than the current best
    /// chain: the wallet must unwind to the common ancestor first.
    BlockReorg {
        /// Last node shared by both branches.
        common: HeaderNode,

        /// Nodes leaving the wallet's chain, former tip first.
        disconnected: Vec<HeaderNode>,

        /// Nodes joining the chain, ascending, ending at the new block.
        connected: Vec<HeaderNode>,
    },

    /// The block sits on a branch with no more work than the best chain.
    SideBlock(HeaderNode),
}

impl ChainAction {
    /// The node the action is about.
    pub fn node(&self) -> &HeaderNode {
        match self {
            ChainAction::BestBlock(node) | ChainAction::SideBlock(node) => node,
            ChainAction::BlockReorg { connected, common, .. } => {
                connected.last().unwrap_or(common)
            }
        }
    }
}

/// Persistent header chain, as seen by the session.
///
/// Implementations must apply insertion and best-chain update atomically;
/// the session treats every call as transactional.
#[async_trait]
pub trait HeaderStore: Send + Sync {
    /// Prepare the chain for use (load persisted headers, seed genesis).
    async fn init_header_chain(&mut self) -> StorageResult<()>;

    /// Insert a header, linking it to its parent and updating the best
    /// chain when its cumulative work strictly exceeds the current best.
    async fn connect_block_header(
        &mut self,
        header: Header,
        adjusted_time: u32,
    ) -> StorageResult<HeaderInsertion>;

    /// Decide how the block `bid` relates to the chain whose tip, from the
    /// wallet's perspective, is `prev`.
    async fn connect_block(
        &mut self,
        prev: BlockHash,
        bid: BlockHash,
    ) -> StorageResult<ChainAction>;

    /// The tip of the most-work header chain.
    async fn get_best_block_header(&self) -> StorageResult<HeaderNode>;

    /// Height of the most-work header chain.
    async fn best_block_header_height(&self) -> StorageResult<u32>;

    /// Look up a header node by hash.
    async fn get_block_header_node(&self, hash: &BlockHash) -> StorageResult<Option<HeaderNode>>;

    /// Whether the store holds a header with this hash.
    async fn exists_block_header_node(&self, hash: &BlockHash) -> StorageResult<bool>;

    /// Height of a header, if present.
    async fn get_block_header_height(&self, hash: &BlockHash) -> StorageResult<Option<u32>>;

    /// The highest best-chain node whose timestamp is strictly below `ts`.
    async fn block_before_timestamp(&self, ts: u32) -> StorageResult<HeaderNode>;

    /// Best-chain blocks strictly after `from`, ascending by height.
    async fn blocks_to_download(&self, from: &BlockHash)
        -> StorageResult<Vec<(u32, BlockHash)>>;

    /// Block locator for the best chain: dense near the tip, then
    /// exponentially sparse, always ending at genesis.
    async fn block_locator(&self) -> StorageResult<Vec<BlockHash>>;

    /// Hash of the genesis header.
    fn genesis_hash(&self) -> BlockHash;
}
