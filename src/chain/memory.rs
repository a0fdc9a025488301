//! In-memory header chain with reorg support.
//!
//! Reference [`HeaderStore`] implementation: parent-linked nodes keyed by
//! hash, cumulative work per node, best tip selected by strictly greater
//! chain work (first-seen wins ties). Suitable for tests and for embedders
//! that persist headers elsewhere.

use std::collections::HashMap;

use async_trait::async_trait;
use bitcoin::block::Header;
use bitcoin::constants::genesis_block;
use bitcoin::pow::Work;
use bitcoin::{BlockHash, Network};

use crate::chain::{ChainAction, HeaderInsertion, HeaderNode, HeaderRejection, HeaderStore};
use crate::error::{StorageError, StorageResult};

/// Headers this far past the adjusted network time are refused.
const MAX_FUTURE_DRIFT: u32 = 2 * 60 * 60;

#[derive(Debug, Clone, Copy)]
struct StoredHeader {
    header: Header,
    height: u32,
    chain_work: Work,
}

/// Reorg-capable in-memory header chain.
#[derive(Debug)]
pub struct MemoryHeaderStore {
    nodes: HashMap<BlockHash, StoredHeader>,
    best: BlockHash,
    genesis: BlockHash,
}

impl MemoryHeaderStore {
    /// Create a store seeded with the genesis header of `network`.
    pub fn new(network: Network) -> Self {
        let header = genesis_block(network).header;
        let hash = header.block_hash();
        let mut nodes = HashMap::new();
        nodes.insert(
            hash,
            StoredHeader {
                header,
                height: 0,
                chain_work: header.work(),
            },
        );
        Self {
            nodes,
            best: hash,
            genesis: hash,
        }
    }

    fn node(&self, hash: &BlockHash) -> Option<HeaderNode> {
        self.nodes.get(hash).map(|stored| HeaderNode {
            header: stored.header,
            hash: *hash,
            height: stored.height,
            chain_work: stored.chain_work,
        })
    }

    fn require(&self, hash: &BlockHash) -> StorageResult<HeaderNode> {
        self.node(hash)
            .ok_or_else(|| StorageError::NotFound(format!("header {hash}")))
    }

    fn parent(&self, node: &HeaderNode) -> Option<HeaderNode> {
        if node.hash == self.genesis {
            return None;
        }
        self.node(&node.header.prev_blockhash)
    }

    /// The ancestor of `node` at `height`, walking parent links.
    fn ancestor_at(&self, mut node: HeaderNode, height: u32) -> StorageResult<HeaderNode> {
        while node.height > height {
            node = self.parent(&node).ok_or_else(|| {
                StorageError::InconsistentState(format!("broken parent link at {}", node.hash))
            })?;
        }
        Ok(node)
    }

    /// Last node shared by the branches ending at `a` and `b`.
    fn common_ancestor(&self, a: HeaderNode, b: HeaderNode) -> StorageResult<HeaderNode> {
        let height = a.height.min(b.height);
        let mut a = self.ancestor_at(a, height)?;
        let mut b = self.ancestor_at(b, height)?;
        while a.hash != b.hash {
            a = self.parent(&a).ok_or_else(|| {
                StorageError::InconsistentState("branches share no ancestor".to_string())
            })?;
            b = self.parent(&b).ok_or_else(|| {
                StorageError::InconsistentState("branches share no ancestor".to_string())
            })?;
        }
        Ok(a)
    }

    /// Nodes from `tip` down to `stop` (exclusive), tip first.
    fn path_down_to(&self, tip: HeaderNode, stop: &HeaderNode) -> StorageResult<Vec<HeaderNode>> {
        let mut path = Vec::new();
        let mut node = tip;
        while node.hash != stop.hash {
            let parent = self.parent(&node).ok_or_else(|| {
                StorageError::InconsistentState(format!("broken parent link at {}", node.hash))
            })?;
            path.push(node);
            node = parent;
        }
        Ok(path)
    }
}

#[async_trait]
impl HeaderStore for MemoryHeaderStore {
    async fn init_header_chain(&mut self) -> StorageResult<()> {
        // Genesis is seeded in the constructor; nothing to load.
        Ok(())
    }

    async fn connect_block_header(
        &mut self,
        header: Header,
        adjusted_time: u32,
    ) -> StorageResult<HeaderInsertion> {
        let hash = header.block_hash();
        if let Some(existing) = self.node(&hash) {
            return Ok(HeaderInsertion::Exists(existing));
        }
        if header.time > adjusted_time.saturating_add(MAX_FUTURE_DRIFT) {
            return Ok(HeaderInsertion::Rejected(HeaderRejection::Invalid(
                hash,
                "timestamp too far in the future".to_string(),
            )));
        }
        let Some(parent) = self.nodes.get(&header.prev_blockhash).copied() else {
            return Ok(HeaderInsertion::Rejected(HeaderRejection::Orphan(
                header.prev_blockhash,
            )));
        };

        let stored = StoredHeader {
            header,
            height: parent.height + 1,
            chain_work: parent.chain_work + header.work(),
        };
        self.nodes.insert(hash, stored);

        let best_work = self.nodes[&self.best].chain_work;
        if stored.chain_work > best_work {
            self.best = hash;
        }

        Ok(HeaderInsertion::Accepted(HeaderNode {
            header,
            hash,
            height: stored.height,
            chain_work: stored.chain_work,
        }))
    }

    async fn connect_block(
        &mut self,
        prev: BlockHash,
        bid: BlockHash,
    ) -> StorageResult<ChainAction> {
        let node = self.require(&bid)?;
        let prev_node = self.require(&prev)?;

        if node.header.prev_blockhash == prev {
            return Ok(ChainAction::BestBlock(node));
        }
        if node.chain_work > prev_node.chain_work {
            let common = self.common_ancestor(prev_node, node)?;
            let disconnected = self.path_down_to(prev_node, &common)?;
            let mut connected = self.path_down_to(node, &common)?;
            connected.reverse();
            return Ok(ChainAction::BlockReorg {
                common,
                disconnected,
                connected,
            });
        }
        Ok(ChainAction::SideBlock(node))
    }

    async fn get_best_block_header(&self) -> StorageResult<HeaderNode> {
        self.require(&self.best)
    }

    async fn best_block_header_height(&self) -> StorageResult<u32> {
        Ok(self.require(&self.best)?.height)
    }

    async fn get_block_header_node(&self, hash: &BlockHash) -> StorageResult<Option<HeaderNode>> {
        Ok(self.node(hash))
    }

    async fn exists_block_header_node(&self, hash: &BlockHash) -> StorageResult<bool> {
        Ok(self.nodes.contains_key(hash))
    }

    async fn get_block_header_height(&self, hash: &BlockHash) -> StorageResult<Option<u32>> {
        Ok(self.nodes.get(hash).map(|stored| stored.height))
    }

    async fn block_before_timestamp(&self, ts: u32) -> StorageResult<HeaderNode> {
        let mut node = self.require(&self.best)?;
        loop {
            if node.header.time < ts {
                return Ok(node);
            }
            match self.parent(&node) {
                Some(parent) => node = parent,
                // Nothing on the chain predates ts; genesis is the floor.
                None => return Ok(node),
            }
        }
    }

    async fn blocks_to_download(
        &self,
        from: &BlockHash,
    ) -> StorageResult<Vec<(u32, BlockHash)>> {
        let mut blocks = Vec::new();
        let mut node = self.require(&self.best)?;
        while node.hash != *from {
            blocks.push((node.height, node.hash));
            match self.parent(&node) {
                Some(parent) => node = parent,
                None => break,
            }
        }
        blocks.reverse();
        Ok(blocks)
    }

    async fn block_locator(&self) -> StorageResult<Vec<BlockHash>> {
        let tip = self.require(&self.best)?;
        let mut locator = Vec::new();
        let mut height = tip.height;
        let mut step = 1u32;
        loop {
            let node = self.ancestor_at(tip, height)?;
            locator.push(node.hash);
            if height == 0 {
                break;
            }
            if locator.len() >= 10 {
                step = step.saturating_mul(2);
            }
            height = height.saturating_sub(step);
        }
        Ok(locator)
    }

    fn genesis_hash(&self) -> BlockHash {
        self.genesis
    }
}
