//! Merkle block ingestion and ordered wallet delivery.
//!
//! Merkle blocks arrive in whatever order peers answer. They are buffered in
//! `received_merkle` and only delivered once their parent is known to the
//! wallet, so wallet-side imports are strictly parent-before-child. Delivery
//! also waits for inflight transactions to drain: a transaction announced
//! via `Inv` may belong to a buffered block, and the block must not reach
//! the wallet before the transaction does.

use bitcoin::{Transaction, Txid};
use indexmap::IndexMap;

use crate::chain::{ChainAction, HeaderStore};
use crate::error::SyncResult;
use crate::network::{FilteredBlock, Inventory, PeerManager};
use crate::types::PeerId;
use crate::wallet::WalletSink;

use super::session::{ReceivedBlock, SpvSession};

impl<H, P, W> SpvSession<H, P, W>
where
    H: HeaderStore,
    P: PeerManager,
    W: WalletSink,
{
    /// Ingest a decoded merkle block from a peer.
    pub(crate) async fn handle_merkle_block(
        &mut self,
        peer: PeerId,
        block: FilteredBlock,
    ) -> SyncResult<()> {
        let hash = block.block_hash();
        let Some(node) = self.store.get_block_header_node(&hash).await? else {
            tracing::warn!("unsolicited merkle block {hash} from {peer}");
            return Ok(());
        };

        if let Some(state) = self.peer_states.get_mut(&peer) {
            state.inflight_merkles.retain(|m| m.hash != hash);
        }

        if self.pending_rescan.is_some() {
            tracing::debug!("discarding merkle block {hash}: rescan pending");
            if self
                .peer_states
                .get(&peer)
                .map_or(true, |state| state.inflight_merkles.is_empty())
            {
                self.complete_pending_rescan().await?;
            }
            return Ok(());
        }

        let matched = match block.extract_matched() {
            Ok((root, matched)) if root == block.header.merkle_root => matched,
            Ok(_) => {
                tracing::warn!("merkle root mismatch in block {hash} from {peer}");
                return Ok(());
            }
            Err(err) => {
                tracing::warn!("undecodable merkle proof in block {hash} from {peer}: {err}");
                return Ok(());
            }
        };

        self.received_merkle
            .entry(node.height)
            .or_default()
            .push(ReceivedBlock {
                height: node.height,
                hash,
                header: block.header,
                matched,
                transactions: block.transactions,
            });

        self.import_merkle_blocks().await?;
        self.download_blocks(peer).await
    }

    /// Handle a standalone transaction from a peer.
    pub(crate) async fn handle_tx(&mut self, peer: PeerId, tx: Transaction) -> SyncResult<()> {
        let txid = tx.compute_txid();
        tracing::debug!("transaction {txid} from {peer}");

        if self.merkles_synced().await? {
            self.stats.transactions_imported += 1;
            self.wallet.import_transactions(vec![tx]).await;
        } else {
            // Arrived ahead of its merkle block; held until the chain
            // catches up. First arrival wins.
            self.solo_txs.entry(txid).or_insert(tx);
        }

        for state in self.peer_states.values_mut() {
            state.inflight_txs.retain(|t| t.txid != txid);
        }

        // A pending transaction no longer blocks delivery.
        self.import_merkle_blocks().await
    }

    /// Handle an inventory announcement from a peer.
    pub(crate) async fn handle_inv(
        &mut self,
        peer: PeerId,
        inventory: Vec<Inventory>,
    ) -> SyncResult<()> {
        let mut wanted_txs: Vec<Txid> = Vec::new();
        let mut blocks: Vec<_> = Vec::new();
        for item in inventory {
            match item {
                Inventory::Transaction(txid) => {
                    if self.wallet.want_tx_hash(txid).await {
                        wanted_txs.push(txid);
                    }
                }
                Inventory::Block(hash) => blocks.push(hash),
                Inventory::FilteredBlock(hash) => {
                    tracing::trace!("ignoring filtered block inv {hash} from {peer}");
                }
            }
        }

        if !wanted_txs.is_empty() {
            self.download_txs(peer, wanted_txs).await?;
        }

        let mut best_known: Option<u32> = None;
        let mut unknown = Vec::new();
        for hash in blocks {
            match self.store.get_block_header_height(&hash).await? {
                Some(height) => {
                    best_known = Some(best_known.map_or(height, |best| best.max(height)));
                }
                None => unknown.push(hash),
            }
        }
        if let Some(height) = best_known {
            self.peers.increase_peer_height(peer, height).await;
        }
        if !unknown.is_empty() {
            let locator = self.store.block_locator().await?;
            for hash in unknown {
                let state = self.peer_state_mut(peer);
                if !state.broadcast_blocks.contains(&hash) {
                    state.broadcast_blocks.push(hash);
                }
                tracing::debug!("peer {peer} announced unknown block {hash}, requesting headers");
                let request = self.get_headers_message(locator.clone(), hash);
                self.send(peer, request).await;
            }
        }
        Ok(())
    }

    /// Deliver buffered merkle blocks to the wallet in chain order.
    ///
    /// Runs to a fixpoint: each pass imports every block whose parent the
    /// wallet knows, and importing a block can unblock its children. Safe
    /// to call at any time; a no-op while transactions are inflight or a
    /// rescan is pending.
    pub(crate) async fn import_merkle_blocks(&mut self) -> SyncResult<()> {
        if self.pending_rescan.is_some() {
            return Ok(());
        }
        // Interlock: an inflight transaction may belong to a buffered
        // block, and the block must not reach the wallet first.
        if self.any_inflight_txs() {
            return Ok(());
        }

        loop {
            let mut imported_any = false;
            let heights: Vec<u32> = self.received_merkle.keys().copied().collect();
            for height in heights {
                let Some(blocks) = self.received_merkle.remove(&height) else {
                    continue;
                };
                let mut kept = Vec::new();
                for block in blocks {
                    if self.is_importable(&block).await? {
                        self.import_one(block).await?;
                        imported_any = true;
                    } else {
                        kept.push(block);
                    }
                }
                if !kept.is_empty() {
                    self.received_merkle.insert(height, kept);
                }
            }

            if !imported_any {
                return Ok(());
            }

            if self.merkles_synced().await? && !self.solo_txs.is_empty() {
                let txs: Vec<Transaction> = self.solo_txs.drain(..).map(|(_, tx)| tx).collect();
                tracing::debug!("draining {} solo transactions to the wallet", txs.len());
                self.stats.transactions_imported += txs.len() as u64;
                self.wallet.import_transactions(txs).await;
            }
        }
    }

    /// A block can be delivered when the wallet knows its parent: genesis,
    /// an already-imported merkle block, or a header from before the
    /// catchup horizon (which the wallet will never see).
    async fn is_importable(&self, block: &ReceivedBlock) -> SyncResult<bool> {
        let prev = block.header.prev_blockhash;
        if prev == self.store.genesis_hash() {
            return Ok(true);
        }
        if self.wallet.have_merkle_hash(prev).await {
            return Ok(true);
        }
        match self.store.get_block_header_node(&prev).await? {
            Some(parent) => Ok(parent.header.time < self.fast_catchup),
            None => Ok(false),
        }
    }

    async fn import_one(&mut self, block: ReceivedBlock) -> SyncResult<()> {
        let action = self.store.connect_block(self.best_block_hash, block.hash).await?;

        // Transactions carried with the block, merged with matching solo
        // transactions, unique by txid.
        let mut txs: IndexMap<Txid, Transaction> = block
            .transactions
            .into_iter()
            .map(|tx| (tx.compute_txid(), tx))
            .collect();
        for txid in &block.matched {
            if let Some(solo) = self.solo_txs.shift_remove(txid) {
                txs.entry(*txid).or_insert(solo);
            }
        }

        match &action {
            ChainAction::BestBlock(node) => {
                tracing::debug!("imported merkle block {} at height {}", node.hash, node.height);
                self.best_block_hash = block.hash;
            }
            ChainAction::BlockReorg {
                disconnected,
                connected,
                ..
            } => {
                tracing::info!(
                    "reorg at {}: {} blocks disconnected, {} connected",
                    block.hash,
                    disconnected.len(),
                    connected.len()
                );
                self.stats.reorgs += 1;
                self.best_block_hash = block.hash;
            }
            ChainAction::SideBlock(node) => {
                tracing::debug!("merkle block {} landed on a side chain", node.hash);
            }
        }

        if !txs.is_empty() {
            self.stats.transactions_imported += txs.len() as u64;
            self.wallet.import_transactions(txs.into_values().collect()).await;
        }
        self.stats.merkle_blocks_imported += 1;
        self.wallet.import_merkle_block(action, block.matched).await;
        Ok(())
    }
}
