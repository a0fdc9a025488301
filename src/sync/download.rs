//! Download scheduling, inflight tracking and stall recovery.
//!
//! `download_blocks` is the sole assigner of merkle block work: it moves a
//! height-capped batch from the download queue into the peer's inflight set
//! and emits one `GetData` plus a `Ping` sentinel. The heartbeat sweeps
//! both inflight maps for stalls.

use std::collections::BTreeMap;
use std::time::Instant;

use bitcoin::hashes::Hash;
use bitcoin::{BlockHash, Txid};

use crate::chain::HeaderStore;
use crate::error::SyncResult;
use crate::network::{Inventory, Message, PeerManager};
use crate::types::PeerId;
use crate::wallet::WalletSink;

use super::session::{InflightMerkle, InflightTx, SpvSession};

/// Pop up to `limit` queued blocks in ascending height order, keeping only
/// the prefix at or below `height_cap`. Chosen entries leave the queue.
fn take_batch(
    queue: &mut BTreeMap<u32, Vec<BlockHash>>,
    limit: usize,
    height_cap: u32,
) -> Vec<(u32, BlockHash)> {
    let mut batch = Vec::new();
    'scan: for (&height, hashes) in queue.iter() {
        for hash in hashes {
            if batch.len() == limit {
                break 'scan;
            }
            batch.push((height, *hash));
        }
    }

    let keep = batch.iter().take_while(|(height, _)| *height <= height_cap).count();
    batch.truncate(keep);

    for (height, hash) in &batch {
        if let Some(hashes) = queue.get_mut(height) {
            hashes.retain(|h| h != hash);
            if hashes.is_empty() {
                queue.remove(height);
            }
        }
    }
    batch
}

impl<H, P, W> SpvSession<H, P, W>
where
    H: HeaderStore,
    P: PeerManager,
    W: WalletSink,
{
    /// Assign queued blocks to `peer` if it qualifies.
    ///
    /// A peer qualifies when it is not the sync peer, a bloom filter is
    /// installed, its handshake completed, it has nothing inflight, and no
    /// rescan is pending.
    pub(crate) async fn download_blocks(&mut self, peer: PeerId) -> SyncResult<()> {
        if self.bloom.is_none() || self.pending_rescan.is_some() {
            return Ok(());
        }
        if self.sync_peer == Some(peer) {
            return Ok(());
        }
        if self
            .peer_states
            .get(&peer)
            .is_some_and(|state| !state.inflight_merkles.is_empty())
        {
            return Ok(());
        }
        let Some(data) = self.peers.get_peer_data(peer).await else {
            return Ok(());
        };
        if !data.handshake_complete {
            return Ok(());
        }

        let batch = take_batch(
            &mut self.blocks_to_download,
            self.config.max_blocks_per_request,
            data.best_height,
        );
        if batch.is_empty() {
            return Ok(());
        }

        let now = Instant::now();
        let state = self.peer_state_mut(peer);
        state
            .inflight_merkles
            .extend(batch.iter().map(|&(height, hash)| InflightMerkle {
                height,
                hash,
                issued_at: now,
            }));

        tracing::debug!("requesting {} merkle blocks from {peer}", batch.len());
        let inventory = batch
            .iter()
            .map(|&(_, hash)| Inventory::FilteredBlock(hash))
            .collect();
        self.send(peer, Message::GetData(inventory)).await;
        // End-of-batch sentinel: the pong arrives after the last merkle
        // block of the batch.
        self.send(peer, Message::Ping(rand::random())).await;
        Ok(())
    }

    /// Request transactions from `peer` and track them inflight.
    pub(crate) async fn download_txs(&mut self, peer: PeerId, txids: Vec<Txid>) -> SyncResult<()> {
        if txids.is_empty() {
            return Ok(());
        }
        let now = Instant::now();
        let state = self.peer_state_mut(peer);
        state.inflight_txs.extend(txids.iter().map(|&txid| InflightTx {
            txid,
            issued_at: now,
        }));

        tracing::debug!("requesting {} transactions from {peer}", txids.len());
        let inventory = txids.into_iter().map(Inventory::Transaction).collect();
        self.send(peer, Message::GetData(inventory)).await;
        Ok(())
    }

    /// Periodic stall sweep.
    ///
    /// Stalled merkle requests return to the download queue and their peer
    /// is assigned last this round; stalled transaction requests are
    /// re-issued to the same peer.
    pub(crate) async fn heartbeat(&mut self) -> SyncResult<()> {
        let now = Instant::now();
        let timeout = self.config.stall_timeout;

        let mut stalled_peers: Vec<PeerId> = Vec::new();
        let mut requeue: Vec<(u32, BlockHash)> = Vec::new();
        let mut reissue: Vec<(PeerId, Vec<Txid>)> = Vec::new();

        for (peer_id, state) in self.peer_states.iter_mut() {
            let stalled: Vec<InflightMerkle> = state
                .inflight_merkles
                .iter()
                .copied()
                .filter(|m| now.duration_since(m.issued_at) >= timeout)
                .collect();
            if !stalled.is_empty() {
                state
                    .inflight_merkles
                    .retain(|m| now.duration_since(m.issued_at) < timeout);
                tracing::warn!(
                    "{} merkle block requests stalled on {peer_id}, requeueing",
                    stalled.len()
                );
                stalled_peers.push(*peer_id);
                requeue.extend(stalled.iter().map(|m| (m.height, m.hash)));
            }

            let stalled_txs: Vec<Txid> = state
                .inflight_txs
                .iter()
                .filter(|t| now.duration_since(t.issued_at) >= timeout)
                .map(|t| t.txid)
                .collect();
            if !stalled_txs.is_empty() {
                state
                    .inflight_txs
                    .retain(|t| now.duration_since(t.issued_at) < timeout);
                reissue.push((*peer_id, stalled_txs));
            }
        }

        self.stats.stalled_merkles_requeued += requeue.len() as u64;
        for (height, hash) in requeue {
            self.enqueue_block(height, hash);
        }

        for (peer_id, txids) in reissue {
            self.stats.stalled_txs_reissued += txids.len() as u64;
            tracing::warn!("re-requesting {} stalled transactions from {peer_id}", txids.len());
            self.download_txs(peer_id, txids).await?;
        }

        // The sweep may have drained the inflight set a deferred rescan is
        // waiting on.
        if self.pending_rescan.is_some() && !self.any_inflight_merkles() {
            self.complete_pending_rescan().await?;
        }

        // Peers that stalled are assigned last this round.
        let keys = self.peers.get_peer_keys().await;
        let (fresh, demoted): (Vec<PeerId>, Vec<PeerId>) = keys
            .into_iter()
            .partition(|peer| !stalled_peers.contains(peer));
        for peer in fresh.into_iter().chain(demoted) {
            self.download_blocks(peer).await?;
        }
        Ok(())
    }

    /// Reclaim a disconnected peer's work and reassign it.
    pub(crate) async fn on_peer_disconnect(&mut self, peer: PeerId) -> SyncResult<()> {
        tracing::info!("peer {peer} disconnected");
        if let Some(state) = self.peer_states.remove(&peer) {
            if !state.inflight_merkles.is_empty() {
                tracing::debug!(
                    "requeueing {} merkle block requests from {peer}",
                    state.inflight_merkles.len()
                );
            }
            for inflight in state.inflight_merkles {
                self.enqueue_block(inflight.height, inflight.hash);
            }
        }

        // The departed peer may have held the last inflight merkle a
        // deferred rescan was waiting on.
        if self.pending_rescan.is_some() && !self.any_inflight_merkles() {
            self.complete_pending_rescan().await?;
        }

        if self.sync_peer == Some(peer) {
            self.sync_peer = None;
            let locator = self.store.block_locator().await?;
            for other in self.peers.get_peer_keys().await {
                let request = self.get_headers_message(locator.clone(), BlockHash::all_zeros());
                self.send(other, request).await;
            }
        }

        for other in self.peers.get_peer_keys().await {
            self.download_blocks(other).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hash(n: u8) -> BlockHash {
        BlockHash::from_byte_array([n; 32])
    }

    fn queue(entries: &[(u32, u8)]) -> BTreeMap<u32, Vec<BlockHash>> {
        let mut queue = BTreeMap::new();
        for &(height, n) in entries {
            queue.entry(height).or_insert_with(Vec::new).push(hash(n));
        }
        queue
    }

    #[test]
    fn takes_in_ascending_height_order() {
        let mut q = queue(&[(5, 5), (1, 1), (3, 3)]);
        let batch = take_batch(&mut q, 10, 100);
        assert_eq!(batch, vec![(1, hash(1)), (3, hash(3)), (5, hash(5))]);
        assert!(q.is_empty());
    }

    #[test]
    fn respects_limit() {
        let mut q = queue(&[(1, 1), (2, 2), (3, 3)]);
        let batch = take_batch(&mut q, 2, 100);
        assert_eq!(batch.len(), 2);
        assert_eq!(q.len(), 1);
        assert!(q.contains_key(&3));
    }

    #[test]
    fn caps_at_peer_height() {
        let mut q = queue(&[(1, 1), (2, 2), (3, 3)]);
        let batch = take_batch(&mut q, 10, 2);
        assert_eq!(batch, vec![(1, hash(1)), (2, hash(2))]);
        // The too-high entry stays queued.
        assert!(q.contains_key(&3));
    }

    #[test]
    fn short_peer_gets_nothing_when_first_block_is_above_it() {
        let mut q = queue(&[(10, 1), (11, 2)]);
        let batch = take_batch(&mut q, 10, 5);
        assert!(batch.is_empty());
        assert_eq!(q.len(), 2);
    }

    #[test]
    fn preserves_insertion_order_within_a_height() {
        let mut q = queue(&[(7, 1), (7, 2), (7, 3)]);
        let batch = take_batch(&mut q, 2, 100);
        assert_eq!(batch, vec![(7, hash(1)), (7, hash(2))]);
        assert_eq!(q[&7], vec![hash(3)]);
    }
}
