//! Header synchronization: startup anchoring, sync-peer selection and
//! `Headers` message processing.

use std::time::{SystemTime, UNIX_EPOCH};

use bitcoin::block::Header;
use bitcoin::hashes::Hash;
use bitcoin::p2p::message_blockdata::GetHeadersMessage;
use bitcoin::{BlockHash, Transaction};

use crate::chain::{HeaderInsertion, HeaderNode, HeaderStore};
use crate::error::SyncResult;
use crate::network::{Message, PeerManager};
use crate::types::PeerId;
use crate::wallet::WalletSink;

use super::session::SpvSession;

fn unix_time() -> u32 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as u32
}

impl<H, P, W> SpvSession<H, P, W>
where
    H: HeaderStore,
    P: PeerManager,
    W: WalletSink,
{
    /// Initialize the header chain and seed the download queue.
    ///
    /// If the wallet's best block predates the fast-catchup horizon (or is
    /// unknown to the chain), it is replaced by the catchup anchor: the
    /// highest header strictly older than the horizon. Blocks between the
    /// anchor and the chain tip are queued for download.
    pub async fn start(&mut self) -> SyncResult<()> {
        self.store.init_header_chain().await?;

        let best_node = self.store.get_block_header_node(&self.best_block_hash).await?;
        let anchor = match best_node {
            Some(node) if node.header.time >= self.fast_catchup => node,
            _ => {
                let anchor = self.store.block_before_timestamp(self.fast_catchup).await?;
                tracing::info!(
                    "fast catchup: anchoring at block {} height {}",
                    anchor.hash,
                    anchor.height
                );
                self.best_block_hash = anchor.hash;
                anchor
            }
        };

        self.blocks_to_download.clear();
        for (height, hash) in self.store.blocks_to_download(&anchor.hash).await? {
            self.enqueue_block(height, hash);
        }
        tracing::info!(
            "session started at height {} with {} blocks queued",
            anchor.height,
            self.queued_block_count()
        );
        Ok(())
    }

    /// A peer finished its handshake: arm it with the bloom filter, flush
    /// queued broadcasts, ask for headers and offer it download work.
    pub(crate) async fn on_peer_handshake(&mut self, peer: PeerId) -> SyncResult<()> {
        tracing::info!("peer {peer} completed handshake");
        if let Some(filter) = self.bloom.clone() {
            self.send(peer, Message::FilterLoad(filter)).await;
        }

        let pending: Vec<Transaction> = self.pending_tx_broadcast.drain(..).collect();
        for tx in pending {
            tracing::debug!("flushing queued transaction {} to {peer}", tx.compute_txid());
            self.send(peer, Message::Tx(tx)).await;
        }

        // Always ask, regardless of the current sync peer: a faster peer
        // may supplant it.
        let locator = self.store.block_locator().await?;
        let request = self.get_headers_message(locator, BlockHash::all_zeros());
        self.send(peer, request).await;

        self.download_blocks(peer).await
    }

    /// Process a `Headers` batch from a peer.
    pub(crate) async fn handle_headers(
        &mut self,
        peer: PeerId,
        headers: Vec<Header>,
    ) -> SyncResult<()> {
        if headers.is_empty() {
            tracing::debug!("empty headers message from {peer}");
            return Ok(());
        }
        tracing::debug!("processing {} headers from {peer}", headers.len());

        let best_before = self.store.get_best_block_header().await?;
        let adjusted_time = unix_time();

        let mut accepted: Vec<HeaderNode> = Vec::new();
        for header in headers {
            match self.store.connect_block_header(header, adjusted_time).await? {
                HeaderInsertion::Accepted(node) => accepted.push(node),
                HeaderInsertion::Exists(node) => {
                    tracing::trace!("duplicate header {}", node.hash);
                }
                HeaderInsertion::Rejected(reason) => {
                    self.stats.headers_rejected += 1;
                    tracing::warn!("header from {peer} rejected: {reason}");
                }
            }
        }
        self.stats.headers_accepted += accepted.len() as u64;

        // Headers older than the catchup horizon never get merkle blocks;
        // the rest are queued for download.
        let (header_only, downloadable): (Vec<HeaderNode>, Vec<HeaderNode>) = accepted
            .iter()
            .copied()
            .partition(|node| node.header.time < self.fast_catchup);

        if let Some(last) = header_only.last() {
            let current = self.store.get_block_header_node(&self.best_block_hash).await?;
            let advance = match current {
                Some(node) => last.chain_work > node.chain_work,
                None => true,
            };
            if advance {
                tracing::debug!(
                    "fast catchup advanced best block to {} at height {}",
                    last.hash,
                    last.height
                );
                self.best_block_hash = last.hash;
            }
        }

        for node in &downloadable {
            self.enqueue_block(node.height, node.hash);
        }

        // Newly linked headers resolve earlier inv announcements: raise the
        // announcing peer's height retroactively.
        let mut raises: Vec<(PeerId, u32)> = Vec::new();
        for node in &accepted {
            for (peer_id, state) in self.peer_states.iter_mut() {
                if let Some(pos) = state.broadcast_blocks.iter().position(|h| *h == node.hash) {
                    state.broadcast_blocks.remove(pos);
                    raises.push((*peer_id, node.height));
                }
            }
        }
        for (peer_id, height) in raises {
            self.peers.increase_peer_height(peer_id, height).await;
        }

        let best_after = self.store.get_best_block_header().await?;
        if best_after.chain_work > best_before.chain_work {
            self.peers.increase_peer_height(peer, best_after.height).await;
            if self.headers_synced().await? {
                self.sync_peer = None;
            } else {
                self.sync_peer = Some(peer);
            }
            let follow_up = self.get_headers_message(vec![best_after.hash], BlockHash::all_zeros());
            self.send(peer, follow_up).await;
        }

        for peer in self.peers.get_peer_keys().await {
            self.download_blocks(peer).await?;
        }
        Ok(())
    }

    pub(crate) fn get_headers_message(
        &self,
        locator_hashes: Vec<BlockHash>,
        stop_hash: BlockHash,
    ) -> Message {
        Message::GetHeaders(GetHeadersMessage {
            version: self.config.protocol_version,
            locator_hashes,
            stop_hash,
        })
    }
}
