//! Rescans, serialized against pending downloads.
//!
//! A rescan rewinds the wallet's best block to the anchor before a
//! timestamp and re-downloads everything above it. It must not interleave
//! with inflight merkle blocks: results for the old range would corrupt the
//! rebuilt queue, so the rescan is deferred until the inflight set drains,
//! and arrivals in the meantime are discarded.

use crate::chain::HeaderStore;
use crate::error::SyncResult;
use crate::network::PeerManager;
use crate::wallet::WalletSink;

use super::session::SpvSession;

impl<H, P, W> SpvSession<H, P, W>
where
    H: HeaderStore,
    P: PeerManager,
    W: WalletSink,
{
    /// Start a rescan from `ts`, deferring while merkle blocks are inflight.
    pub(crate) async fn process_rescan(&mut self, ts: u32) -> SyncResult<()> {
        if self.any_inflight_merkles() {
            tracing::info!("rescan from {ts} deferred until inflight merkle blocks drain");
            self.pending_rescan = Some(ts);
            return Ok(());
        }
        self.execute_rescan(ts).await
    }

    /// Run the deferred rescan once the last inflight merkle is gone.
    pub(crate) async fn complete_pending_rescan(&mut self) -> SyncResult<()> {
        let Some(ts) = self.pending_rescan else {
            return Ok(());
        };
        if self.any_inflight_merkles() {
            return Ok(());
        }
        self.execute_rescan(ts).await
    }

    async fn execute_rescan(&mut self, ts: u32) -> SyncResult<()> {
        self.wallet.rescan_cleanup().await;

        let anchor = self.store.block_before_timestamp(ts).await?;
        tracing::info!(
            "rescanning from {ts}: anchor {} at height {}",
            anchor.hash,
            anchor.height
        );

        self.fast_catchup = ts;
        self.best_block_hash = anchor.hash;
        self.received_merkle.clear();
        self.pending_rescan = None;

        self.blocks_to_download.clear();
        for (height, hash) in self.store.blocks_to_download(&anchor.hash).await? {
            self.enqueue_block(height, hash);
        }

        for peer in self.peers.get_peer_keys().await {
            self.download_blocks(peer).await?;
        }
        Ok(())
    }
}
