//! Wallet interface invoked by the SPV session.

use async_trait::async_trait;
use bitcoin::{BlockHash, Transaction, Txid};

use crate::chain::ChainAction;

/// The wallet attached to the session.
///
/// The session pushes confirmed data into the wallet strictly in chain
/// order: a merkle block is only delivered once its parent is known to the
/// wallet (or predates the fast-catchup horizon). Transactions that belong
/// to a merkle block are always imported before the block action itself.
#[async_trait]
pub trait WalletSink: Send + Sync {
    /// Whether the wallet is interested in a transaction announced by a peer.
    async fn want_tx_hash(&self, txid: Txid) -> bool;

    /// Whether the wallet has already seen this merkle block.
    async fn have_merkle_hash(&self, hash: BlockHash) -> bool;

    /// Import a batch of transactions.
    async fn import_transactions(&mut self, txs: Vec<Transaction>);

    /// Import a merkle block action together with the txids the block's
    /// partial merkle tree proved inclusion for.
    async fn import_merkle_block(&mut self, action: ChainAction, matched: Vec<Txid>);

    /// Reset wallet-side confirmation state ahead of a rescan.
    async fn rescan_cleanup(&mut self);
}
