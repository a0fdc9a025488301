//! Common type definitions for the SPV session.

use serde::{Deserialize, Serialize};

/// Unique identifier for a peer connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerId(pub u64);

impl std::fmt::Display for PeerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "peer_{}", self.0)
    }
}

/// Per-peer data maintained by the peer manager.
///
/// The session reads this to decide whether a peer qualifies for download
/// assignment and how high its advertised chain reaches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerData {
    /// Protocol version negotiated during the handshake.
    pub version: u32,

    /// User agent reported in the version message.
    pub user_agent: String,

    /// Best block height the peer has advertised so far.
    pub best_height: u32,

    /// Whether the version/verack exchange has completed.
    pub handshake_complete: bool,
}

impl PeerData {
    /// Peer data for a freshly handshaken peer.
    pub fn new(version: u32, user_agent: impl Into<String>, best_height: u32) -> Self {
        Self {
            version,
            user_agent: user_agent.into(),
            best_height,
            handshake_complete: true,
        }
    }
}

/// Counters describing session progress, queryable at any point.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncStats {
    /// Headers accepted into the chain store.
    pub headers_accepted: u64,

    /// Headers the store rejected.
    pub headers_rejected: u64,

    /// Merkle blocks delivered to the wallet in chain order.
    pub merkle_blocks_imported: u64,

    /// Transactions delivered to the wallet.
    pub transactions_imported: u64,

    /// Reorgs observed while connecting merkle blocks.
    pub reorgs: u64,

    /// Merkle block requests requeued after a stall.
    pub stalled_merkles_requeued: u64,

    /// Transaction requests re-issued after a stall.
    pub stalled_txs_reissued: u64,
}
