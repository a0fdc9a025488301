//! The SPV session state machine.
//!
//! A single [`SpvSession`] coordinates header synchronization, bloom-filtered
//! merkle block download across peers, and ordered delivery of confirmed
//! data to the wallet. All mutation happens inside the request dispatcher;
//! peer I/O and the heartbeat timer only post [`NodeRequest`]s.
//!
//! Handler implementations are split by concern:
//! - [`headers`]: sync-peer selection and `Headers` processing
//! - [`download`]: download scheduling, inflight tracking, stall recovery
//! - [`merkle`]: merkle block ingestion and in-order wallet delivery
//! - [`rescan`]: rescans serialized against pending downloads

mod download;
mod headers;
mod merkle;
mod rescan;
mod session;

pub use session::SpvSession;

use bitcoin::p2p::message_bloom::FilterLoad;
use bitcoin::Transaction;

use crate::network::{FilteredBlock, PeerMessage};
use crate::types::PeerId;

/// A unit of work for the session dispatcher.
///
/// Wallet requests, peer lifecycle events, inbound peer messages and the
/// heartbeat all travel through the same bounded channel, so handlers run
/// strictly one at a time.
#[derive(Debug, Clone)]
pub enum NodeRequest {
    /// Install a new bloom filter and push it to every peer.
    UpdateBloomFilter(FilterLoad),

    /// Broadcast a wallet transaction.
    PublishTransaction(Transaction),

    /// Rewind and re-download merkle blocks from the given timestamp.
    Rescan(u32),

    /// Periodic stall check.
    Heartbeat,

    /// A peer completed its version handshake.
    PeerHandshake(PeerId),

    /// A peer went away.
    PeerDisconnect(PeerId),

    /// A decoded inbound message from a peer.
    PeerMessage(PeerId, PeerMessage),

    /// A decoded merkle block with its accompanying transactions.
    PeerMerkleBlock(PeerId, FilteredBlock),
}
