//! Bitcoin SPV session library.
//!
//! This crate implements the coordination core of a Simplified Payment
//! Verification node:
//!
//! - Block header synchronization with sync-peer selection
//! - Bloom-filtered merkle block download across multiple peers
//! - Inflight request tracking with stall recovery
//! - Re-ordering of merkle blocks into chain order before wallet delivery
//! - Solo-transaction buffering until the chain catches up
//! - Rescans serialized against pending downloads
//!
//! The session never stores full blocks. It maintains a header chain with
//! cumulative work (behind the [`HeaderStore`] trait) and streams filtered
//! transactions selected by per-peer bloom filters to a [`WalletSink`].
//! Peer I/O lives behind [`PeerManager`]; the session emits abstract
//! messages and receives decoded inbound traffic.
//!
//! # Quick Start
//!
//! ```no_run
//! use bitcoin_spv::{ClientConfig, HeaderStore, MemoryHeaderStore, SpvNode};
//! use tokio_util::sync::CancellationToken;
//!
//! # use async_trait::async_trait;
//! # use bitcoin_spv::{ChainAction, Message, PeerData, PeerId, PeerManager, WalletSink};
//! # use bitcoin_spv::error::NetworkResult;
//! # struct MyPeers;
//! # #[async_trait]
//! # impl PeerManager for MyPeers {
//! #     async fn send_message(&mut self, _: PeerId, _: Message) -> NetworkResult<()> { Ok(()) }
//! #     async fn get_peers(&self) -> Vec<(PeerId, PeerData)> { Vec::new() }
//! #     async fn get_peer_keys(&self) -> Vec<PeerId> { Vec::new() }
//! #     async fn get_peer_data(&self, _: PeerId) -> Option<PeerData> { None }
//! #     async fn increase_peer_height(&mut self, _: PeerId, _: u32) {}
//! #     async fn get_best_peer_height(&self) -> Option<u32> { None }
//! # }
//! # struct MyWallet;
//! # #[async_trait]
//! # impl WalletSink for MyWallet {
//! #     async fn want_tx_hash(&self, _: bitcoin::Txid) -> bool { false }
//! #     async fn have_merkle_hash(&self, _: bitcoin::BlockHash) -> bool { false }
//! #     async fn import_transactions(&mut self, _: Vec<bitcoin::Transaction>) {}
//! #     async fn import_merkle_block(&mut self, _: ChainAction, _: Vec<bitcoin::Txid>) {}
//! #     async fn rescan_cleanup(&mut self) {}
//! # }
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ClientConfig::mainnet().with_fast_catchup(1_700_000_000);
//!     let store = MemoryHeaderStore::new(config.network);
//!     let best = store.genesis_hash();
//!
//!     let (mut node, handle) = SpvNode::new(config, store, MyPeers, MyWallet, best);
//!     node.start().await?;
//!
//!     let shutdown = CancellationToken::new();
//!     // Hand `handle` to the wallet and peer manager, then:
//!     node.run(shutdown).await?;
//!     # drop(handle);
//!     Ok(())
//! }
//! ```

pub mod chain;
pub mod client;
pub mod error;
pub mod logging;
pub mod network;
pub mod sync;
pub mod types;
pub mod wallet;

// Re-export main types for convenience.
pub use chain::{ChainAction, HeaderInsertion, HeaderNode, HeaderStore, MemoryHeaderStore};
pub use client::{ClientConfig, SpvNode, SpvNodeHandle};
pub use error::{NetworkError, Result, SpvError, StorageError, SyncError};
pub use logging::init_console_logging;
pub use network::{
    filter_is_empty, FilteredBlock, Inventory, Message, PeerManager, PeerMessage,
};
pub use sync::{NodeRequest, SpvSession};
pub use tracing::level_filters::LevelFilter;
pub use types::{PeerData, PeerId, SyncStats};
pub use wallet::WalletSink;

// Re-export commonly used bitcoin types.
pub use bitcoin::{BlockHash, Network, Transaction, Txid};

/// Current version of the library.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
