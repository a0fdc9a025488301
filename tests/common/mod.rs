//! Shared helpers for session integration tests: a recording peer manager,
//! a recording wallet, and deterministic chain builders.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashSet};

use async_trait::async_trait;
use bitcoin::absolute;
use bitcoin::block::{Header, Version};
use bitcoin::merkle_tree::PartialMerkleTree;
use bitcoin::p2p::message_bloom::{BloomFlags, FilterLoad};
use bitcoin::transaction;
use bitcoin::{Amount, BlockHash, CompactTarget, Network, ScriptBuf, Transaction, TxOut, Txid};

use bitcoin_spv::error::NetworkResult;
use bitcoin_spv::{
    ChainAction, ClientConfig, FilteredBlock, HeaderStore, Message, MemoryHeaderStore, PeerData,
    PeerId, PeerManager, SpvSession, WalletSink,
};

pub type Session = SpvSession<MemoryHeaderStore, MockPeerManager, MockWallet>;

/// Peer manager double: a table of peers plus a log of every sent message.
#[derive(Debug, Default)]
pub struct MockPeerManager {
    peers: BTreeMap<PeerId, PeerData>,
    pub sent: Vec<(PeerId, Message)>,
}

impl MockPeerManager {
    pub fn add_peer(&mut self, peer: PeerId, best_height: u32) {
        self.peers.insert(peer, PeerData::new(70015, "/test:0.1/", best_height));
    }

    pub fn remove_peer(&mut self, peer: PeerId) {
        self.peers.remove(&peer);
    }

    pub fn peer_height(&self, peer: PeerId) -> Option<u32> {
        self.peers.get(&peer).map(|data| data.best_height)
    }

    pub fn take_sent(&mut self) -> Vec<(PeerId, Message)> {
        std::mem::take(&mut self.sent)
    }

    /// Messages sent to one peer.
    pub fn sent_to(&self, peer: PeerId) -> Vec<Message> {
        self.sent
            .iter()
            .filter(|(p, _)| *p == peer)
            .map(|(_, m)| m.clone())
            .collect()
    }
}

#[async_trait]
impl PeerManager for MockPeerManager {
    async fn send_message(&mut self, peer: PeerId, message: Message) -> NetworkResult<()> {
        self.sent.push((peer, message));
        Ok(())
    }

    async fn get_peers(&self) -> Vec<(PeerId, PeerData)> {
        self.peers.iter().map(|(p, d)| (*p, d.clone())).collect()
    }

    async fn get_peer_keys(&self) -> Vec<PeerId> {
        self.peers.keys().copied().collect()
    }

    async fn get_peer_data(&self, peer: PeerId) -> Option<PeerData> {
        self.peers.get(&peer).cloned()
    }

    async fn increase_peer_height(&mut self, peer: PeerId, height: u32) {
        if let Some(data) = self.peers.get_mut(&peer) {
            data.best_height = data.best_height.max(height);
        }
    }

    async fn get_best_peer_height(&self) -> Option<u32> {
        self.peers
            .values()
            .filter(|data| data.handshake_complete)
            .map(|data| data.best_height)
            .max()
    }
}

/// What the session delivered to the wallet, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WalletEvent {
    Transactions(Vec<Txid>),
    MerkleBlock {
        hash: BlockHash,
        height: u32,
        matched: Vec<Txid>,
    },
    RescanCleanup,
}

/// Wallet double: records every import and answers membership queries from
/// what it has seen.
#[derive(Debug, Default)]
pub struct MockWallet {
    pub want_all: bool,
    pub wanted: HashSet<Txid>,
    pub merkle_hashes: HashSet<BlockHash>,
    pub events: Vec<WalletEvent>,
}

impl MockWallet {
    /// Heights of merkle block imports, in delivery order.
    pub fn merkle_heights(&self) -> Vec<u32> {
        self.events
            .iter()
            .filter_map(|event| match event {
                WalletEvent::MerkleBlock { height, .. } => Some(*height),
                _ => None,
            })
            .collect()
    }

    /// All imported txids, flattened in delivery order.
    pub fn imported_txids(&self) -> Vec<Txid> {
        self.events
            .iter()
            .filter_map(|event| match event {
                WalletEvent::Transactions(txids) => Some(txids.clone()),
                _ => None,
            })
            .flatten()
            .collect()
    }
}

#[async_trait]
impl WalletSink for MockWallet {
    async fn want_tx_hash(&self, txid: Txid) -> bool {
        self.want_all || self.wanted.contains(&txid)
    }

    async fn have_merkle_hash(&self, hash: BlockHash) -> bool {
        self.merkle_hashes.contains(&hash)
    }

    async fn import_transactions(&mut self, txs: Vec<Transaction>) {
        self.events.push(WalletEvent::Transactions(
            txs.iter().map(|tx| tx.compute_txid()).collect(),
        ));
    }

    async fn import_merkle_block(&mut self, action: ChainAction, matched: Vec<Txid>) {
        let node = action.node();
        self.merkle_hashes.insert(node.hash);
        self.events.push(WalletEvent::MerkleBlock {
            hash: node.hash,
            height: node.height,
            matched,
        });
    }

    async fn rescan_cleanup(&mut self) {
        self.merkle_hashes.clear();
        self.events.push(WalletEvent::RescanCleanup);
    }
}

/// A block prepared for tests: its header, the filtered form a peer would
/// deliver, and the txids its merkle proof matches.
#[derive(Debug, Clone)]
pub struct TestBlock {
    pub header: Header,
    pub block: FilteredBlock,
    pub matched: Vec<Txid>,
}

impl TestBlock {
    pub fn hash(&self) -> BlockHash {
        self.header.block_hash()
    }

    /// The filtered block without its carried transactions, as delivered by
    /// a peer that sends the transactions separately.
    pub fn without_transactions(&self) -> FilteredBlock {
        FilteredBlock {
            transactions: Vec::new(),
            ..self.block.clone()
        }
    }
}

/// A minimal distinct transaction.
pub fn dummy_tx(seed: u64) -> Transaction {
    Transaction {
        version: transaction::Version::ONE,
        lock_time: absolute::LockTime::ZERO,
        input: vec![],
        output: vec![TxOut {
            value: Amount::from_sat(seed),
            script_pubkey: ScriptBuf::new(),
        }],
    }
}

/// Build a linked chain of filtered blocks on top of `prev`.
///
/// A block with an empty transaction set gets a non-matching filler
/// transaction so its merkle tree is well formed; blocks with transactions
/// match (and carry) all of them.
pub fn build_blocks(prev: BlockHash, times: &[u32], tx_sets: Vec<Vec<Transaction>>) -> Vec<TestBlock> {
    assert_eq!(times.len(), tx_sets.len());
    let mut prev = prev;
    let mut out = Vec::new();
    for (i, (time, txs)) in times.iter().zip(tx_sets).enumerate() {
        let (txids, flags, carried): (Vec<Txid>, Vec<bool>, Vec<Transaction>) = if txs.is_empty() {
            let filler = dummy_tx(1_000_000 + i as u64);
            (vec![filler.compute_txid()], vec![false], Vec::new())
        } else {
            let txids = txs.iter().map(|tx| tx.compute_txid()).collect();
            let flags = vec![true; txs.len()];
            (txids, flags, txs)
        };

        let tree = PartialMerkleTree::from_txids(&txids, &flags);
        let mut matched = Vec::new();
        let mut indexes = Vec::new();
        let root = tree.extract_matches(&mut matched, &mut indexes).unwrap();

        let header = Header {
            version: Version::ONE,
            prev_blockhash: prev,
            merkle_root: root,
            time: *time,
            bits: CompactTarget::from_consensus(0x207fffff),
            nonce: 0,
        };
        prev = header.block_hash();
        out.push(TestBlock {
            header,
            block: FilteredBlock {
                header,
                tree,
                transactions: carried,
            },
            matched,
        });
    }
    out
}

/// Build an empty-block chain of `n` blocks starting at `base` with
/// timestamps `step` apart.
pub fn build_empty_chain(prev: BlockHash, base: u32, step: u32, n: usize) -> Vec<TestBlock> {
    let times: Vec<u32> = (0..n as u32).map(|i| base + i * step).collect();
    build_blocks(prev, &times, vec![Vec::new(); n])
}

pub fn headers_of(blocks: &[TestBlock]) -> Vec<Header> {
    blocks.iter().map(|b| b.header).collect()
}

/// A bloom filter that matches (nearly) everything.
pub fn test_filter() -> FilterLoad {
    FilterLoad {
        filter: vec![0xff; 8],
        hash_funcs: 11,
        tweak: 0,
        flags: BloomFlags::All,
    }
}

/// Plausible block timestamps comfortably in the past.
pub const TIME_BASE: u32 = 1_600_000_000;

/// A started session over a regtest chain with recording collaborators.
pub async fn new_session(config: ClientConfig) -> Session {
    let store = MemoryHeaderStore::new(Network::Regtest);
    let best = store.genesis_hash();
    let mut session = SpvSession::new(
        config,
        store,
        MockPeerManager::default(),
        MockWallet::default(),
        best,
    );
    session.start().await.expect("session start");
    session
}
