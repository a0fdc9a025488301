//! The transaction/merkle-block delivery interlock.
//!
//! A transaction announced via `Inv` and requested with `GetData` may be
//! confirmed by a merkle block that arrives while the transaction is still
//! inflight. The block must wait for the transaction, and the transaction
//! must reach the wallet before the block action does.

mod common;

use common::*;

use bitcoin_spv::{ClientConfig, Inventory, Message, NodeRequest, PeerId, PeerMessage};

#[tokio::test]
async fn merkle_block_waits_for_inflight_transaction() {
    let mut session = new_session(ClientConfig::regtest()).await;
    let p1 = PeerId(1);
    session.peer_manager_mut().add_peer(p1, 1);
    session.wallet_mut().want_all = true;
    session
        .handle_request(NodeRequest::UpdateBloomFilter(test_filter()))
        .await;

    let tx = dummy_tx(42);
    let txid = tx.compute_txid();
    let blocks = build_blocks(session.best_block_hash(), &[TIME_BASE], vec![vec![tx.clone()]]);

    session
        .handle_request(NodeRequest::PeerMessage(
            p1,
            PeerMessage::Headers(headers_of(&blocks)),
        ))
        .await;
    assert_eq!(session.inflight_merkle_count(p1), 1);

    // The peer announces the transaction; the session requests it.
    session
        .handle_request(NodeRequest::PeerMessage(
            p1,
            PeerMessage::Inv(vec![Inventory::Transaction(txid)]),
        ))
        .await;
    assert_eq!(session.inflight_tx_count(p1), 1);
    assert!(session.peer_manager().sent_to(p1).iter().any(|m| matches!(
        m,
        Message::GetData(inv) if inv.contains(&Inventory::Transaction(txid))
    )));

    // The merkle block confirming the transaction arrives first, without
    // carrying it. Nothing may reach the wallet yet.
    session
        .handle_request(NodeRequest::PeerMerkleBlock(
            p1,
            blocks[0].without_transactions(),
        ))
        .await;
    assert!(session.wallet().events.is_empty());
    assert_eq!(session.buffered_merkle_count(), 1);

    // The transaction lands: first the transaction import, then the block.
    session
        .handle_request(NodeRequest::PeerMessage(p1, PeerMessage::Tx(tx)))
        .await;

    let events = &session.wallet().events;
    assert_eq!(events.len(), 2);
    assert_eq!(events[0], WalletEvent::Transactions(vec![txid]));
    assert!(matches!(
        &events[1],
        WalletEvent::MerkleBlock { height: 1, matched, .. } if matched == &vec![txid]
    ));
    assert_eq!(session.solo_tx_count(), 0);
    assert_eq!(session.inflight_tx_count(p1), 0);
    assert_eq!(session.buffered_merkle_count(), 0);
}

#[tokio::test]
async fn solo_transaction_is_folded_into_its_merkle_block() {
    let mut session = new_session(ClientConfig::regtest()).await;
    let p1 = PeerId(1);
    session.peer_manager_mut().add_peer(p1, 1);
    session
        .handle_request(NodeRequest::UpdateBloomFilter(test_filter()))
        .await;

    let tx = dummy_tx(7);
    let txid = tx.compute_txid();
    let blocks = build_blocks(session.best_block_hash(), &[TIME_BASE], vec![vec![tx.clone()]]);
    session
        .handle_request(NodeRequest::PeerMessage(
            p1,
            PeerMessage::Headers(headers_of(&blocks)),
        ))
        .await;

    // The unsolicited transaction arrives before its block and is held.
    session
        .handle_request(NodeRequest::PeerMessage(p1, PeerMessage::Tx(tx.clone())))
        .await;
    assert_eq!(session.solo_tx_count(), 1);
    assert!(session.wallet().events.is_empty());

    // Held transactions are unique by txid.
    session
        .handle_request(NodeRequest::PeerMessage(p1, PeerMessage::Tx(tx)))
        .await;
    assert_eq!(session.solo_tx_count(), 1);

    session
        .handle_request(NodeRequest::PeerMerkleBlock(
            p1,
            blocks[0].without_transactions(),
        ))
        .await;

    let events = &session.wallet().events;
    assert_eq!(events[0], WalletEvent::Transactions(vec![txid]));
    assert!(matches!(&events[1], WalletEvent::MerkleBlock { height: 1, .. }));
    assert_eq!(session.solo_tx_count(), 0);
}

#[tokio::test]
async fn unsolicited_merkle_blocks_are_ignored() {
    let mut session = new_session(ClientConfig::regtest()).await;
    let p1 = PeerId(1);
    session.peer_manager_mut().add_peer(p1, 1);
    session
        .handle_request(NodeRequest::UpdateBloomFilter(test_filter()))
        .await;

    // A merkle block whose header the chain has never seen.
    let stray = build_empty_chain(session.best_block_hash(), TIME_BASE, 10, 1);
    session
        .handle_request(NodeRequest::PeerMerkleBlock(p1, stray[0].block.clone()))
        .await;

    assert_eq!(session.buffered_merkle_count(), 0);
    assert!(session.wallet().events.is_empty());
}
