use crate::chain::double_sha256;
use crate::mempool::{InvalidTxEvent, InvalidTxHandler, MempoolChecker, MempoolCheckerSettings};
use crate::notify::testutil::RecordingSink;
use crate::notify::{NotificationSink, NotificationType};
use crate::rpc::types::CollidedWith;
use crate::store::{NewTx, TxInputRecord, TxStatus, TxStore, TxUpsert, UpsertMode};
use crate::submit::SubmitSettings;
use crate::sync::{BlockSynchronizer, SyncSettings};
use crate::tests::support::*;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::SystemTime;

fn accepted_row(external_id: crate::chain::Txid, payload: Vec<u8>, ds_check: bool) -> NewTx {
    NewTx {
        external_id,
        payload,
        merkle_proof: false,
        merkle_format: None,
        ds_check,
        callback_url: Some("https://example.com/cb".into()),
        callback_token: None,
        callback_encryption: None,
        identity: None,
        status: TxStatus::Accepted,
        policy_quote_id: Some(1),
        policies: None,
        ok_to_mine: false,
        inputs: vec![],
        received_at: SystemTime::now(),
        submitted_at: None,
    }
}

async fn insert_rows(store: &dyn TxStore, rows: Vec<NewTx>) {
    store
        .insert_or_update_txs(
            rows.into_iter()
                .map(|tx| TxUpsert {
                    tx,
                    mode: UpsertMode::Insert,
                })
                .collect(),
            false,
        )
        .await
        .unwrap();
}

#[tokio::test]
async fn resubmits_parent_and_child_in_one_ordered_batch() {
    let node = MockNode::new("a");
    let fixture = engine_over(&[node.clone()], SubmitSettings::default());

    let prev = double_sha256(b"utxo");
    let (parent_raw, parent_txid, parent_hex) = raw_tx(&[(prev, 0)], &[(40_000, p2pkh_script())]);
    let (child_raw, child_txid, child_hex) =
        raw_tx(&[(parent_txid, 0)], &[(30_000, p2pkh_script())]);

    // parent was stored before the child, both lost from the mempool
    insert_rows(
        fixture.store.as_ref(),
        vec![
            accepted_row(parent_txid, parent_raw, false),
            accepted_row(child_txid, child_raw, false),
        ],
    )
    .await;

    let (success, missing) = fixture
        .engine
        .resubmit_missing_transactions(&HashSet::new(), SystemTime::now())
        .await
        .unwrap();

    assert!(success);
    assert!(missing.is_empty());
    // one batch, parent before child
    assert_eq!(node.sent_txids(), vec![vec![parent_hex, child_hex]]);
}

#[tokio::test]
async fn transactions_present_in_mempool_are_left_alone() {
    let node = MockNode::new("a");
    let fixture = engine_over(&[node.clone()], SubmitSettings::default());

    let (raw, txid, txid_hex) =
        raw_tx(&[(double_sha256(b"utxo"), 0)], &[(9_000, p2pkh_script())]);
    insert_rows(fixture.store.as_ref(), vec![accepted_row(txid, raw, false)]).await;

    let mempool: HashSet<String> = [txid_hex].into_iter().collect();
    let (success, missing) = fixture
        .engine
        .resubmit_missing_transactions(&mempool, SystemTime::now())
        .await
        .unwrap();

    assert!(success);
    assert!(missing.is_empty());
    assert!(node.sent_txids().is_empty());
}

fn checker_over(
    node: &Arc<MockNode>,
    fixture: &EngineFixture,
    missing_inputs_retries: u32,
) -> (MempoolChecker, Arc<BlockSynchronizer>) {
    let sink = Arc::new(RecordingSink::default()) as Arc<dyn NotificationSink>;
    let synchronizer = Arc::new(BlockSynchronizer::new(
        multi_over(&[node.clone()]),
        fixture.store.clone(),
        sink,
        SyncSettings::default(),
    ));
    let checker = MempoolChecker::new(
        fixture.multi.clone(),
        fixture.engine.clone(),
        fixture.store.clone(),
        synchronizer.clone(),
        MempoolCheckerSettings {
            missing_inputs_retries,
            ..Default::default()
        },
    );
    (checker, synchronizer)
}

#[tokio::test]
async fn missing_inputs_exhaust_into_a_terminal_state() {
    let node = MockNode::new("a");
    let fixture = engine_over(&[node.clone()], SubmitSettings::default());

    let (raw, txid, txid_hex) =
        raw_tx(&[(double_sha256(b"spent"), 0)], &[(9_000, p2pkh_script())]);
    insert_rows(fixture.store.as_ref(), vec![accepted_row(txid, raw, false)]).await;
    node.script
        .lock()
        .reject
        .insert(txid_hex, (Some(16), Some("missing-inputs".into())));

    let (checker, _synchronizer) = checker_over(&node, &fixture, 1);
    let success = checker.check_and_resubmit().await.unwrap();

    // missing-input quarantine is not a cycle failure
    assert!(success);
    assert_eq!(
        fixture.store.tx_status(&txid).await.unwrap(),
        TxStatus::MissingInputsExhausted
    );
    // the exhausted transaction left the retry ledger
    assert_eq!(checker.retry_count(1), None);

    // terminal rows are excluded from further resubmission rounds
    let sends_before = node.sent_txids().len();
    checker.check_and_resubmit().await.unwrap();
    assert_eq!(node.sent_txids().len(), sends_before);
}

#[tokio::test]
async fn missing_inputs_below_the_budget_stay_in_the_ledger() {
    let node = MockNode::new("a");
    let fixture = engine_over(&[node.clone()], SubmitSettings::default());

    let (raw, txid, txid_hex) =
        raw_tx(&[(double_sha256(b"spent"), 0)], &[(9_000, p2pkh_script())]);
    insert_rows(fixture.store.as_ref(), vec![accepted_row(txid, raw, false)]).await;
    node.script
        .lock()
        .reject
        .insert(txid_hex, (Some(16), Some("missing-inputs".into())));

    let (checker, _synchronizer) = checker_over(&node, &fixture, 3);
    checker.check_and_resubmit().await.unwrap();

    assert_eq!(
        fixture.store.tx_status(&txid).await.unwrap(),
        TxStatus::Accepted
    );
    assert_eq!(checker.retry_count(1), Some(1));
}

#[tokio::test]
async fn resubmit_is_skipped_while_block_parser_is_behind() {
    let node = MockNode::new("a");
    let fixture = engine_over(&[node.clone()], SubmitSettings::default());

    // an unparsed block in the store counts against the queue limit
    fixture
        .store
        .insert_block(crate::store::NewBlock {
            hash: double_sha256(b"unparsed"),
            height: 1,
            prev_hash: double_sha256(b"p"),
            time: 0,
        })
        .await
        .unwrap();

    let sink = Arc::new(RecordingSink::default()) as Arc<dyn NotificationSink>;
    let synchronizer = Arc::new(BlockSynchronizer::new(
        multi_over(&[node.clone()]),
        fixture.store.clone(),
        sink,
        SyncSettings::default(),
    ));
    let checker = MempoolChecker::new(
        fixture.multi.clone(),
        fixture.engine.clone(),
        fixture.store.clone(),
        synchronizer,
        MempoolCheckerSettings {
            block_parser_queued_max: 0,
            ..Default::default()
        },
    );

    let success = checker.check_and_resubmit().await.unwrap();
    assert!(!success);
    assert!(node.sent_txids().is_empty());
}

#[tokio::test]
async fn mempool_conflict_produces_one_double_spend_attempt() {
    let node = MockNode::new("a");
    let fixture = engine_over(&[node.clone()], SubmitSettings::default());
    let sink = Arc::new(RecordingSink::default());
    let handler = InvalidTxHandler::new(
        fixture.store.clone(),
        sink.clone() as Arc<dyn NotificationSink>,
    );

    let (victim_raw, victim_txid, victim_hex) =
        raw_tx(&[(double_sha256(b"contested"), 0)], &[(9_000, p2pkh_script())]);
    insert_rows(
        fixture.store.as_ref(),
        vec![accepted_row(victim_txid, victim_raw, true)],
    )
    .await;

    let (attacker_raw, _, attacker_hex) =
        raw_tx(&[(double_sha256(b"contested"), 0)], &[(8_000, p2pkh_script())]);
    let event = InvalidTxEvent {
        txid: attacker_hex,
        reject_code: 258,
        hex: hex::encode(&attacker_raw),
        collided_with: vec![CollidedWith {
            txid: victim_hex,
            size: attacker_raw.len() as u64,
            hex: String::new(),
        }],
    };

    handler.handle(event.clone()).await.unwrap();
    let events = sink.events.lock().clone();
    assert_eq!(events.len(), 1);
    assert_eq!(
        events[0].notification_type,
        NotificationType::DoubleSpendAttempt
    );
    assert_eq!(events[0].tx_external_id, victim_txid);
    assert_eq!(events[0].payload.as_deref(), Some(attacker_raw.as_slice()));

    // a replayed signal does not notify again
    handler.handle(event).await.unwrap();
    assert_eq!(sink.events.lock().len(), 1);
}

#[tokio::test]
async fn unrelated_reject_codes_are_ignored() {
    let node = MockNode::new("a");
    let fixture = engine_over(&[node.clone()], SubmitSettings::default());
    let sink = Arc::new(RecordingSink::default());
    let handler = InvalidTxHandler::new(
        fixture.store.clone(),
        sink.clone() as Arc<dyn NotificationSink>,
    );

    let (victim_raw, victim_txid, victim_hex) =
        raw_tx(&[(double_sha256(b"contested"), 0)], &[(9_000, p2pkh_script())]);
    insert_rows(
        fixture.store.as_ref(),
        vec![accepted_row(victim_txid, victim_raw, true)],
    )
    .await;

    let event = InvalidTxEvent {
        txid: double_sha256(b"other").to_string(),
        reject_code: 16,
        hex: String::new(),
        collided_with: vec![CollidedWith {
            txid: victim_hex,
            size: 0,
            hex: String::new(),
        }],
    };
    handler.handle(event).await.unwrap();
    assert!(sink.events.lock().is_empty());
}

#[tokio::test]
async fn ancestor_rows_without_payload_are_not_resubmitted() {
    let node = MockNode::new("a");
    let fixture = engine_over(&[node.clone()], SubmitSettings::default());

    // ancestor rows carry no payload and must never become resubmission
    // candidates
    let ancestor = NewTx::ancestor(
        double_sha256(b"ancestor"),
        vec![TxInputRecord {
            n: 0,
            prev_txid: double_sha256(b"dep"),
            prev_n: 0,
        }],
        Some(1),
        SystemTime::now(),
    );
    insert_rows(fixture.store.as_ref(), vec![ancestor]).await;

    let (success, missing) = fixture
        .engine
        .resubmit_missing_transactions(&HashSet::new(), SystemTime::now())
        .await
        .unwrap();
    assert!(success);
    assert!(missing.is_empty());
    assert!(node.sent_txids().is_empty());
}
