use crate::chain::double_sha256;
use crate::store::{Identity, TxStatus, TxStore};
use crate::submit::{reject, SubmitSettings, SubmitTxRequest};
use crate::tests::support::*;
use crate::utils::errors::GatewayError;

fn request(raw: Vec<u8>) -> SubmitTxRequest {
    SubmitTxRequest {
        raw_tx: raw,
        ..Default::default()
    }
}

fn merchant() -> Identity {
    Identity {
        name: "merchant".into(),
        provider: "issuer".into(),
    }
}

/// Quote scoped to the merchant identity so authenticated tests have one.
fn add_merchant_quote(fixture: &EngineFixture) {
    let mut quote = quote_valid_now(2, 500, 250);
    quote.identity = Some(merchant());
    fixture.quotes.add(quote);
}

#[tokio::test]
async fn rejects_when_fees_too_low() {
    let node = MockNode::new("a");
    let fixture = engine_over(&[node.clone()], SubmitSettings::default());

    let prev = double_sha256(b"utxo");
    script_tx_out(&[node.clone()], (prev, 0), 10_000);
    // zero fee: outputs equal the spent value
    let (raw, _, _) = raw_tx(&[(prev, 0)], &[(10_000, p2pkh_script())]);

    let response = fixture
        .engine
        .submit_transactions(vec![request(raw)], None)
        .await
        .unwrap();
    assert_eq!(response.failure_count, 1);
    assert_eq!(
        response.txs[0].description.as_deref(),
        Some(reject::NOT_ENOUGH_FEES)
    );
    // nothing reached the node
    assert!(node.sent_txids().is_empty());
}

#[tokio::test]
async fn accepts_and_persists_with_sufficient_fee() {
    let node = MockNode::new("a");
    let fixture = engine_over(&[node.clone()], SubmitSettings::default());
    add_merchant_quote(&fixture);

    let prev = double_sha256(b"utxo");
    script_tx_out(&[node.clone()], (prev, 0), 10_000);
    let (raw, txid, txid_hex) = raw_tx(&[(prev, 0)], &[(9_000, p2pkh_script())]);

    let user = merchant();
    let response = fixture
        .engine
        .submit_transactions(vec![request(raw)], Some(&user))
        .await
        .unwrap();

    assert_eq!(response.failure_count, 0);
    assert!(response.txs[0].is_success());
    assert_eq!(response.txs[0].txid.as_deref(), Some(txid_hex.as_str()));
    assert_eq!(
        fixture.store.tx_status(&txid).await.unwrap(),
        TxStatus::Accepted
    );
    assert_eq!(node.sent_txids(), vec![vec![txid_hex]]);
}

#[tokio::test]
async fn chained_transactions_resolve_inputs_from_the_batch() {
    let node = MockNode::new("a");
    let fixture = engine_over(&[node.clone()], SubmitSettings::default());

    let prev = double_sha256(b"utxo");
    script_tx_out(&[node.clone()], (prev, 0), 50_000);
    let (parent_raw, parent_txid, _) = raw_tx(&[(prev, 0)], &[(40_000, p2pkh_script())]);
    // the child's input only exists inside this batch
    let (child_raw, _, _) = raw_tx(&[(parent_txid, 0)], &[(30_000, p2pkh_script())]);

    let response = fixture
        .engine
        .submit_transactions(vec![request(parent_raw), request(child_raw)], None)
        .await
        .unwrap();

    assert_eq!(response.failure_count, 0);
    assert!(response.txs.iter().all(|t| t.is_success()));
}

#[tokio::test]
async fn duplicate_ids_within_request_fail() {
    let node = MockNode::new("a");
    let fixture = engine_over(&[node.clone()], SubmitSettings::default());

    let prev = double_sha256(b"utxo");
    script_tx_out(&[node.clone()], (prev, 0), 10_000);
    let (raw, _, _) = raw_tx(&[(prev, 0)], &[(9_000, p2pkh_script())]);

    let response = fixture
        .engine
        .submit_transactions(vec![request(raw.clone()), request(raw)], None)
        .await
        .unwrap();

    assert_eq!(response.failure_count, 1);
    let failure = response.txs.iter().find(|t| !t.is_success()).unwrap();
    assert!(failure
        .description
        .as_deref()
        .unwrap()
        .contains("more than once"));
}

#[tokio::test]
async fn missing_inputs_fail_before_submission() {
    let node = MockNode::new("a");
    let fixture = engine_over(&[node.clone()], SubmitSettings::default());

    // nothing scripted: the node answers "missing" for the outpoint
    let (raw, _, _) = raw_tx(&[(double_sha256(b"gone"), 0)], &[(9_000, p2pkh_script())]);

    let response = fixture
        .engine
        .submit_transactions(vec![request(raw)], None)
        .await
        .unwrap();

    assert_eq!(response.failure_count, 1);
    assert_eq!(
        response.txs[0].description.as_deref(),
        Some(reject::MISSING_INPUTS)
    );
    assert!(node.sent_txids().is_empty());
}

#[tokio::test]
async fn consolidation_transaction_is_fee_exempt() {
    let node = MockNode::new("a");
    let fixture = engine_over(&[node.clone()], SubmitSettings::default());

    // 20 confirmed standard inputs, 1 output, zero fee
    let mut inputs = Vec::new();
    let mut total = 0i64;
    for n in 0..20u8 {
        let prev = double_sha256(&[b'u', n]);
        script_tx_out(&[node.clone()], (prev, 0), 10_000);
        inputs.push((prev, 0));
        total += 10_000;
    }
    let (raw, _, _) = raw_tx(&inputs, &[(total, p2pkh_script())]);

    let response = fixture
        .engine
        .submit_transactions(vec![request(raw)], None)
        .await
        .unwrap();

    assert_eq!(response.failure_count, 0);
    assert!(response.txs[0].is_success());
}

#[tokio::test]
async fn resubmission_with_different_parameters_conflicts() {
    let node = MockNode::new("a");
    let fixture = engine_over(&[node.clone()], SubmitSettings::default());
    add_merchant_quote(&fixture);

    let prev = double_sha256(b"utxo");
    script_tx_out(&[node.clone()], (prev, 0), 10_000);
    let (raw, _, _) = raw_tx(&[(prev, 0)], &[(9_000, p2pkh_script())]);

    let user = merchant();
    let first = fixture
        .engine
        .submit_transactions(vec![request(raw.clone())], Some(&user))
        .await
        .unwrap();
    assert_eq!(first.failure_count, 0);

    let mut changed = request(raw);
    changed.ds_check = true;
    changed.callback_url = Some("https://example.com/callback".into());
    let second = fixture
        .engine
        .submit_transactions(vec![changed], Some(&user))
        .await
        .unwrap();
    assert_eq!(second.failure_count, 1);
    assert!(second.txs[0]
        .description
        .as_deref()
        .unwrap()
        .contains("different parameters"));
}

#[tokio::test]
async fn known_transaction_short_circuits_without_resubmission() {
    let node = MockNode::new("a");
    let fixture = engine_over(&[node.clone()], SubmitSettings::default());
    add_merchant_quote(&fixture);

    let prev = double_sha256(b"utxo");
    script_tx_out(&[node.clone()], (prev, 0), 10_000);
    let (raw, _, txid_hex) = raw_tx(&[(prev, 0)], &[(9_000, p2pkh_script())]);

    let user = merchant();
    fixture
        .engine
        .submit_transactions(vec![request(raw.clone())], Some(&user))
        .await
        .unwrap();
    assert_eq!(node.sent_txids().len(), 1);

    let again = fixture
        .engine
        .submit_transactions(vec![request(raw)], Some(&user))
        .await
        .unwrap();
    assert_eq!(again.failure_count, 0);
    assert_eq!(again.txs[0].txid.as_deref(), Some(txid_hex.as_str()));
    assert_eq!(
        again.txs[0].description.as_deref(),
        Some(reject::RESULT_ALREADY_KNOWN)
    );
    // no second node call
    assert_eq!(node.sent_txids().len(), 1);
}

#[tokio::test]
async fn transport_failure_fails_the_batch_uniformly() {
    let node = MockNode::new("a");
    let fixture = engine_over(&[node.clone()], SubmitSettings::default());

    let prev = double_sha256(b"utxo");
    script_tx_out(&[node.clone()], (prev, 0), 10_000);
    let (raw, _, _) = raw_tx(&[(prev, 0)], &[(9_000, p2pkh_script())]);

    node.script.lock().fail_send = true;
    let err = fixture
        .engine
        .submit_transactions(vec![request(raw)], None)
        .await
        .unwrap_err();
    match err {
        GatewayError::TransientNode(message) => {
            // generic description only, no transport internals
            assert_eq!(message, "error while submitting transactions to the node");
        }
        other => panic!("unexpected error: {:?}", other),
    }
}

#[tokio::test]
async fn evicted_transactions_are_retryable_failures() {
    let node = MockNode::new("a");
    let fixture = engine_over(&[node.clone()], SubmitSettings::default());
    add_merchant_quote(&fixture);

    let prev = double_sha256(b"utxo");
    script_tx_out(&[node.clone()], (prev, 0), 10_000);
    let (raw, txid, txid_hex) = raw_tx(&[(prev, 0)], &[(9_000, p2pkh_script())]);
    node.script.lock().evict.insert(txid_hex);

    let user = merchant();
    let response = fixture
        .engine
        .submit_transactions(vec![request(raw)], Some(&user))
        .await
        .unwrap();

    assert_eq!(response.failure_count, 1);
    assert_eq!(
        response.txs[0].description.as_deref(),
        Some("Mempool error (evicted)")
    );
    // the SentToNode snapshot moved on to NodeRejected
    assert_eq!(
        fixture.store.tx_status(&txid).await.unwrap(),
        TxStatus::NodeRejected
    );
}

#[tokio::test]
async fn invalid_merkle_format_fails_validation() {
    let node = MockNode::new("a");
    let fixture = engine_over(&[node.clone()], SubmitSettings::default());

    let mut bad = request(vec![1, 2, 3]);
    bad.merkle_format = Some("BADFMT".into());
    let response = fixture
        .engine
        .submit_transactions(vec![bad], None)
        .await
        .unwrap();
    assert_eq!(response.failure_count, 1);
    assert!(response.txs[0]
        .description
        .as_deref()
        .unwrap()
        .contains("Invalid merkle format"));
}

#[tokio::test]
async fn query_transaction_reports_mixed_results() {
    let a = MockNode::new("a");
    let b = MockNode::new("b");
    let fixture = engine_over(&[a.clone(), b.clone()], SubmitSettings::default());

    let txid = double_sha256(b"q").to_string();
    a.script.lock().raw_txs.insert(
        txid.clone(),
        crate::rpc::types::RawTransactionInfo {
            hex: "aa".into(),
            block_hash: None,
            block_height: None,
            confirmations: None,
        },
    );
    b.script.lock().raw_txs.insert(
        txid.clone(),
        crate::rpc::types::RawTransactionInfo {
            hex: "bb".into(),
            block_hash: None,
            block_height: None,
            confirmations: None,
        },
    );

    let response = fixture
        .engine
        .query_transaction(&txid, false, None)
        .await
        .unwrap();
    assert_eq!(response.description.as_deref(), Some("Mixed results"));
}
