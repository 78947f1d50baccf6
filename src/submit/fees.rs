//! Fee policy evaluation and consolidation-transaction detection.

use crate::chain::script::{is_data_output, is_dsnt_output};
use crate::chain::Transaction;
use crate::quotes::{ConsolidationParams, PolicyQuote, FEE_TYPE_DATA, FEE_TYPE_STANDARD};
use crate::submit::prevouts::PrevOut;
use crate::utils::errors::{GatewayError, Result};

/// Outcome of scanning a transaction's outputs once.
#[derive(Debug, Clone, Copy)]
pub struct OutputScan {
    pub sum_new_outputs: i64,
    pub data_bytes: u64,
    pub has_dsnt_output: bool,
}

/// Sum output values and count data-carrier bytes. When `ds_check` is
/// requested and no DSNT output is present, a warning is appended; its
/// absence is not a failure.
pub fn scan_outputs(
    tx: &Transaction,
    ds_check: bool,
    warnings: &mut Vec<String>,
) -> Result<OutputScan> {
    let mut sum_new_outputs: i64 = 0;
    let mut data_bytes: u64 = 0;
    let mut has_dsnt_output = false;

    for output in &tx.outputs {
        if output.value < 0 {
            return Err(GatewayError::Validation(
                "Negative output values are not allowed".into(),
            ));
        }
        sum_new_outputs += output.value;

        if is_data_output(&output.script_pubkey) {
            data_bytes += output.script_pubkey.len() as u64;
            if ds_check && is_dsnt_output(&output.script_pubkey) {
                has_dsnt_output = true;
            }
        }
    }

    if ds_check && !has_dsnt_output {
        warnings.push(crate::submit::types::WARNING_MISSING_DSNT.to_string());
    }

    Ok(OutputScan {
        sum_new_outputs,
        data_bytes,
        has_dsnt_output,
    })
}

/// Mining feasibility dominates relay feasibility when ranking quotes.
pub fn fee_preference(ok_to_mine: bool, ok_to_relay: bool) -> u8 {
    (ok_to_mine as u8) * 2 + ok_to_relay as u8
}

/// Compare the actual fee against a quote's mining and relay thresholds.
/// Data-carrier bytes are charged at the data rate and excluded from the
/// normal byte count.
pub fn check_fees(
    tx_len: u64,
    sum_prev_outputs: i64,
    sum_new_outputs: i64,
    data_bytes: u64,
    quote: &PolicyQuote,
) -> (bool, bool) {
    let actual_fee = sum_prev_outputs - sum_new_outputs;
    let normal_bytes = tx_len.saturating_sub(data_bytes);

    let mut required_mining: i64 = 0;
    let mut required_relay: i64 = 0;
    for fee in &quote.fees {
        let bytes = match fee.fee_type.as_str() {
            FEE_TYPE_STANDARD => normal_bytes,
            FEE_TYPE_DATA => data_bytes,
            _ => continue,
        };
        required_mining += (bytes * fee.mining_fee.satoshis / fee.mining_fee.bytes.max(1)) as i64;
        required_relay += (bytes * fee.relay_fee.satoshis / fee.relay_fee.bytes.max(1)) as i64;
    }

    (actual_fee >= required_mining, actual_fee >= required_relay)
}

/// A consolidation transaction reduces UTXO count and script storage enough
/// to earn a fee exemption under the given policy thresholds.
pub fn is_consolidation(
    tx: &Transaction,
    params: &ConsolidationParams,
    prevouts: &[PrevOut],
) -> bool {
    // factor zero disables free consolidation
    if params.min_consolidation_factor == 0 {
        return false;
    }
    if tx.is_coinbase() {
        return false;
    }
    // does not decrease UTXO count enough
    if (tx.inputs.len() as u64) < params.min_consolidation_factor * tx.outputs.len() as u64 {
        return false;
    }

    let mut sum_input_script_sizes: u64 = 0;
    for (input, prevout) in tx.inputs.iter().zip(prevouts) {
        if prevout.confirmations < params.min_conf_consolidation_input {
            return false;
        }
        // spam detection
        if input.script_sig.len() as u64 > params.max_consolidation_input_script_size {
            return false;
        }
        if !params.accept_non_std_consolidation_input && !prevout.is_standard {
            return false;
        }
        sum_input_script_sizes += prevout.script_pub_key_len;
    }

    let sum_output_script_sizes: u64 = tx
        .outputs
        .iter()
        .map(|o| o.script_pubkey.len() as u64)
        .sum();

    // UTXO-db footprint must shrink by the same factor to be profitable
    if sum_input_script_sizes < params.min_consolidation_factor * sum_output_script_sizes {
        return false;
    }

    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::{double_sha256, OutPoint, TxInput, TxOutput};
    use crate::quotes::testutil::quote;

    fn tx_with(inputs: usize, outputs: usize, output_value: i64) -> Transaction {
        Transaction {
            version: 1,
            inputs: (0..inputs)
                .map(|i| TxInput {
                    prev_out: OutPoint {
                        txid: double_sha256(&[i as u8]),
                        vout: i as u32,
                    },
                    script_sig: vec![0x51; 30],
                    sequence: 0xffff_ffff,
                })
                .collect(),
            outputs: (0..outputs)
                .map(|_| TxOutput {
                    value: output_value,
                    script_pubkey: vec![0x76; 25],
                })
                .collect(),
            lock_time: 0,
        }
    }

    fn confirmed_prevout() -> PrevOut {
        PrevOut {
            error: None,
            collided_with: None,
            value: 10_000,
            script_pub_key_len: 25,
            is_standard: true,
            confirmations: 6,
        }
    }

    fn consolidation_params(factor: u64) -> ConsolidationParams {
        ConsolidationParams {
            min_consolidation_factor: factor,
            max_consolidation_input_script_size: 150,
            min_conf_consolidation_input: 6,
            accept_non_std_consolidation_input: false,
        }
    }

    #[test]
    fn fee_preference_ranks_mining_over_relay() {
        assert!(fee_preference(true, false) > fee_preference(false, true));
        assert_eq!(fee_preference(true, true), 3);
        assert_eq!(fee_preference(false, false), 0);
    }

    #[test]
    fn check_fees_thresholds() {
        // 500 sat / 1000 bytes mining, 250 relay
        let q = quote(1, 500, 250);
        // 200 byte tx, no data: mining needs 100 sats, relay 50
        assert_eq!(check_fees(200, 10_100, 10_000, 0, &q), (true, true));
        assert_eq!(check_fees(200, 10_060, 10_000, 0, &q), (false, true));
        assert_eq!(check_fees(200, 10_010, 10_000, 0, &q), (false, false));
    }

    #[test]
    fn data_bytes_charged_at_data_rate() {
        // standard 1000 sat/1000B, data 100 sat/1000B
        let q = quote(1, 1000, 100);
        // 1000 bytes total, 900 of them data: required mining = 100 + 90
        let (ok_mine, _) = check_fees(1000, 10_190, 10_000, 900, &q);
        assert!(ok_mine);
        let (ok_mine, _) = check_fees(1000, 10_189, 10_000, 900, &q);
        assert!(!ok_mine);
    }

    #[test]
    fn consolidation_exemption() {
        let tx = tx_with(20, 1, 1_000);
        let prevouts = vec![confirmed_prevout(); 20];
        assert!(is_consolidation(&tx, &consolidation_params(20), &prevouts));
    }

    #[test]
    fn consolidation_requires_input_count_factor() {
        let tx = tx_with(19, 1, 1_000);
        let prevouts = vec![confirmed_prevout(); 19];
        assert!(!is_consolidation(&tx, &consolidation_params(20), &prevouts));
    }

    #[test]
    fn consolidation_rejects_unconfirmed_inputs() {
        let tx = tx_with(20, 1, 1_000);
        let mut prevouts = vec![confirmed_prevout(); 20];
        prevouts[3].confirmations = 5;
        assert!(!is_consolidation(&tx, &consolidation_params(20), &prevouts));
    }

    #[test]
    fn consolidation_rejects_oversized_script_sig() {
        let mut tx = tx_with(20, 1, 1_000);
        tx.inputs[0].script_sig = vec![0; 151];
        let prevouts = vec![confirmed_prevout(); 20];
        assert!(!is_consolidation(&tx, &consolidation_params(20), &prevouts));
    }

    #[test]
    fn consolidation_rejects_non_standard_inputs() {
        let tx = tx_with(20, 1, 1_000);
        let mut prevouts = vec![confirmed_prevout(); 20];
        prevouts[7].is_standard = false;
        assert!(!is_consolidation(&tx, &consolidation_params(20), &prevouts));
        let mut accepting = consolidation_params(20);
        accepting.accept_non_std_consolidation_input = true;
        assert!(is_consolidation(&tx, &accepting, &prevouts));
    }

    #[test]
    fn consolidation_disabled_by_zero_factor() {
        let tx = tx_with(20, 1, 1_000);
        let prevouts = vec![confirmed_prevout(); 20];
        assert!(!is_consolidation(&tx, &consolidation_params(0), &prevouts));
    }

    #[test]
    fn scan_outputs_counts_data_and_warns_on_missing_dsnt() {
        let mut tx = tx_with(1, 2, 500);
        tx.outputs[1].script_pubkey = vec![0x00, 0x6a, 0x01, 0xaa];
        let mut warnings = Vec::new();
        let scan = scan_outputs(&tx, true, &mut warnings).unwrap();
        assert_eq!(scan.sum_new_outputs, 1_000);
        assert_eq!(scan.data_bytes, 4);
        assert!(!scan.has_dsnt_output);
        assert_eq!(warnings.len(), 1);
    }

    #[test]
    fn scan_outputs_finds_dsnt() {
        let mut tx = tx_with(1, 1, 0);
        let mut script = vec![0x00, 0x6a, 0x04];
        script.extend_from_slice(b"dsnt");
        tx.outputs[0].script_pubkey = script;
        let mut warnings = Vec::new();
        let scan = scan_outputs(&tx, true, &mut warnings).unwrap();
        assert!(scan.has_dsnt_output);
        assert!(warnings.is_empty());
    }

    #[test]
    fn scan_outputs_rejects_negative_values() {
        let tx = tx_with(1, 1, -5);
        let mut warnings = Vec::new();
        assert!(scan_outputs(&tx, false, &mut warnings).is_err());
    }
}
