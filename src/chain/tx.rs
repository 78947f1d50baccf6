//! Raw transaction wire codec.
//!
//! Transactions arrive as opaque byte payloads and leave as opaque byte
//! payloads; this module only decodes the structure the gateway needs for
//! fee calculation, previous-output resolution and double-spend scanning.
//! Trailing bytes after a well-formed transaction are tolerated (the sender
//! pays for them, the node will ignore them).

use crate::chain::hash::{double_sha256, Hash256, Txid};
use bytes::Buf;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("unexpected end of payload")]
    UnexpectedEnd,
    #[error("implausible {0} count {1} for payload size")]
    ImplausibleCount(&'static str, u64),
}

/// Reference to an output of a previous transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OutPoint {
    pub txid: Txid,
    pub vout: u32,
}

#[derive(Debug, Clone)]
pub struct TxInput {
    pub prev_out: OutPoint,
    pub script_sig: Vec<u8>,
    pub sequence: u32,
}

#[derive(Debug, Clone)]
pub struct TxOutput {
    /// Value in satoshis. Read as a signed quantity so corrupt payloads
    /// surface as a "negative output" validation failure.
    pub value: i64,
    pub script_pubkey: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct Transaction {
    pub version: i32,
    pub inputs: Vec<TxInput>,
    pub outputs: Vec<TxOutput>,
    pub lock_time: u32,
}

impl Transaction {
    /// Decode one transaction from the start of `raw`, ignoring trailing
    /// bytes. Returns the transaction and the number of bytes consumed.
    pub fn parse_prefix(raw: &[u8]) -> Result<(Transaction, usize), CodecError> {
        let mut cur = raw;
        let tx = read_tx(&mut cur)?;
        Ok((tx, raw.len() - cur.remaining()))
    }

    pub fn parse(raw: &[u8]) -> Result<Transaction, CodecError> {
        Self::parse_prefix(raw).map(|(tx, _)| tx)
    }

    pub fn is_coinbase(&self) -> bool {
        self.inputs.len() == 1
            && self.inputs[0].prev_out.txid.is_zero()
            && self.inputs[0].prev_out.vout == u32::MAX
    }
}

/// Transaction id of a raw payload: double-SHA256 over the exact bytes.
pub fn txid_of(raw: &[u8]) -> Txid {
    double_sha256(raw)
}

fn need(cur: &&[u8], n: usize) -> Result<(), CodecError> {
    if cur.remaining() < n {
        return Err(CodecError::UnexpectedEnd);
    }
    Ok(())
}

pub(crate) fn read_var_int(cur: &mut &[u8]) -> Result<u64, CodecError> {
    need(cur, 1)?;
    let tag = cur.get_u8();
    match tag {
        0xfd => {
            need(cur, 2)?;
            Ok(cur.get_u16_le() as u64)
        }
        0xfe => {
            need(cur, 4)?;
            Ok(cur.get_u32_le() as u64)
        }
        0xff => {
            need(cur, 8)?;
            Ok(cur.get_u64_le())
        }
        n => Ok(n as u64),
    }
}

fn read_bytes(cur: &mut &[u8], len: usize) -> Result<Vec<u8>, CodecError> {
    need(cur, len)?;
    let out = cur[..len].to_vec();
    cur.advance(len);
    Ok(out)
}

fn read_hash(cur: &mut &[u8]) -> Result<Hash256, CodecError> {
    need(cur, 32)?;
    let mut bytes = [0u8; 32];
    cur.copy_to_slice(&mut bytes);
    Ok(Hash256(bytes))
}

fn read_tx(cur: &mut &[u8]) -> Result<Transaction, CodecError> {
    need(cur, 4)?;
    let version = cur.get_i32_le();

    let input_count = read_var_int(cur)?;
    // an input occupies at least outpoint (36) + script len (1) + sequence (4)
    if input_count > (cur.remaining() as u64) / 41 {
        return Err(CodecError::ImplausibleCount("input", input_count));
    }
    let mut inputs = Vec::with_capacity(input_count as usize);
    for _ in 0..input_count {
        let txid = read_hash(cur)?;
        need(cur, 4)?;
        let vout = cur.get_u32_le();
        let script_len = read_var_int(cur)?;
        if script_len > cur.remaining() as u64 {
            return Err(CodecError::UnexpectedEnd);
        }
        let script_sig = read_bytes(cur, script_len as usize)?;
        need(cur, 4)?;
        let sequence = cur.get_u32_le();
        inputs.push(TxInput {
            prev_out: OutPoint { txid, vout },
            script_sig,
            sequence,
        });
    }

    let output_count = read_var_int(cur)?;
    // an output occupies at least value (8) + script len (1)
    if output_count > (cur.remaining() as u64) / 9 {
        return Err(CodecError::ImplausibleCount("output", output_count));
    }
    let mut outputs = Vec::with_capacity(output_count as usize);
    for _ in 0..output_count {
        need(cur, 8)?;
        let value = cur.get_i64_le();
        let script_len = read_var_int(cur)?;
        if script_len > cur.remaining() as u64 {
            return Err(CodecError::UnexpectedEnd);
        }
        let script_pubkey = read_bytes(cur, script_len as usize)?;
        outputs.push(TxOutput {
            value,
            script_pubkey,
        });
    }

    need(cur, 4)?;
    let lock_time = cur.get_u32_le();

    Ok(Transaction {
        version,
        inputs,
        outputs,
        lock_time,
    })
}
