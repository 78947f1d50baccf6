//! Raw block wire codec: 80-byte header plus transaction list.
//!
//! Each transaction keeps its exact wire bytes so ids can be computed and
//! payloads attached to double-spend notifications without re-encoding.

use crate::chain::hash::{double_sha256, BlockHash, Hash256, Txid};
use crate::chain::tx::{read_var_int, CodecError, Transaction};
use bytes::Buf;

pub const BLOCK_HEADER_SIZE: usize = 80;

#[derive(Debug, Clone)]
pub struct BlockHeader {
    pub version: i32,
    pub prev_hash: BlockHash,
    pub merkle_root: Hash256,
    pub time: u32,
    pub bits: u32,
    pub nonce: u32,
}

impl BlockHeader {
    pub fn parse(raw: &[u8]) -> Result<BlockHeader, CodecError> {
        if raw.len() < BLOCK_HEADER_SIZE {
            return Err(CodecError::UnexpectedEnd);
        }
        let mut cur = raw;
        let version = cur.get_i32_le();
        let mut prev = [0u8; 32];
        cur.copy_to_slice(&mut prev);
        let mut merkle = [0u8; 32];
        cur.copy_to_slice(&mut merkle);
        Ok(BlockHeader {
            version,
            prev_hash: Hash256(prev),
            merkle_root: Hash256(merkle),
            time: cur.get_u32_le(),
            bits: cur.get_u32_le(),
            nonce: cur.get_u32_le(),
        })
    }

    /// Block hash: double-SHA256 of the 80 header bytes.
    pub fn hash_of(raw_header: &[u8]) -> BlockHash {
        double_sha256(&raw_header[..BLOCK_HEADER_SIZE])
    }
}

/// One transaction inside a block, with its wire bytes.
#[derive(Debug, Clone)]
pub struct BlockTx {
    pub txid: Txid,
    pub raw: Vec<u8>,
    pub tx: Transaction,
}

#[derive(Debug, Clone)]
pub struct Block {
    pub hash: BlockHash,
    pub header: BlockHeader,
    pub transactions: Vec<BlockTx>,
}

impl Block {
    pub fn parse(raw: &[u8]) -> Result<Block, CodecError> {
        let header = BlockHeader::parse(raw)?;
        let hash = BlockHeader::hash_of(raw);

        let mut cur = &raw[BLOCK_HEADER_SIZE..];
        let tx_count = read_var_int(&mut cur)?;
        // a transaction occupies at least 10 bytes on the wire
        if tx_count > (cur.remaining() as u64) / 10 {
            return Err(CodecError::ImplausibleCount("transaction", tx_count));
        }

        let mut transactions = Vec::with_capacity(tx_count as usize);
        for _ in 0..tx_count {
            let before = cur;
            let (tx, consumed) = Transaction::parse_prefix(cur)?;
            let raw_tx = before[..consumed].to_vec();
            cur = &before[consumed..];
            transactions.push(BlockTx {
                txid: double_sha256(&raw_tx),
                raw: raw_tx,
                tx,
            });
        }

        Ok(Block {
            hash,
            header,
            transactions,
        })
    }
}

#[cfg(test)]
pub(crate) mod testutil {
    use super::*;
    use crate::chain::tx::testutil::{encode_tx, write_var_int};

    /// Assemble a raw block from a previous hash and raw transactions.
    pub fn encode_block(prev_hash: BlockHash, time: u32, raw_txs: &[Vec<u8>]) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&1i32.to_le_bytes());
        out.extend_from_slice(prev_hash.as_bytes());
        out.extend_from_slice(Hash256::ZERO.as_bytes());
        out.extend_from_slice(&time.to_le_bytes());
        out.extend_from_slice(&0x1d00ffffu32.to_le_bytes());
        out.extend_from_slice(&0u32.to_le_bytes());
        write_var_int(&mut out, raw_txs.len() as u64);
        for raw in raw_txs {
            out.extend_from_slice(raw);
        }
        out
    }

    pub fn encode_block_of(prev_hash: BlockHash, time: u32, txs: &[Transaction]) -> Vec<u8> {
        let raws: Vec<Vec<u8>> = txs.iter().map(encode_tx).collect();
        encode_block(prev_hash, time, &raws)
    }
}
