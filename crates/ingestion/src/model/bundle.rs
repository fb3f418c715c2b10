//! Canonical block bundle, the unit the pump emits.

use alloy::primitives::U256;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// One block with all of its transactions resolved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockBundle {
    pub chain: String,
    pub height: u64,
    pub hash: String,
    pub parent_hash: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub header: BlockHeader,
    pub transactions: Vec<CanonicalTx>,
}

impl BlockBundle {
    pub fn transaction_count(&self) -> usize {
        self.transactions.len()
    }
}

/// Family-specific block fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "family", rename_all = "snake_case")]
pub enum BlockHeader {
    Bitcoin(BitcoinBlockHeader),
    Ethereum(EthereumBlockHeader),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BitcoinBlockHeader {
    /// Number of transactions the block references, fetched or not.
    pub tx_count: usize,
    #[serde(with = "rust_decimal::serde::str")]
    pub coinbase_output: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EthereumBlockHeader {
    pub miner: String,
    pub gas_used: U256,
    pub base_fee_per_gas: Option<U256>,
    pub uncle_count: usize,
    #[serde(with = "rust_decimal::serde::str")]
    pub block_reward: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub uncles_reward: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub burnt_fees: Decimal,
}

/// Family-agnostic transaction envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalTx {
    pub hash: String,
    /// `None` while the transaction only lives in the mempool.
    pub block_height: Option<u64>,
    pub payload: TxPayload,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "family", rename_all = "snake_case")]
pub enum TxPayload {
    Bitcoin(BitcoinTx),
    Ethereum(EthereumTx),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BitcoinTx {
    pub size: u64,
    pub is_coinbase: bool,
    pub ins: Vec<BitcoinTxIn>,
    pub outs: Vec<BitcoinTxOut>,
    #[serde(with = "rust_decimal::serde::str")]
    pub total_output: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BitcoinTxIn {
    pub txid: Option<String>,
    pub vout: Option<u32>,
    pub coinbase: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BitcoinTxOut {
    pub n: u32,
    #[serde(with = "rust_decimal::serde::str")]
    pub value: Decimal,
    pub addresses: Vec<String>,
}

/// Amounts are in wei.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EthereumTx {
    pub nonce: u64,
    pub from: String,
    pub to: Option<String>,
    pub value: U256,
    pub gas_limit: u64,
    pub gas_used: u64,
    pub gas_price: U256,
    pub fee: U256,
    pub input: String,
    pub created_contract: Option<String>,
}
