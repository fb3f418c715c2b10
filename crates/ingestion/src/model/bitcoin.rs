//! Bitcoin-family node records and their canonical conversion.

use chrono::DateTime;
use rust_decimal::Decimal;
use serde::Deserialize;

use super::bundle::{
    BitcoinBlockHeader, BitcoinTx, BitcoinTxIn, BitcoinTxOut, BlockBundle, BlockHeader,
    CanonicalTx, TxPayload,
};
use super::{RawBlock, RawTransaction};
use crate::error::PumpError;

/// Block as served by `/rest/block/<hash>.json`.
#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcBitcoinBlock {
    pub hash: String,
    pub height: u64,
    pub previousblockhash: Option<String>,
    pub time: i64,
    #[serde(default)]
    pub tx: Vec<TxRef>,
}

/// The REST block endpoint lists either bare ids or full transactions
/// depending on the node and endpoint flavour; only the id is used.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum TxRef {
    Id(String),
    Detailed { txid: String },
}

impl TxRef {
    pub fn txid(&self) -> &str {
        match self {
            TxRef::Id(id) => id,
            TxRef::Detailed { txid } => txid,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcBitcoinTransaction {
    pub txid: String,
    pub hash: Option<String>,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub vin: Vec<JsonRpcBitcoinTxIn>,
    #[serde(default)]
    pub vout: Vec<JsonRpcBitcoinTxOut>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcBitcoinTxIn {
    pub txid: Option<String>,
    pub vout: Option<u32>,
    pub coinbase: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcBitcoinTxOut {
    pub value: Decimal,
    pub n: u32,
    #[serde(rename = "scriptPubKey", default)]
    pub script_pub_key: ScriptPubKey,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ScriptPubKey {
    #[serde(default)]
    pub addresses: Vec<String>,
    pub address: Option<String>,
}

impl JsonRpcBitcoinTransaction {
    pub fn is_coinbase(&self) -> bool {
        self.vin.first().map_or(false, |input| input.coinbase.is_some())
    }

    pub fn total_output(&self) -> Decimal {
        self.vout.iter().map(|out| out.value).sum()
    }

    /// Canonical form; `block_height` is `None` for mempool transactions.
    pub fn to_canonical(&self, block_height: Option<u64>) -> CanonicalTx {
        let ins = self
            .vin
            .iter()
            .map(|input| BitcoinTxIn {
                txid: input.txid.clone(),
                vout: input.vout,
                coinbase: input.coinbase.is_some(),
            })
            .collect();

        let outs = self
            .vout
            .iter()
            .map(|out| {
                // Newer nodes report a single `address`, older ones an `addresses` list.
                let mut addresses = out.script_pub_key.addresses.clone();
                if let Some(address) = &out.script_pub_key.address {
                    if !addresses.contains(address) {
                        addresses.push(address.clone());
                    }
                }
                BitcoinTxOut {
                    n: out.n,
                    value: out.value,
                    addresses,
                }
            })
            .collect();

        CanonicalTx {
            hash: self.txid.clone(),
            block_height,
            payload: TxPayload::Bitcoin(BitcoinTx {
                size: self.size,
                is_coinbase: self.is_coinbase(),
                ins,
                outs,
                total_output: self.total_output(),
            }),
        }
    }
}

impl RawTransaction for JsonRpcBitcoinTransaction {
    fn id(&self) -> &str {
        &self.txid
    }
}

impl RawBlock for JsonRpcBitcoinBlock {
    type Tx = JsonRpcBitcoinTransaction;

    fn height(&self) -> u64 {
        self.height
    }

    fn transaction_ids(&self) -> Vec<String> {
        self.tx.iter().map(|tx| tx.txid().to_string()).collect()
    }

    fn into_bundle(
        self,
        chain: &str,
        transactions: Vec<JsonRpcBitcoinTransaction>,
    ) -> Result<BlockBundle, PumpError> {
        let timestamp = DateTime::from_timestamp(self.time, 0).ok_or_else(|| {
            PumpError::conversion("bitcoin block", format!("invalid time {}", self.time))
        })?;

        let coinbase_output = transactions
            .iter()
            .find(|tx| tx.is_coinbase())
            .map(|tx| tx.total_output())
            .unwrap_or(Decimal::ZERO);

        let header = BlockHeader::Bitcoin(BitcoinBlockHeader {
            tx_count: self.tx.len(),
            coinbase_output,
        });

        let transactions = transactions
            .iter()
            .map(|tx| tx.to_canonical(Some(self.height)))
            .collect();

        Ok(BlockBundle {
            chain: chain.to_string(),
            height: self.height,
            hash: self.hash,
            parent_hash: self.previousblockhash,
            timestamp,
            header,
            transactions,
        })
    }
}
