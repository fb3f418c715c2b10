//! Ethereum-family node records, reward schedule and canonical conversion.

use alloy::primitives::{U256, U64};
use chrono::DateTime;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::str::FromStr;

use super::bundle::{
    BlockBundle, BlockHeader, CanonicalTx, EthereumBlockHeader, EthereumTx, TxPayload,
};
use super::{RawBlock, RawTransaction};
use crate::error::PumpError;

const BYZANTIUM_BLOCK: u64 = 4_370_000;
const CONSTANTINOPLE_BLOCK: u64 = 7_280_000;
const MERGE_BLOCK: u64 = 15_537_394;
const CLASSIC_ERA_LENGTH: u64 = 5_000_000;

/// Block as returned by `eth_getBlockByHash(hash, false)`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JsonRpcEthereumBlock {
    pub hash: String,
    pub number: U64,
    pub parent_hash: String,
    pub timestamp: U64,
    pub miner: String,
    pub gas_used: U256,
    pub base_fee_per_gas: Option<U256>,
    #[serde(default)]
    pub transactions: Vec<String>,
    #[serde(default)]
    pub uncles: Vec<String>,
    /// Heights of `uncles`, resolved by the client after the block fetch.
    #[serde(skip)]
    pub uncle_numbers: Vec<u64>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JsonRpcEthereumTransaction {
    pub hash: String,
    pub nonce: U64,
    pub from: String,
    pub to: Option<String>,
    pub value: U256,
    pub gas: U64,
    pub gas_price: Option<U256>,
    #[serde(default)]
    pub input: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JsonRpcEthereumReceipt {
    pub gas_used: U64,
    pub effective_gas_price: Option<U256>,
    pub contract_address: Option<String>,
}

/// Uncle header, only its height matters.
#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcEthereumUncle {
    pub number: U64,
}

/// A transaction fetched together with its receipt.
#[derive(Debug, Clone)]
pub struct EthereumTxWithReceipt {
    pub tx: JsonRpcEthereumTransaction,
    pub receipt: JsonRpcEthereumReceipt,
}

impl RawTransaction for EthereumTxWithReceipt {
    fn id(&self) -> &str {
        &self.tx.hash
    }
}

impl EthereumTxWithReceipt {
    pub fn to_canonical(&self, block_height: Option<u64>) -> CanonicalTx {
        let gas_used = self.receipt.gas_used.to::<u64>();
        let gas_price = self
            .receipt
            .effective_gas_price
            .or(self.tx.gas_price)
            .unwrap_or(U256::ZERO);

        CanonicalTx {
            hash: self.tx.hash.clone(),
            block_height,
            payload: TxPayload::Ethereum(EthereumTx {
                nonce: self.tx.nonce.to::<u64>(),
                from: self.tx.from.clone(),
                to: self.tx.to.clone(),
                value: self.tx.value,
                gas_limit: self.tx.gas.to::<u64>(),
                gas_used,
                gas_price,
                fee: U256::from(gas_used).saturating_mul(gas_price),
                input: self.tx.input.clone(),
                created_contract: self.receipt.contract_address.clone(),
            }),
        }
    }
}

/// Static block reward of `chain` at `number`, in ether.
pub fn block_reward(chain: &str, number: u64) -> Decimal {
    if number == 0 {
        return Decimal::ZERO;
    }
    if is_classic(chain) {
        // 5 ETC, reduced by 20% every era.
        let era = (number - 1) / CLASSIC_ERA_LENGTH;
        let mut reward = Decimal::from(5);
        for _ in 0..era {
            reward = reward * Decimal::from(4) / Decimal::from(5);
        }
        return reward;
    }
    match number {
        n if n < BYZANTIUM_BLOCK => Decimal::from(5),
        n if n < CONSTANTINOPLE_BLOCK => Decimal::from(3),
        n if n < MERGE_BLOCK => Decimal::from(2),
        _ => Decimal::ZERO,
    }
}

/// Reward paid for including `uncle_numbers` in block `number`: the
/// inclusion bonus to the miner plus what each uncle's miner receives.
pub fn uncles_reward(chain: &str, number: u64, uncle_numbers: &[u64]) -> Decimal {
    let reward = block_reward(chain, number);
    let thirty_second = reward / Decimal::from(32);
    let classic_era = is_classic(chain) && (number.saturating_sub(1)) / CLASSIC_ERA_LENGTH > 0;

    uncle_numbers
        .iter()
        .map(|&uncle| {
            let uncle_miner = if classic_era {
                thirty_second
            } else {
                let depth_factor = (uncle + 8).saturating_sub(number);
                reward * Decimal::from(depth_factor) / Decimal::from(8)
            };
            uncle_miner + thirty_second
        })
        .sum()
}

/// Exact conversion of a wei amount to ether.
pub fn wei_to_ether(wei: U256) -> Result<Decimal, PumpError> {
    let mut ether = Decimal::from_str(&wei.to_string())
        .map_err(|e| PumpError::conversion("wei amount", format!("{}: {}", wei, e)))?;
    ether
        .set_scale(18)
        .map_err(|e| PumpError::conversion("wei amount", format!("{}: {}", wei, e)))?;
    Ok(ether.normalize())
}

fn is_classic(chain: &str) -> bool {
    chain.to_ascii_uppercase().starts_with("ETHEREUM_CLASSIC")
}

impl RawBlock for JsonRpcEthereumBlock {
    type Tx = EthereumTxWithReceipt;

    fn height(&self) -> u64 {
        self.number.to::<u64>()
    }

    fn transaction_ids(&self) -> Vec<String> {
        self.transactions.clone()
    }

    fn into_bundle(
        self,
        chain: &str,
        transactions: Vec<EthereumTxWithReceipt>,
    ) -> Result<BlockBundle, PumpError> {
        let height = self.height();
        let seconds = self.timestamp.to::<u64>();
        let timestamp = i64::try_from(seconds)
            .ok()
            .and_then(|secs| DateTime::from_timestamp(secs, 0))
            .ok_or_else(|| {
                PumpError::conversion("ethereum block", format!("invalid timestamp {}", seconds))
            })?;

        let burnt = match self.base_fee_per_gas {
            Some(base_fee) => wei_to_ether(base_fee.saturating_mul(self.gas_used))?,
            None => Decimal::ZERO,
        };

        let header = BlockHeader::Ethereum(EthereumBlockHeader {
            miner: self.miner,
            gas_used: self.gas_used,
            base_fee_per_gas: self.base_fee_per_gas,
            uncle_count: self.uncles.len(),
            block_reward: block_reward(chain, height),
            uncles_reward: uncles_reward(chain, height, &self.uncle_numbers),
            burnt_fees: burnt,
        });

        let transactions = transactions
            .iter()
            .map(|tx| tx.to_canonical(Some(height)))
            .collect();

        Ok(BlockBundle {
            chain: chain.to_string(),
            height,
            hash: self.hash,
            parent_hash: Some(self.parent_hash),
            timestamp,
            header,
            transactions,
        })
    }
}
