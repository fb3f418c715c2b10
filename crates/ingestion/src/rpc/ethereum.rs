//! Ethereum-family node client.

use alloy::primitives::U64;
use async_trait::async_trait;
use chainpump_telemetry::{with_timing, Timing};
use reqwest::Client;
use serde_json::json;
use std::sync::Arc;
use tracing::info;

use super::{fetch_concurrently, ChainRpc, JsonRpcTransport};
use crate::error::PumpError;
use crate::model::{
    ChainInfo, EthereumTxWithReceipt, JsonRpcEthereumBlock, JsonRpcEthereumReceipt,
    JsonRpcEthereumTransaction, JsonRpcEthereumUncle,
};

#[derive(serde::Deserialize)]
struct BlockHashOnly {
    hash: String,
}

pub struct EthereumJsonRpcClient {
    transport: JsonRpcTransport,
    max_concurrency: usize,
}

impl EthereumJsonRpcClient {
    /// `max_concurrency` bounds in-flight transaction and receipt pairs.
    pub fn new(
        client: Client,
        chain: &ChainInfo,
        timing: Arc<dyn Timing>,
        max_concurrency: usize,
    ) -> Self {
        info!("Initialized {} client for {}", chain.name, chain.node_url);
        Self {
            transport: JsonRpcTransport::new(client, &chain.node_url, timing),
            max_concurrency: max_concurrency.max(1),
        }
    }

    /// Fetch a transaction and its receipt concurrently.
    pub async fn get_tx_with_receipt(&self, hash: &str) -> Result<EthereumTxWithReceipt, PumpError> {
        let tx = self
            .transport
            .call::<JsonRpcEthereumTransaction>("eth_getTransactionByHash", json!([hash]));
        let receipt = self
            .transport
            .call::<JsonRpcEthereumReceipt>("eth_getTransactionReceipt", json!([hash]));

        let (tx, receipt) = futures::try_join!(tx, receipt)?;
        let tx = tx.ok_or_else(|| {
            PumpError::communication("eth_getTransactionByHash", format!("unknown transaction {}", hash))
        })?;
        let receipt = receipt.ok_or_else(|| {
            PumpError::communication("eth_getTransactionReceipt", format!("no receipt for {}", hash))
        })?;
        Ok(EthereumTxWithReceipt { tx, receipt })
    }

    async fn uncle_numbers(&self, hash: &str, count: usize) -> Result<Vec<u64>, PumpError> {
        let mut numbers = Vec::with_capacity(count);
        for index in 0..count {
            let index = format!("0x{:x}", index);
            let uncle: JsonRpcEthereumUncle = self
                .transport
                .call("eth_getUncleByBlockHashAndIndex", json!([hash, index]))
                .await?
                .ok_or_else(|| {
                    PumpError::communication(
                        "eth_getUncleByBlockHashAndIndex",
                        format!("uncle {} of {} not found", index, hash),
                    )
                })?;
            numbers.push(uncle.number.to::<u64>());
        }
        Ok(numbers)
    }
}

#[async_trait]
impl ChainRpc for EthereumJsonRpcClient {
    type Block = JsonRpcEthereumBlock;
    type Tx = EthereumTxWithReceipt;

    async fn get_block_hash(&self, height: u64) -> Result<Option<String>, PumpError> {
        let block: Option<BlockHashOnly> = self
            .transport
            .call("eth_getBlockByNumber", json!([format!("0x{:x}", height), false]))
            .await?;
        Ok(block.map(|block| block.hash))
    }

    async fn get_block_by_hash(&self, hash: &str) -> Result<Option<JsonRpcEthereumBlock>, PumpError> {
        let block: Option<JsonRpcEthereumBlock> = self
            .transport
            .call("eth_getBlockByHash", json!([hash, false]))
            .await?;

        match block {
            Some(mut block) => {
                block.uncle_numbers = self.uncle_numbers(hash, block.uncles.len()).await?;
                Ok(Some(block))
            }
            None => Ok(None),
        }
    }

    async fn get_transactions(&self, ids: &[String]) -> Result<Vec<EthereumTxWithReceipt>, PumpError> {
        let fetch = fetch_concurrently(ids, self.max_concurrency, |hash| async move {
            self.get_tx_with_receipt(&hash).await
        });
        with_timing(self.transport.timing(), "ethereum_txes_request", fetch).await
    }

    async fn get_transactions_batch(
        &self,
        ids: &[String],
    ) -> Result<Vec<EthereumTxWithReceipt>, PumpError> {
        let params: Vec<_> = ids.iter().map(|id| json!([id])).collect();
        let txs = self
            .transport
            .call_batch::<JsonRpcEthereumTransaction>("eth_getTransactionByHash", params.clone());
        let receipts = self
            .transport
            .call_batch::<JsonRpcEthereumReceipt>("eth_getTransactionReceipt", params);

        let (txs, receipts) = futures::try_join!(txs, receipts)?;
        Ok(txs
            .into_iter()
            .zip(receipts)
            .map(|(tx, receipt)| EthereumTxWithReceipt { tx, receipt })
            .collect())
    }

    async fn get_current_height(&self) -> Result<u64, PumpError> {
        let height: U64 = self
            .transport
            .call("eth_blockNumber", json!([]))
            .await?
            .ok_or_else(|| PumpError::communication("eth_blockNumber", "null block number"))?;
        Ok(height.to::<u64>())
    }
}
