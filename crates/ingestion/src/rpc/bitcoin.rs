//! Bitcoin-family node client: JSON-RPC for heights, REST for bodies.

use async_trait::async_trait;
use chainpump_telemetry::{with_timing, Timing};
use reqwest::Client;
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info};

use super::{fetch_concurrently, ChainRpc, JsonRpcTransport};
use crate::error::PumpError;
use crate::model::{ChainInfo, JsonRpcBitcoinBlock, JsonRpcBitcoinTransaction};

/// `getblockhash` answers a height beyond the tip with this code.
const RPC_INVALID_PARAMETER: i64 = -8;

pub struct BitcoinJsonRpcClient {
    transport: JsonRpcTransport,
    tx_max_concurrency: usize,
}

impl BitcoinJsonRpcClient {
    /// Create a client for a Bitcoin-family node.
    ///
    /// # Arguments
    /// * `client` - Shared HTTP client
    /// * `chain` - Chain whose `node_url` is queried
    /// * `timing` - Latency sink for every remote call
    /// * `tx_max_concurrency` - Upper bound on in-flight transaction requests
    pub fn new(
        client: Client,
        chain: &ChainInfo,
        timing: Arc<dyn Timing>,
        tx_max_concurrency: usize,
    ) -> Self {
        info!("Initialized {} client for {}", chain.name, chain.node_url);
        Self {
            transport: JsonRpcTransport::new(client, &chain.node_url, timing),
            tx_max_concurrency: tx_max_concurrency.max(1),
        }
    }

    /// Fetch one transaction through the REST interface.
    pub async fn get_tx(&self, id: &str) -> Result<JsonRpcBitcoinTransaction, PumpError> {
        let path = format!("/rest/tx/{}.json", id);
        self.transport
            .get_rest("bitcoin_tx_request", &path)
            .await?
            .ok_or_else(|| PumpError::communication(path, "transaction not found"))
    }

    /// Ids currently in the node's mempool.
    pub async fn get_mempool(&self) -> Result<Vec<String>, PumpError> {
        Ok(self
            .transport
            .call("getrawmempool", json!([]))
            .await?
            .unwrap_or_default())
    }

    /// Fetch mempool transactions; ids that left the pool meanwhile are skipped.
    pub async fn get_mempool_transactions(
        &self,
        ids: &[String],
    ) -> Result<Vec<JsonRpcBitcoinTransaction>, PumpError> {
        let fetched = fetch_concurrently(ids, self.tx_max_concurrency, |id| async move {
            match self.get_tx(&id).await {
                Ok(tx) => Ok::<_, PumpError>(Some(tx)),
                Err(e) => {
                    debug!("Mempool transaction {} unavailable: {}", id, e);
                    Ok(None)
                }
            }
        })
        .await?;
        Ok(fetched.into_iter().flatten().collect())
    }
}

#[async_trait]
impl ChainRpc for BitcoinJsonRpcClient {
    type Block = JsonRpcBitcoinBlock;
    type Tx = JsonRpcBitcoinTransaction;

    async fn get_block_hash(&self, height: u64) -> Result<Option<String>, PumpError> {
        match self.transport.call("getblockhash", json!([height])).await {
            Ok(hash) => Ok(hash),
            Err(PumpError::Rpc { code, .. }) if code == RPC_INVALID_PARAMETER => {
                debug!("Block {} is beyond the node tip", height);
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    async fn get_block_by_hash(&self, hash: &str) -> Result<Option<JsonRpcBitcoinBlock>, PumpError> {
        let path = format!("/rest/block/{}.json", hash);
        self.transport.get_rest("bitcoin_block_request", &path).await
    }

    async fn get_transactions(
        &self,
        ids: &[String],
    ) -> Result<Vec<JsonRpcBitcoinTransaction>, PumpError> {
        let fetch = fetch_concurrently(ids, self.tx_max_concurrency, |id| async move {
            self.get_tx(&id).await
        });
        with_timing(self.transport.timing(), "bitcoin_txes_request", fetch).await
    }

    async fn get_transactions_batch(
        &self,
        ids: &[String],
    ) -> Result<Vec<JsonRpcBitcoinTransaction>, PumpError> {
        let params = ids.iter().map(|id| json!([id, true])).collect();
        self.transport.call_batch("getrawtransaction", params).await
    }

    async fn get_current_height(&self) -> Result<u64, PumpError> {
        self.transport
            .call("getblockcount", json!([]))
            .await?
            .ok_or_else(|| PumpError::communication("getblockcount", "null block count"))
    }
}
