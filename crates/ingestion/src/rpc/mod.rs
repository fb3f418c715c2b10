//! Node RPC clients.

pub mod bitcoin;
pub mod ethereum;
pub mod jsonrpc;

pub use bitcoin::BitcoinJsonRpcClient;
pub use ethereum::EthereumJsonRpcClient;
pub use jsonrpc::JsonRpcTransport;

use async_trait::async_trait;
use futures::stream::{self, StreamExt, TryStreamExt};
use std::future::Future;

use crate::error::PumpError;
use crate::model::{RawBlock, RawTransaction};

/// Read access to one chain node.
///
/// `None` results mean "not there yet" as defined by the node API; every
/// other failure is an error.
#[async_trait]
pub trait ChainRpc: Send + Sync {
    type Block: RawBlock<Tx = Self::Tx> + Send + 'static;
    type Tx: RawTransaction + Send + 'static;

    /// Hash of the block at `height`, `None` beyond the current tip.
    async fn get_block_hash(&self, height: u64) -> Result<Option<String>, PumpError>;

    async fn get_block_by_hash(&self, hash: &str) -> Result<Option<Self::Block>, PumpError>;

    /// Fetch `ids` one call per id with bounded concurrency. Result order
    /// is unspecified.
    async fn get_transactions(&self, ids: &[String]) -> Result<Vec<Self::Tx>, PumpError>;

    /// Fetch `ids` in one batched call; any failed element fails the batch.
    async fn get_transactions_batch(&self, ids: &[String]) -> Result<Vec<Self::Tx>, PumpError>;

    async fn get_current_height(&self) -> Result<u64, PumpError>;
}

/// Run `fetch` for every id with at most `limit` calls in flight and
/// collect all results, or the first error.
pub async fn fetch_concurrently<T, F, Fut>(
    ids: &[String],
    limit: usize,
    fetch: F,
) -> Result<Vec<T>, PumpError>
where
    F: Fn(String) -> Fut,
    Fut: Future<Output = Result<T, PumpError>>,
{
    stream::iter(ids.iter().cloned())
        .map(fetch)
        .buffer_unordered(limit.max(1))
        .try_collect()
        .await
}
