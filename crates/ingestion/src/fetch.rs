//! Single-height fetch: hash, block, transactions, canonical bundle.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use crate::error::PumpError;
use crate::model::{BlockBundle, RawBlock, RawTransaction};
use crate::rpc::ChainRpc;

#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutcome {
    Fetched(BlockBundle),
    /// The height is above the node tip.
    NotYetAvailable,
}

/// Produces the bundle at a given height.
#[async_trait]
pub trait BlockSource: Send + Sync {
    async fn fetch(&self, height: u64) -> Result<FetchOutcome, PumpError>;
}

#[async_trait]
impl<T: BlockSource + ?Sized> BlockSource for Arc<T> {
    async fn fetch(&self, height: u64) -> Result<FetchOutcome, PumpError> {
        (**self).fetch(height).await
    }
}

pub struct BlockFetchStep<R> {
    rpc: Arc<R>,
    chain: String,
    use_batch: bool,
}

impl<R: ChainRpc> BlockFetchStep<R> {
    pub fn new(rpc: Arc<R>, chain: impl Into<String>, use_batch: bool) -> Self {
        Self {
            rpc,
            chain: chain.into(),
            use_batch,
        }
    }

    async fn fetch_transactions(&self, ids: &[String]) -> Result<Vec<R::Tx>, PumpError> {
        if self.use_batch {
            self.rpc.get_transactions_batch(ids).await
        } else {
            self.rpc.get_transactions(ids).await
        }
    }
}

#[async_trait]
impl<R: ChainRpc> BlockSource for BlockFetchStep<R> {
    async fn fetch(&self, height: u64) -> Result<FetchOutcome, PumpError> {
        let hash = match self.rpc.get_block_hash(height).await? {
            Some(hash) => hash,
            None => return Ok(FetchOutcome::NotYetAvailable),
        };

        let block = self.rpc.get_block_by_hash(&hash).await?;
        let block = block.ok_or(PumpError::InconsistentNode { height, hash })?;

        // The genesis coinbase is not retrievable from the node.
        if height == 0 {
            return block.into_bundle(&self.chain, Vec::new()).map(FetchOutcome::Fetched);
        }

        let ids = block.transaction_ids();
        let fetched = self.fetch_transactions(&ids).await?;
        debug!("Fetched {} of {} transactions for block {}", fetched.len(), ids.len(), height);

        let mut by_id: HashMap<String, R::Tx> = fetched
            .into_iter()
            .map(|tx| (tx.id().to_string(), tx))
            .collect();
        let transactions = ids
            .iter()
            .map(|id| {
                by_id.remove(id).ok_or_else(|| {
                    PumpError::communication(
                        format!("block {}", height),
                        format!("transaction {} was not returned", id),
                    )
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        block.into_bundle(&self.chain, transactions).map(FetchOutcome::Fetched)
    }
}
