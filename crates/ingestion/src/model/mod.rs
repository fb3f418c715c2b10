//! Canonical chain model and the node-native records it is built from.

pub mod bitcoin;
pub mod bundle;
pub mod chain;
pub mod ethereum;
pub mod event;

pub use bitcoin::{JsonRpcBitcoinBlock, JsonRpcBitcoinTransaction};
pub use bundle::{
    BitcoinBlockHeader, BitcoinTx, BlockBundle, BlockHeader, CanonicalTx, EthereumBlockHeader,
    EthereumTx, TxPayload,
};
pub use chain::{ChainFamily, ChainInfo};
pub use ethereum::{
    EthereumTxWithReceipt, JsonRpcEthereumBlock, JsonRpcEthereumReceipt, JsonRpcEthereumTransaction,
    JsonRpcEthereumUncle,
};
pub use event::{EventPayload, EventType, PumpEvent};

use crate::error::PumpError;

/// Node-native transaction as returned by the RPC client.
pub trait RawTransaction {
    /// Identifier the enclosing block refers to this transaction by.
    fn id(&self) -> &str;
}

/// Node-native block as returned by the RPC client.
pub trait RawBlock {
    type Tx: RawTransaction;

    fn height(&self) -> u64;

    /// Transaction ids referenced by the block, in block order.
    fn transaction_ids(&self) -> Vec<String>;

    /// Build the canonical bundle; `transactions` follow block order.
    fn into_bundle(self, chain: &str, transactions: Vec<Self::Tx>)
        -> Result<BlockBundle, PumpError>;
}
