//! Block pump: walks a chain node height by height and publishes every
//! block and its transactions, in order and exactly once, to the bus.

pub mod bus;
pub mod config;
pub mod error;
pub mod fetch;
pub mod mempool;
pub mod model;
pub mod publisher;
pub mod pump;
pub mod rpc;
pub mod walker;

pub use bus::{BusError, BusRecord, EventBus, InMemoryBus};
pub use config::PumpConfig;
pub use error::{ConfigError, PumpError};
pub use fetch::{BlockFetchStep, BlockSource, FetchOutcome};
pub use mempool::MempoolWatcher;
pub use publisher::{BusPublisher, EventPublisher};
pub use pump::Pump;
pub use rpc::{BitcoinJsonRpcClient, ChainRpc, EthereumJsonRpcClient};
pub use walker::{BlockWalker, WalkStep, WalkerState};
