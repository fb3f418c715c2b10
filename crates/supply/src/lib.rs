//! Circulating supply derived from the block topic.

pub mod delta;
pub mod error;
pub mod process;

pub use delta::{bitcoin_subsidy, supply_delta};
pub use error::SupplyError;
pub use process::{apply_events, SupplyRecalculationProcess};
