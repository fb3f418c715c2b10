//! Database models and types.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// One record stored in the event log.
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct EventRecord {
    pub position: i64,
    pub topic: String,
    pub record_key: String,
    pub height: Option<i64>,
    pub payload: String, // serialized event, opaque to the storage layer
}

/// A record about to be appended to the event log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewEvent {
    pub topic: String,
    pub key: String,
    /// Block height for block-level records, used to resume the pump.
    pub height: Option<u64>,
    pub payload: String,
}

/// Raw supply row; `total_supply` is kept as text to preserve precision.
#[derive(Debug, Clone, FromRow)]
pub(crate) struct SupplyRow {
    pub kind: String,
    pub block_number: i64,
    pub total_supply: String,
}

/// Circulating supply checkpoint of one chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SupplyState {
    pub kind: String,
    pub block_number: u64,
    pub total_supply: Decimal,
}

impl SupplyState {
    pub fn genesis(kind: impl Into<String>, total_supply: Decimal) -> Self {
        Self {
            kind: kind.into(),
            block_number: 0,
            total_supply,
        }
    }
}
