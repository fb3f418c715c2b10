//! Wire events placed on the bus.

use serde::{Deserialize, Serialize};

use super::bundle::{BlockBundle, CanonicalTx};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    New,
    Dropped,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum EventPayload {
    Block(BlockBundle),
    Transaction(CanonicalTx),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PumpEvent {
    pub chain: String,
    pub event_type: EventType,
    pub payload: EventPayload,
}

impl PumpEvent {
    pub fn new_block(bundle: BlockBundle) -> Self {
        Self {
            chain: bundle.chain.clone(),
            event_type: EventType::New,
            payload: EventPayload::Block(bundle),
        }
    }

    pub fn transaction(chain: impl Into<String>, event_type: EventType, tx: CanonicalTx) -> Self {
        Self {
            chain: chain.into(),
            event_type,
            payload: EventPayload::Transaction(tx),
        }
    }

    /// Height of the carried block, if this is a block event.
    pub fn block_height(&self) -> Option<u64> {
        match &self.payload {
            EventPayload::Block(bundle) => Some(bundle.height),
            EventPayload::Transaction(_) => None,
        }
    }
}
