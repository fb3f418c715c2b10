//! Message bus boundary.

use async_trait::async_trait;
use chainpump_db::{DbError, EventLog};
use std::sync::{Arc, Mutex};
use thiserror::Error;

/// Record placed on the bus: topic, ordering key, optional block height and
/// the serialized event.
pub use chainpump_db::NewEvent as BusRecord;

#[derive(Debug, Error)]
pub enum BusError {
    #[error("bus storage error: {0}")]
    Storage(#[from] DbError),

    #[error("event serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("bus unavailable: {0}")]
    Unavailable(String),
}

/// Ordered, durable sink for pump events.
///
/// `send` appends all records of one call atomically and in order; a
/// successful return is the acknowledgement.
#[async_trait]
pub trait EventBus: Send + Sync {
    async fn send(&self, records: Vec<BusRecord>) -> Result<(), BusError>;
}

#[async_trait]
impl EventBus for EventLog {
    async fn send(&self, records: Vec<BusRecord>) -> Result<(), BusError> {
        self.append(&records).await?;
        Ok(())
    }
}

#[async_trait]
impl<T: EventBus + ?Sized> EventBus for Arc<T> {
    async fn send(&self, records: Vec<BusRecord>) -> Result<(), BusError> {
        (**self).send(records).await
    }
}

/// Process-local bus keeping every record in memory.
#[derive(Debug, Default)]
pub struct InMemoryBus {
    records: Mutex<Vec<BusRecord>>,
}

impl InMemoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything sent so far, in send order.
    pub fn records(&self) -> Vec<BusRecord> {
        self.lock().clone()
    }

    /// Records of one topic, in send order.
    pub fn topic(&self, topic: &str) -> Vec<BusRecord> {
        self.lock()
            .iter()
            .filter(|record| record.topic == topic)
            .cloned()
            .collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<BusRecord>> {
        // A panic while holding the lock cannot leave the vector half-written.
        self.records.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl EventBus for InMemoryBus {
    async fn send(&self, records: Vec<BusRecord>) -> Result<(), BusError> {
        self.lock().extend(records);
        Ok(())
    }
}
