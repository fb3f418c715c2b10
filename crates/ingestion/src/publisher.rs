//! Turns bundles into bus records.

use async_trait::async_trait;

use crate::bus::{BusError, BusRecord, EventBus};
use crate::error::PumpError;
use crate::model::{BlockBundle, ChainInfo, EventType, PumpEvent};

#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publish `bundle`; success means every record was acknowledged.
    async fn publish(&self, bundle: &BlockBundle) -> Result<(), PumpError>;
}

/// Serialize `event` into a record keyed by its chain.
pub fn to_record(topic: &str, height: Option<u64>, event: &PumpEvent) -> Result<BusRecord, BusError> {
    Ok(BusRecord {
        topic: topic.to_string(),
        key: event.chain.clone(),
        height,
        payload: serde_json::to_string(event)?,
    })
}

pub struct BusPublisher<B> {
    bus: B,
    chain: ChainInfo,
}

impl<B: EventBus> BusPublisher<B> {
    pub fn new(bus: B, chain: ChainInfo) -> Self {
        Self { bus, chain }
    }

    /// Block record first, then one record per transaction in block order.
    pub fn records(&self, bundle: &BlockBundle) -> Result<Vec<BusRecord>, BusError> {
        let tx_topic = self.chain.tx_pump_topic();
        let mut records = Vec::with_capacity(bundle.transaction_count() + 1);

        records.push(to_record(
            &self.chain.block_pump_topic(),
            Some(bundle.height),
            &PumpEvent::new_block(bundle.clone()),
        )?);
        for tx in &bundle.transactions {
            let event = PumpEvent::transaction(&self.chain.name, EventType::New, tx.clone());
            records.push(to_record(&tx_topic, None, &event)?);
        }
        Ok(records)
    }
}

#[async_trait]
impl<B: EventBus> EventPublisher for BusPublisher<B> {
    async fn publish(&self, bundle: &BlockBundle) -> Result<(), PumpError> {
        let records = self.records(bundle)?;
        self.bus.send(records).await?;
        Ok(())
    }
}
