//! Consumer of the block topic that keeps the supply checkpoint current.

use chainpump_db::{EventLog, SupplyState, SupplyStore};
use chainpump_ingestion::model::{ChainInfo, EventPayload, EventType, PumpEvent};
use chainpump_ingestion::pump::stopped;
use chainpump_telemetry::Metrics;
use rust_decimal::Decimal;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::delta::supply_delta;
use crate::error::SupplyError;

/// Apply every `NEW` block event above the checkpoint to `state`.
///
/// Events at or below `state.block_number` were already counted and are
/// skipped, so replaying a batch leaves the state unchanged. A block that
/// does not follow the checkpoint is still applied, with a warning. Returns
/// the number of blocks applied.
pub fn apply_events(state: &mut SupplyState, events: &[PumpEvent]) -> usize {
    let mut applied = 0;
    for event in events {
        if event.event_type != EventType::New {
            continue;
        }
        let EventPayload::Block(bundle) = &event.payload else {
            continue;
        };
        if bundle.height <= state.block_number {
            debug!("Skipping block {} at or below checkpoint {}", bundle.height, state.block_number);
            continue;
        }
        if bundle.height != state.block_number + 1 {
            warn!(
                "Gap in block events: checkpoint {} then block {}",
                state.block_number, bundle.height
            );
        }
        state.total_supply += supply_delta(bundle);
        state.block_number = bundle.height;
        applied += 1;
    }
    applied
}

pub struct SupplyRecalculationProcess {
    log: EventLog,
    store: SupplyStore,
    kind: String,
    group: String,
    topic: String,
    genesis_supply: Decimal,
    max_poll_records: u32,
    idle_interval: Duration,
    retry_delay: Duration,
    metrics: Metrics,
}

impl SupplyRecalculationProcess {
    pub fn new(
        log: EventLog,
        store: SupplyStore,
        chain: &ChainInfo,
        genesis_supply: Decimal,
        max_poll_records: u32,
        metrics: Metrics,
    ) -> Self {
        Self {
            log,
            store,
            kind: chain.name.clone(),
            group: chain.supply_group(),
            topic: chain.block_pump_topic(),
            genesis_supply,
            max_poll_records: max_poll_records.max(1),
            idle_interval: Duration::from_secs(1),
            retry_delay: Duration::from_secs(5),
            metrics,
        }
    }

    pub fn with_intervals(mut self, idle_interval: Duration, retry_delay: Duration) -> Self {
        self.idle_interval = idle_interval;
        self.retry_delay = retry_delay;
        self
    }

    /// Committed checkpoint, creating the genesis state on first use.
    pub async fn load_state(&self) -> Result<SupplyState, SupplyError> {
        let genesis = || SupplyState::genesis(self.kind.clone(), self.genesis_supply);
        Ok(self.store.get_last_calculated_supply(&self.kind, genesis).await?)
    }

    /// Process one batch from the committed offset. `state` is replaced
    /// only once the new state and offset were committed together.
    /// Returns the number of records read.
    pub async fn process_batch(&self, state: &mut SupplyState) -> Result<usize, SupplyError> {
        let position = self.log.committed_position(&self.group, &self.topic).await?;
        let records = self.log.poll(&self.topic, position, self.max_poll_records).await?;
        let Some(last) = records.last() else {
            return Ok(0);
        };

        let events = records
            .iter()
            .map(|record| {
                serde_json::from_str::<PumpEvent>(&record.payload).map_err(|source| {
                    SupplyError::Decode {
                        position: record.position,
                        source,
                    }
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let mut next = state.clone();
        let applied = apply_events(&mut next, &events);
        self.store
            .commit_batch(&next, &self.group, &self.topic, last.position + 1)
            .await?;

        if applied > 0 {
            info!(
                "Supply of {} at block {}: {}",
                next.kind, next.block_number, next.total_supply
            );
        }
        self.metrics.set_supply_height(next.block_number);
        *state = next;
        Ok(records.len())
    }

    /// Consume until shutdown. A failed batch is rolled back, the state is
    /// reloaded from storage and the batch retried after a delay.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> Result<SupplyState, SupplyError> {
        let mut state = self.load_state().await?;
        info!(
            "Starting supply process for {} at block {} (group {})",
            self.kind, state.block_number, self.group
        );

        loop {
            let pause = match self.process_batch(&mut state).await {
                Ok(read) if read as u32 >= self.max_poll_records => Duration::ZERO,
                Ok(_) => self.idle_interval,
                Err(e) => {
                    error!("Supply batch failed, retrying in {:?}: {}", self.retry_delay, e);
                    match self.load_state().await {
                        Ok(committed) => state = committed,
                        Err(e) => error!("Failed to reload supply state: {}", e),
                    }
                    self.retry_delay
                }
            };

            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                _ = tokio::time::sleep(pause) => {}
                _ = stopped(&mut shutdown) => break,
            }
        }

        info!("Supply process stopped at block {}", state.block_number);
        Ok(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chainpump_db::{DbPool, NewEvent};
    use chainpump_ingestion::model::{BitcoinBlockHeader, BlockBundle, BlockHeader, ChainFamily};
    use chrono::Utc;
    use std::str::FromStr;
    use tracing_test::traced_test;

    fn chain() -> ChainInfo {
        ChainInfo::new("BITCOIN", ChainFamily::Bitcoin, "http://node")
    }

    fn block_event(height: u64) -> PumpEvent {
        PumpEvent::new_block(BlockBundle {
            chain: "BITCOIN".to_string(),
            height,
            hash: format!("h{}", height),
            parent_hash: None,
            timestamp: Utc::now(),
            header: BlockHeader::Bitcoin(BitcoinBlockHeader {
                tx_count: 1,
                coinbase_output: Decimal::from(50),
            }),
            transactions: Vec::new(),
        })
    }

    async fn setup(max_poll_records: u32) -> (EventLog, SupplyRecalculationProcess) {
        let db = DbPool::new(":memory:").await.unwrap();
        db.migrate().await.unwrap();
        let log = EventLog::new(db.clone());
        let process = SupplyRecalculationProcess::new(
            log.clone(),
            SupplyStore::new(db),
            &chain(),
            Decimal::ZERO,
            max_poll_records,
            Metrics::new().unwrap(),
        );
        (log, process)
    }

    async fn append_blocks(log: &EventLog, heights: impl IntoIterator<Item = u64>) {
        let records: Vec<NewEvent> = heights
            .into_iter()
            .map(|height| NewEvent {
                topic: "BITCOIN_BLOCK_PUMP".to_string(),
                key: "BITCOIN".to_string(),
                height: Some(height),
                payload: serde_json::to_string(&block_event(height)).unwrap(),
            })
            .collect();
        log.append(&records).await.unwrap();
    }

    #[test]
    fn replay_is_idempotent() {
        let mut state = SupplyState::genesis("BITCOIN", Decimal::ZERO);
        let events: Vec<_> = (0..=3).map(block_event).collect();

        assert_eq!(apply_events(&mut state, &events), 3);
        assert_eq!(state.block_number, 3);
        assert_eq!(state.total_supply, Decimal::from(150));

        assert_eq!(apply_events(&mut state, &events), 0);
        assert_eq!(state.total_supply, Decimal::from(150));
    }

    #[test]
    #[traced_test]
    fn missing_heights_are_applied_with_a_warning() {
        let mut state = SupplyState::genesis("BITCOIN", Decimal::ZERO);
        let events = vec![block_event(1), block_event(4)];

        assert_eq!(apply_events(&mut state, &events), 2);
        assert_eq!(state.block_number, 4);
        assert_eq!(state.total_supply, Decimal::from(100));
        assert!(logs_contain("Gap in block events: checkpoint 1 then block 4"));
        assert!(!logs_contain("checkpoint 0 then block 1"));
    }

    #[test]
    fn dropped_and_transaction_events_are_ignored() {
        let mut state = SupplyState::genesis("BITCOIN", Decimal::from_str("1.5").unwrap());
        let mut dropped = block_event(1);
        dropped.event_type = EventType::Dropped;

        assert_eq!(apply_events(&mut state, &[dropped]), 0);
        assert_eq!(state.total_supply, Decimal::from_str("1.5").unwrap());
    }

    #[tokio::test]
    async fn batches_commit_state_and_offset_together() {
        let (log, process) = setup(2).await;
        append_blocks(&log, 0..=4).await;

        let mut state = process.load_state().await.unwrap();
        assert_eq!(state.block_number, 0);

        let mut total_read = 0;
        loop {
            let read = process.process_batch(&mut state).await.unwrap();
            if read == 0 {
                break;
            }
            total_read += read;
        }

        assert_eq!(total_read, 5);
        assert_eq!(state.block_number, 4);
        assert_eq!(state.total_supply, Decimal::from(200));
        assert_eq!(process.load_state().await.unwrap(), state);
        assert_eq!(
            log.committed_position("bitcoin-supply-process", "BITCOIN_BLOCK_PUMP")
                .await
                .unwrap(),
            6
        );
    }

    #[tokio::test]
    async fn rewound_offset_does_not_double_count() {
        let (log, process) = setup(10).await;
        append_blocks(&log, 0..=2).await;

        let mut state = process.load_state().await.unwrap();
        process.process_batch(&mut state).await.unwrap();
        assert_eq!(state.total_supply, Decimal::from(100));

        // Crash after the supply landed but before the offset moved.
        SupplyStore::new(log.db().clone())
            .commit_batch(&state, "bitcoin-supply-process", "BITCOIN_BLOCK_PUMP", 0)
            .await
            .unwrap();
        append_blocks(&log, [3]).await;

        let mut state = process.load_state().await.unwrap();
        process.process_batch(&mut state).await.unwrap();
        assert_eq!(state.block_number, 3);
        assert_eq!(state.total_supply, Decimal::from(150));
    }

    #[tokio::test]
    async fn run_stops_on_shutdown() {
        let (log, process) = setup(500).await;
        append_blocks(&log, 0..=1).await;
        let process = process.with_intervals(Duration::from_millis(5), Duration::from_millis(5));

        let (stop, shutdown) = watch::channel(false);
        let handle = tokio::spawn(process.run(shutdown));

        let store = SupplyStore::new(log.db().clone());
        tokio::time::timeout(Duration::from_secs(10), async {
            loop {
                let state = store
                    .get_last_calculated_supply("BITCOIN", || SupplyState::genesis("BITCOIN", Decimal::ZERO))
                    .await
                    .unwrap();
                if state.block_number == 1 {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        stop.send(true).unwrap();
        let state = handle.await.unwrap().unwrap();
        assert_eq!(state.total_supply, Decimal::from(50));
    }
}
