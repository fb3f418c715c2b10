//! Mempool watcher: `NEW` on first sight, `DROPPED` once a transaction
//! leaves the pool (mined or evicted).

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::bus::EventBus;
use crate::error::PumpError;
use crate::model::{CanonicalTx, ChainInfo, EventType, PumpEvent};
use crate::publisher::to_record;
use crate::pump::stopped;
use crate::rpc::BitcoinJsonRpcClient;

#[async_trait]
pub trait MempoolRpc: Send + Sync {
    async fn mempool_ids(&self) -> Result<Vec<String>, PumpError>;

    /// Transactions for `ids` still in the pool; vanished ids are omitted.
    async fn mempool_transactions(&self, ids: &[String]) -> Result<Vec<CanonicalTx>, PumpError>;
}

#[async_trait]
impl MempoolRpc for BitcoinJsonRpcClient {
    async fn mempool_ids(&self) -> Result<Vec<String>, PumpError> {
        self.get_mempool().await
    }

    async fn mempool_transactions(&self, ids: &[String]) -> Result<Vec<CanonicalTx>, PumpError> {
        Ok(self
            .get_mempool_transactions(ids)
            .await?
            .iter()
            .map(|tx| tx.to_canonical(None))
            .collect())
    }
}

#[async_trait]
impl<T: MempoolRpc + ?Sized> MempoolRpc for Arc<T> {
    async fn mempool_ids(&self) -> Result<Vec<String>, PumpError> {
        (**self).mempool_ids().await
    }

    async fn mempool_transactions(&self, ids: &[String]) -> Result<Vec<CanonicalTx>, PumpError> {
        (**self).mempool_transactions(ids).await
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MempoolDiff {
    pub added: usize,
    pub dropped: usize,
}

pub struct MempoolWatcher<R, B> {
    rpc: R,
    bus: B,
    chain: ChainInfo,
    poll_interval: Duration,
    known: HashMap<String, CanonicalTx>,
}

impl<R: MempoolRpc, B: EventBus> MempoolWatcher<R, B> {
    pub fn new(rpc: R, bus: B, chain: ChainInfo, poll_interval: Duration) -> Self {
        Self {
            rpc,
            bus,
            chain,
            poll_interval,
            known: HashMap::new(),
        }
    }

    /// Number of transactions currently tracked as pending.
    pub fn pending(&self) -> usize {
        self.known.len()
    }

    /// Diff the pool against the previous poll and publish the changes.
    ///
    /// Nothing is remembered unless the bus acknowledged the events, so a
    /// failed poll is repeated in full.
    pub async fn poll_once(&mut self) -> Result<MempoolDiff, PumpError> {
        let ids = self.rpc.mempool_ids().await?;
        let current: HashSet<&String> = ids.iter().collect();

        let unseen: Vec<String> = ids
            .iter()
            .filter(|id| !self.known.contains_key(*id))
            .cloned()
            .collect();
        let added = self.rpc.mempool_transactions(&unseen).await?;
        let dropped: Vec<String> = self
            .known
            .keys()
            .filter(|id| !current.contains(id))
            .cloned()
            .collect();

        let topic = self.chain.mempool_pump_topic();
        let mut records = Vec::with_capacity(added.len() + dropped.len());
        for tx in &added {
            let event = PumpEvent::transaction(&self.chain.name, EventType::New, tx.clone());
            records.push(to_record(&topic, None, &event)?);
        }
        for id in &dropped {
            if let Some(tx) = self.known.get(id) {
                let event = PumpEvent::transaction(&self.chain.name, EventType::Dropped, tx.clone());
                records.push(to_record(&topic, None, &event)?);
            }
        }

        if !records.is_empty() {
            self.bus.send(records).await?;
        }

        for id in &dropped {
            self.known.remove(id);
        }
        let diff = MempoolDiff {
            added: added.len(),
            dropped: dropped.len(),
        };
        for tx in added {
            self.known.insert(tx.hash.clone(), tx);
        }
        Ok(diff)
    }

    /// Poll until shutdown. Failures are logged and the next poll proceeds.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(
            "Watching {} mempool every {:?}",
            self.chain.name, self.poll_interval
        );
        loop {
            match self.poll_once().await {
                Ok(diff) => debug!(
                    "Mempool: {} new, {} dropped, {} pending",
                    diff.added,
                    diff.dropped,
                    self.pending()
                ),
                Err(e) => warn!("Mempool poll failed: {}", e),
            }

            tokio::select! {
                _ = tokio::time::sleep(self.poll_interval) => {}
                _ = stopped(&mut shutdown) => break,
            }
        }
        info!("Mempool watcher stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::{BusError, BusRecord, InMemoryBus};
    use crate::model::{ChainFamily, EventPayload, TxPayload};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakePool {
        ids: Mutex<Vec<String>>,
    }

    impl FakePool {
        fn set(&self, ids: &[&str]) {
            *self.ids.lock().unwrap() = ids.iter().map(|id| id.to_string()).collect();
        }
    }

    #[async_trait]
    impl MempoolRpc for FakePool {
        async fn mempool_ids(&self) -> Result<Vec<String>, PumpError> {
            Ok(self.ids.lock().unwrap().clone())
        }

        async fn mempool_transactions(&self, ids: &[String]) -> Result<Vec<CanonicalTx>, PumpError> {
            Ok(ids
                .iter()
                .map(|id| CanonicalTx {
                    hash: id.clone(),
                    block_height: None,
                    payload: TxPayload::Bitcoin(Default::default()),
                })
                .collect())
        }
    }

    struct SwitchableBus {
        inner: InMemoryBus,
        down: AtomicBool,
    }

    #[async_trait]
    impl EventBus for SwitchableBus {
        async fn send(&self, records: Vec<BusRecord>) -> Result<(), BusError> {
            if self.down.load(Ordering::SeqCst) {
                return Err(BusError::Unavailable("down".to_string()));
            }
            self.inner.send(records).await
        }
    }

    fn events(bus: &InMemoryBus) -> Vec<(EventType, String)> {
        bus.topic("BITCOIN_MEMPOOL_PUMP")
            .iter()
            .map(|record| {
                let event: PumpEvent = serde_json::from_str(&record.payload).unwrap();
                match event.payload {
                    EventPayload::Transaction(tx) => (event.event_type, tx.hash),
                    other => panic!("unexpected payload {:?}", other),
                }
            })
            .collect()
    }

    fn watcher(pool: Arc<FakePool>, bus: Arc<SwitchableBus>) -> MempoolWatcher<Arc<FakePool>, Arc<SwitchableBus>> {
        let chain = ChainInfo::new("BITCOIN", ChainFamily::Bitcoin, "http://node");
        MempoolWatcher::new(pool, bus, chain, Duration::from_millis(10))
    }

    #[tokio::test]
    async fn new_once_and_dropped_when_gone() {
        let pool = Arc::new(FakePool::default());
        let bus = Arc::new(SwitchableBus {
            inner: InMemoryBus::new(),
            down: AtomicBool::new(false),
        });
        let mut watcher = watcher(pool.clone(), bus.clone());

        pool.set(&["a", "b"]);
        assert_eq!(watcher.poll_once().await.unwrap(), MempoolDiff { added: 2, dropped: 0 });
        assert_eq!(watcher.poll_once().await.unwrap(), MempoolDiff::default());

        pool.set(&["b", "c"]);
        assert_eq!(watcher.poll_once().await.unwrap(), MempoolDiff { added: 1, dropped: 1 });

        assert_eq!(
            events(&bus.inner),
            vec![
                (EventType::New, "a".to_string()),
                (EventType::New, "b".to_string()),
                (EventType::New, "c".to_string()),
                (EventType::Dropped, "a".to_string()),
            ]
        );
        assert_eq!(watcher.pending(), 2);
    }

    #[tokio::test]
    async fn failed_publish_is_repeated_on_next_poll() {
        let pool = Arc::new(FakePool::default());
        let bus = Arc::new(SwitchableBus {
            inner: InMemoryBus::new(),
            down: AtomicBool::new(true),
        });
        let mut watcher = watcher(pool.clone(), bus.clone());

        pool.set(&["a"]);
        assert!(watcher.poll_once().await.is_err());
        assert_eq!(watcher.pending(), 0);

        bus.down.store(false, Ordering::SeqCst);
        assert_eq!(watcher.poll_once().await.unwrap().added, 1);
        assert_eq!(events(&bus.inner), vec![(EventType::New, "a".to_string())]);
    }
}
