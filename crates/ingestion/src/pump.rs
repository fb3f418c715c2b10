//! Drives the walker: publish, commit, sleep, repeat.

use backoff::ExponentialBackoff;
use chainpump_db::EventLog;
use chainpump_telemetry::Metrics;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::bus::BusError;
use crate::error::PumpError;
use crate::fetch::BlockSource;
use crate::model::BlockBundle;
use crate::publisher::EventPublisher;
use crate::walker::{BlockWalker, WalkStep};

/// Retry budget for one publish.
pub fn default_publish_backoff() -> ExponentialBackoff {
    ExponentialBackoff {
        initial_interval: Duration::from_millis(200),
        max_interval: Duration::from_secs(30),
        max_elapsed_time: Some(Duration::from_secs(600)),
        ..Default::default()
    }
}

pub struct Pump<S, P> {
    walker: BlockWalker<S>,
    publisher: P,
    metrics: Metrics,
    tip_poll_interval: Duration,
    publish_backoff: ExponentialBackoff,
    shutdown: watch::Receiver<bool>,
}

impl<S: BlockSource, P: EventPublisher> Pump<S, P> {
    pub fn new(
        walker: BlockWalker<S>,
        publisher: P,
        metrics: Metrics,
        tip_poll_interval: Duration,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            walker,
            publisher,
            metrics,
            tip_poll_interval,
            publish_backoff: default_publish_backoff(),
            shutdown,
        }
    }

    pub fn with_publish_backoff(mut self, backoff: ExponentialBackoff) -> Self {
        self.publish_backoff = backoff;
        self
    }

    /// Run until shutdown or a fatal error. Returns the next height to pump.
    ///
    /// A height is committed only after its events were acknowledged, so a
    /// restart from the returned height neither skips nor repeats blocks.
    pub async fn run(mut self) -> Result<u64, PumpError> {
        info!("Starting pump at block {}", self.walker.height());

        loop {
            if *self.shutdown.borrow() {
                break;
            }

            match self.walker.next_step().await? {
                WalkStep::Block(bundle) => {
                    let published = tokio::select! {
                        result = publish_with_retry(
                            &self.publisher,
                            &self.metrics,
                            self.publish_backoff.clone(),
                            &bundle,
                        ) => Some(result),
                        _ = stopped(&mut self.shutdown) => None,
                    };

                    match published {
                        Some(Ok(())) => {
                            self.walker.commit(bundle.height)?;
                            self.metrics.inc_blocks_pumped();
                            self.metrics
                                .inc_transactions_pumped(bundle.transaction_count() as u64);
                            self.metrics.set_pump_height(bundle.height);
                            info!(
                                "Pumped block {} with {} transactions",
                                bundle.height,
                                bundle.transaction_count()
                            );
                        }
                        Some(Err(e)) => {
                            error!("Giving up publishing block {}: {}", bundle.height, e);
                            return Err(e);
                        }
                        None => break,
                    }
                }
                WalkStep::WaitingForTip { .. } => {
                    if self.sleep(self.tip_poll_interval).await {
                        break;
                    }
                }
                WalkStep::Retry { delay, .. } => {
                    self.metrics.inc_rpc_errors();
                    if self.sleep(delay).await {
                        break;
                    }
                }
            }
        }

        info!("Pump stopped before block {}", self.walker.height());
        Ok(self.walker.height())
    }

    /// Sleep for `duration`; true when shutdown was requested meanwhile.
    async fn sleep(&mut self, duration: Duration) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(duration) => false,
            _ = stopped(&mut self.shutdown) => true,
        }
    }
}

async fn publish_with_retry<P: EventPublisher>(
    publisher: &P,
    metrics: &Metrics,
    backoff: ExponentialBackoff,
    bundle: &BlockBundle,
) -> Result<(), PumpError> {
    backoff::future::retry_notify(
        backoff,
        || async move {
            publisher.publish(bundle).await.map_err(|e| match e {
                PumpError::Publish(BusError::Serialization(_)) => backoff::Error::permanent(e),
                e => backoff::Error::transient(e),
            })
        },
        |e: PumpError, delay: Duration| {
            metrics.inc_publish_failures();
            warn!("Publishing block {} failed, retrying in {:?}: {}", bundle.height, delay, e);
        },
    )
    .await
}

/// Height the pump starts at: the configured height, but never at or below
/// a block already on `block_topic`; without either, genesis.
pub async fn resume_height(
    log: &EventLog,
    block_topic: &str,
    configured: Option<u64>,
) -> Result<u64, BusError> {
    let resume = log.last_height(block_topic).await?.map(|last| last + 1);
    let start = match (configured, resume) {
        (Some(configured), Some(resume)) if configured < resume => {
            warn!(
                "Configured start block {} is already published, resuming from {}",
                configured, resume
            );
            resume
        }
        (Some(configured), _) => configured,
        (None, resume) => resume.unwrap_or(0),
    };
    Ok(start)
}

/// Resolves once shutdown is requested; never if the sender is gone.
pub async fn stopped(shutdown: &mut watch::Receiver<bool>) {
    if shutdown.wait_for(|stop| *stop).await.is_err() {
        std::future::pending::<()>().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chainpump_db::{DbPool, NewEvent};

    const TOPIC: &str = "BITCOIN_BLOCK_PUMP";

    async fn log_with_heights(heights: impl IntoIterator<Item = u64>) -> EventLog {
        let db = DbPool::new(":memory:").await.unwrap();
        db.migrate().await.unwrap();
        let log = EventLog::new(db);
        let records: Vec<NewEvent> = heights
            .into_iter()
            .map(|height| NewEvent {
                topic: TOPIC.to_string(),
                key: "BITCOIN".to_string(),
                height: Some(height),
                payload: "{}".to_string(),
            })
            .collect();
        if !records.is_empty() {
            log.append(&records).await.unwrap();
        }
        log
    }

    #[tokio::test]
    async fn configured_start_never_rewinds_over_published_blocks() {
        let log = log_with_heights(0..=5).await;

        assert_eq!(resume_height(&log, TOPIC, Some(0)).await.unwrap(), 6);
        assert_eq!(resume_height(&log, TOPIC, Some(5)).await.unwrap(), 6);
        assert_eq!(resume_height(&log, TOPIC, None).await.unwrap(), 6);
    }

    #[tokio::test]
    async fn configured_start_ahead_of_the_log_wins() {
        let log = log_with_heights(0..=5).await;
        assert_eq!(resume_height(&log, TOPIC, Some(100)).await.unwrap(), 100);
    }

    #[tokio::test]
    async fn empty_log_starts_at_configured_height_or_genesis() {
        let log = log_with_heights([]).await;

        assert_eq!(resume_height(&log, TOPIC, Some(42)).await.unwrap(), 42);
        assert_eq!(resume_height(&log, TOPIC, None).await.unwrap(), 0);
    }
}
