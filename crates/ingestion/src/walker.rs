//! Pull-based sequential walker over block heights.
//!
//! The walker never sleeps: it tells its consumer to wait or to retry after
//! a delay, and advances only when the consumer commits a published height.

use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::error::PumpError;
use crate::fetch::{BlockSource, FetchOutcome};
use crate::model::BlockBundle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalkerState {
    Advancing,
    WaitingForTip,
    Failed,
}

#[derive(Debug)]
pub enum WalkStep {
    /// Bundle at the cursor; yielded again until committed.
    Block(BlockBundle),
    /// The cursor is above the node tip.
    WaitingForTip { height: u64 },
    /// Fetching the cursor failed; pull again after `delay`.
    Retry {
        height: u64,
        delay: Duration,
        error: PumpError,
    },
}

/// Backoff used between failed fetches of the same height.
pub fn default_backoff() -> ExponentialBackoff {
    ExponentialBackoff {
        initial_interval: Duration::from_millis(500),
        max_interval: Duration::from_secs(60),
        max_elapsed_time: None,
        ..Default::default()
    }
}

pub struct BlockWalker<S> {
    source: S,
    height: u64,
    state: WalkerState,
    pending: Option<BlockBundle>,
    backoff: ExponentialBackoff,
    failures: u32,
    max_retries: Option<u32>,
}

impl<S: BlockSource> BlockWalker<S> {
    /// Walk from `start_height`; `max_retries` of `None` retries forever.
    pub fn new(source: S, start_height: u64, max_retries: Option<u32>) -> Self {
        Self {
            source,
            height: start_height,
            state: WalkerState::Advancing,
            pending: None,
            backoff: default_backoff(),
            failures: 0,
            max_retries,
        }
    }

    pub fn with_backoff(mut self, backoff: ExponentialBackoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// Next height to be committed.
    pub fn height(&self) -> u64 {
        self.height
    }

    pub fn state(&self) -> WalkerState {
        self.state
    }

    pub async fn next_step(&mut self) -> Result<WalkStep, PumpError> {
        if self.state == WalkerState::Failed {
            return Err(PumpError::WalkerFailed { height: self.height });
        }
        if let Some(bundle) = &self.pending {
            return Ok(WalkStep::Block(bundle.clone()));
        }

        let height = self.height;
        match self.source.fetch(height).await {
            Ok(FetchOutcome::Fetched(bundle)) => {
                debug!("Fetched block {} ({} transactions)", height, bundle.transaction_count());
                self.recovered();
                self.state = WalkerState::Advancing;
                self.pending = Some(bundle.clone());
                Ok(WalkStep::Block(bundle))
            }
            Ok(FetchOutcome::NotYetAvailable) => {
                if self.state != WalkerState::WaitingForTip {
                    info!("Reached chain tip, waiting for block {}", height);
                }
                self.recovered();
                self.state = WalkerState::WaitingForTip;
                Ok(WalkStep::WaitingForTip { height })
            }
            Err(err) => self.failed(height, err),
        }
    }

    /// Mark the pending bundle at `height` as published and move on.
    pub fn commit(&mut self, height: u64) -> Result<(), PumpError> {
        match &self.pending {
            Some(bundle) if bundle.height == height => {
                self.pending = None;
                self.height = height + 1;
                Ok(())
            }
            _ => Err(PumpError::OutOfOrderCommit {
                expected: self.height,
                got: height,
            }),
        }
    }

    fn recovered(&mut self) {
        if self.failures > 0 {
            info!("Block {} reachable again after {} failures", self.height, self.failures);
        }
        self.failures = 0;
        self.backoff.reset();
    }

    fn failed(&mut self, height: u64, err: PumpError) -> Result<WalkStep, PumpError> {
        self.failures += 1;
        let exhausted = match self.max_retries {
            Some(max) => self.failures >= max,
            None => false,
        };

        if exhausted || !err.is_retryable() {
            error!(height, attempts = self.failures, "Giving up on block: {}", err);
            self.state = WalkerState::Failed;
            return Err(PumpError::RetriesExhausted {
                height,
                attempts: self.failures,
                source: Box::new(err),
            });
        }

        let delay = self
            .backoff
            .next_backoff()
            .unwrap_or(self.backoff.max_interval);
        warn!(height, attempt = self.failures, ?delay, "Failed to fetch block: {}", err);
        Ok(WalkStep::Retry {
            height,
            delay,
            error: err,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::testing::FakeChain;
    use crate::fetch::BlockFetchStep;
    use std::sync::Arc;
    use tracing_test::traced_test;

    fn walker(chain: &Arc<FakeChain>, start: u64, max_retries: Option<u32>) -> BlockWalker<BlockFetchStep<FakeChain>> {
        BlockWalker::new(BlockFetchStep::new(chain.clone(), "BITCOIN", false), start, max_retries)
    }

    async fn expect_block(walker: &mut BlockWalker<BlockFetchStep<FakeChain>>) -> BlockBundle {
        match walker.next_step().await.unwrap() {
            WalkStep::Block(bundle) => bundle,
            other => panic!("expected a block, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn walks_to_tip_then_waits_for_the_next_block() {
        let chain = Arc::new(FakeChain::with_tip(2));
        let mut walker = walker(&chain, 0, Some(3));

        for height in 0..=2 {
            let bundle = expect_block(&mut walker).await;
            assert_eq!(bundle.height, height);
            walker.commit(height).unwrap();
        }

        for _ in 0..3 {
            assert!(matches!(
                walker.next_step().await.unwrap(),
                WalkStep::WaitingForTip { height: 3 }
            ));
            assert_eq!(walker.state(), WalkerState::WaitingForTip);
        }

        chain.push_block();
        let bundle = expect_block(&mut walker).await;
        assert_eq!(bundle.height, 3);
        assert_eq!(bundle.transactions.len(), 3);
        assert_eq!(walker.state(), WalkerState::Advancing);
    }

    #[tokio::test]
    #[traced_test]
    async fn waiting_at_the_tip_is_not_logged_as_a_failure() {
        let chain = Arc::new(FakeChain::with_tip(0));
        let mut walker = walker(&chain, 0, Some(3));
        expect_block(&mut walker).await;
        walker.commit(0).unwrap();

        for _ in 0..5 {
            assert!(matches!(
                walker.next_step().await.unwrap(),
                WalkStep::WaitingForTip { height: 1 }
            ));
        }

        assert!(logs_contain("Reached chain tip, waiting for block 1"));
        logs_assert(|lines: &[&str]| {
            match lines.iter().find(|line| line.contains("WARN") || line.contains("ERROR")) {
                Some(line) => Err(format!("tip wait logged as a failure: {}", line)),
                None => Ok(()),
            }
        });
        logs_assert(|lines: &[&str]| {
            match lines.iter().filter(|line| line.contains("Reached chain tip")).count() {
                1 => Ok(()),
                n => Err(format!("tip reached logged {} times", n)),
            }
        });
    }

    #[tokio::test]
    async fn pending_bundle_is_yielded_again_without_refetching() {
        let chain = Arc::new(FakeChain::with_tip(1));
        let mut walker = walker(&chain, 1, None);

        let first = expect_block(&mut walker).await;
        let second = expect_block(&mut walker).await;
        assert_eq!(first, second);
        assert_eq!(chain.calls.lock().unwrap().as_slice(), &[1]);
        assert_eq!(walker.height(), 1);
    }

    #[tokio::test]
    async fn commit_must_match_the_pending_height() {
        let chain = Arc::new(FakeChain::with_tip(1));
        let mut walker = walker(&chain, 0, None);

        assert!(matches!(walker.commit(0), Err(PumpError::OutOfOrderCommit { expected: 0, got: 0 })));
        expect_block(&mut walker).await;
        assert!(matches!(walker.commit(5), Err(PumpError::OutOfOrderCommit { .. })));
        walker.commit(0).unwrap();
        assert_eq!(walker.height(), 1);
    }

    #[tokio::test]
    async fn failures_back_off_then_recover() {
        let chain = Arc::new(FakeChain::with_tip(1));
        chain.fail_next(2);
        let mut walker = walker(&chain, 0, Some(5));

        let mut delays = Vec::new();
        for _ in 0..2 {
            match walker.next_step().await.unwrap() {
                WalkStep::Retry { height, delay, .. } => {
                    assert_eq!(height, 0);
                    delays.push(delay);
                }
                other => panic!("expected a retry, got {:?}", other),
            }
        }
        assert!(delays.iter().all(|d| !d.is_zero()));
        assert_eq!(walker.height(), 0);

        assert_eq!(expect_block(&mut walker).await.height, 0);
    }

    #[tokio::test]
    async fn exhausted_retries_are_fatal() {
        let chain = Arc::new(FakeChain::with_tip(1));
        chain.fail_next(10);
        let mut walker = walker(&chain, 0, Some(3));

        for _ in 0..2 {
            assert!(matches!(walker.next_step().await.unwrap(), WalkStep::Retry { .. }));
        }
        match walker.next_step().await {
            Err(PumpError::RetriesExhausted { height, attempts, .. }) => {
                assert_eq!(height, 0);
                assert_eq!(attempts, 3);
            }
            other => panic!("expected exhaustion, got {:?}", other),
        }
        assert_eq!(walker.state(), WalkerState::Failed);
        assert!(matches!(walker.next_step().await, Err(PumpError::WalkerFailed { height: 0 })));
    }
}
