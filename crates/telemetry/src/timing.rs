//! Call timing, decoupled from any concrete metrics backend.

use std::future::Future;
use std::time::{Duration, Instant};

/// Sink for named call durations.
pub trait Timing: Send + Sync {
    fn record(&self, name: &str, elapsed: Duration);
}

/// Discards every measurement.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopTiming;

impl Timing for NoopTiming {
    fn record(&self, _name: &str, _elapsed: Duration) {}
}

/// Await `fut` and record how long it took under `name`, whatever its outcome.
pub async fn with_timing<T, F>(timing: &dyn Timing, name: &str, fut: F) -> T
where
    F: Future<Output = T>,
{
    let start = Instant::now();
    let output = fut.await;
    timing.record(name, start.elapsed());
    output
}
