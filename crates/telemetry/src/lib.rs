//! Observability for the chain pump: logging, metrics and call timing.

pub mod logging;
pub mod metrics;
pub mod timing;

pub use logging::init_logging;
pub use metrics::Metrics;
pub use timing::{with_timing, NoopTiming, Timing};
