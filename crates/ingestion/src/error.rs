//! Error taxonomy of the pump.
//!
//! "Height beyond tip" is not an error: it travels as `Option::None` or
//! `FetchOutcome::NotYetAvailable`.

use thiserror::Error;

use crate::bus::BusError;

#[derive(Debug, Error)]
pub enum PumpError {
    /// Transport failure, non-2xx status or undecodable body.
    #[error("communication error during {context}: {message}")]
    Communication { context: String, message: String },

    /// The node answered with a non-null `error` field.
    #[error("rpc {method} failed with code {code}: {message}")]
    Rpc {
        method: String,
        code: i64,
        message: String,
    },

    /// The hash resolved but the block behind it could not be fetched.
    #[error("node resolved height {height} to {hash} but returned no block")]
    InconsistentNode { height: u64, hash: String },

    #[error("malformed {what}: {message}")]
    Conversion { what: &'static str, message: String },

    #[error("publish failed: {0}")]
    Publish(#[from] BusError),

    #[error("commit of height {got} while height {expected} is pending")]
    OutOfOrderCommit { expected: u64, got: u64 },

    #[error("giving up on height {height} after {attempts} consecutive failures: {source}")]
    RetriesExhausted {
        height: u64,
        attempts: u32,
        source: Box<PumpError>,
    },

    #[error("walker stopped at height {height} after a fatal failure")]
    WalkerFailed { height: u64 },
}

impl PumpError {
    pub fn communication(context: impl Into<String>, message: impl ToString) -> Self {
        PumpError::Communication {
            context: context.into(),
            message: message.to_string(),
        }
    }

    pub fn conversion(what: &'static str, message: impl Into<String>) -> Self {
        PumpError::Conversion {
            what,
            message: message.into(),
        }
    }

    /// Whether retrying the same height may succeed.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            PumpError::OutOfOrderCommit { .. }
                | PumpError::RetriesExhausted { .. }
                | PumpError::WalkerFailed { .. }
        )
    }
}

/// Startup configuration errors; the process must not start polling.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(&'static str),

    #[error("invalid value {value:?} for {name}: {reason}")]
    Invalid {
        name: &'static str,
        value: String,
        reason: String,
    },
}
