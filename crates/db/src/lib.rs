//! Storage layer for the chain pump.
//!
//! Provides SQLite storage for the durable event log that carries pump
//! events and for the supply checkpoints written by the recalculation
//! process.

pub mod error;
pub mod event_log;
pub mod models;
pub mod pool;
pub mod supply;

pub use error::DbError;
pub use event_log::EventLog;
pub use models::{EventRecord, NewEvent, SupplyState};
pub use pool::DbPool;
pub use supply::SupplyStore;
