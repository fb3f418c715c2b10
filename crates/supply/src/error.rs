use chainpump_db::DbError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SupplyError {
    #[error("supply storage error: {0}")]
    Storage(#[from] DbError),

    #[error("undecodable event at position {position}: {source}")]
    Decode {
        position: i64,
        #[source]
        source: serde_json::Error,
    },
}
