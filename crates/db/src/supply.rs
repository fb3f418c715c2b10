//! Supply checkpoint store.

use rust_decimal::Decimal;
use std::str::FromStr;
use tracing::info;

use crate::error::DbError;
use crate::models::{SupplyRow, SupplyState};
use crate::pool::DbPool;

#[derive(Clone)]
pub struct SupplyStore {
    db: DbPool,
}

impl SupplyStore {
    pub fn new(db: DbPool) -> Self {
        Self { db }
    }

    /// Last committed supply of `kind`, or the genesis state built by
    /// `genesis` (persisted immediately) when nothing was calculated yet.
    pub async fn get_last_calculated_supply<F>(
        &self,
        kind: &str,
        genesis: F,
    ) -> Result<SupplyState, DbError>
    where
        F: FnOnce() -> SupplyState,
    {
        let row = sqlx::query_as::<_, SupplyRow>(
            "SELECT kind, block_number, total_supply FROM supply WHERE kind = ?",
        )
        .bind(kind)
        .fetch_optional(self.db.pool())
        .await?;

        match row {
            Some(row) => row.try_into(),
            None => {
                let state = genesis();
                info!(
                    "No supply checkpoint for {}, starting from genesis supply {}",
                    kind, state.total_supply
                );
                self.upsert(&state).await?;
                Ok(state)
            }
        }
    }

    pub async fn upsert(&self, state: &SupplyState) -> Result<(), DbError> {
        sqlx::query(UPSERT_SUPPLY)
            .bind(&state.kind)
            .bind(state.block_number as i64)
            .bind(state.total_supply.to_string())
            .execute(self.db.pool())
            .await?;
        Ok(())
    }

    /// Store `state` and the consumer offset as one unit: both land or
    /// neither does.
    pub async fn commit_batch(
        &self,
        state: &SupplyState,
        group: &str,
        topic: &str,
        next_position: i64,
    ) -> Result<(), DbError> {
        let mut tx = self.db.pool().begin().await?;

        sqlx::query(UPSERT_SUPPLY)
            .bind(&state.kind)
            .bind(state.block_number as i64)
            .bind(state.total_supply.to_string())
            .execute(&mut *tx)
            .await?;

        sqlx::query(
            r#"
            INSERT INTO consumer_offsets (group_id, topic, next_position, updated_at)
            VALUES (?, ?, ?, datetime('now'))
            ON CONFLICT (group_id, topic) DO UPDATE SET
                next_position = excluded.next_position,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(group)
        .bind(topic)
        .bind(next_position)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }
}

const UPSERT_SUPPLY: &str = r#"
    INSERT INTO supply (kind, block_number, total_supply, updated_at)
    VALUES (?, ?, ?, datetime('now'))
    ON CONFLICT (kind) DO UPDATE SET
        block_number = excluded.block_number,
        total_supply = excluded.total_supply,
        updated_at = excluded.updated_at
"#;

impl TryFrom<SupplyRow> for SupplyState {
    type Error = DbError;

    fn try_from(row: SupplyRow) -> Result<Self, Self::Error> {
        let total_supply = Decimal::from_str(&row.total_supply).map_err(|e| DbError::Corrupt {
            table: "supply",
            message: format!("total_supply {:?}: {}", row.total_supply, e),
        })?;
        let block_number = u64::try_from(row.block_number).map_err(|_| DbError::Corrupt {
            table: "supply",
            message: format!("negative block_number {}", row.block_number),
        })?;

        Ok(SupplyState {
            kind: row.kind,
            block_number,
            total_supply,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_log::EventLog;

    async fn store() -> (SupplyStore, EventLog) {
        let db = DbPool::new(":memory:").await.unwrap();
        db.migrate().await.unwrap();
        (SupplyStore::new(db.clone()), EventLog::new(db))
    }

    #[tokio::test]
    async fn genesis_is_used_and_persisted_once() {
        let (store, _) = store().await;

        let first = store
            .get_last_calculated_supply("BITCOIN", || SupplyState::genesis("BITCOIN", Decimal::ZERO))
            .await
            .unwrap();
        assert_eq!(first.block_number, 0);

        let second = store
            .get_last_calculated_supply("BITCOIN", || {
                SupplyState::genesis("BITCOIN", Decimal::from(999))
            })
            .await
            .unwrap();
        assert_eq!(second.total_supply, Decimal::ZERO);
    }

    #[tokio::test]
    async fn commit_batch_moves_state_and_offset_together() {
        let (store, log) = store().await;
        let state = SupplyState {
            kind: "BITCOIN".to_string(),
            block_number: 12,
            total_supply: Decimal::new(65000000000, 8),
        };

        store
            .commit_batch(&state, "bitcoin-supply-process", "BITCOIN_BLOCK_PUMP", 13)
            .await
            .unwrap();

        let loaded = store
            .get_last_calculated_supply("BITCOIN", || unreachable!())
            .await
            .unwrap();
        assert_eq!(loaded, state);
        assert_eq!(
            log.committed_position("bitcoin-supply-process", "BITCOIN_BLOCK_PUMP")
                .await
                .unwrap(),
            13
        );
    }

    #[tokio::test]
    async fn unparsable_supply_row_is_reported_as_corrupt() {
        let (store, _) = store().await;
        sqlx::query("INSERT INTO supply (kind, block_number, total_supply) VALUES ('BITCOIN', 3, 'lots')")
            .execute(store.db.pool())
            .await
            .unwrap();

        let err = store
            .get_last_calculated_supply("BITCOIN", || unreachable!())
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::Corrupt { table: "supply", .. }), "got {:?}", err);
    }
}
