use std::sync::Arc;

use chrono::{DateTime, Utc};
use metrics::counter;
use thiserror::Error;

use order_desk_storage::{Database, IntegrityError, IntegrityValidator, NewOrder};

/// One entry of a bulk batch: one order for `quantity` units of one item.
#[derive(Debug, Clone, Copy)]
pub struct BatchEntry {
    pub customer_id: i64,
    pub item_id: i64,
    pub quantity: u32,
}

/// Result of a committed batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchOutcome {
    pub committed: usize,
    pub order_ids: Vec<i64>,
}

/// Commits a batch of line-item requests as one all-or-nothing unit.
///
/// Every referenced customer and item is validated before any row is
/// written; a single invalid entry rejects the whole batch.
#[derive(Clone)]
pub struct BatchCoordinator {
    database: Database,
    clock: Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>,
}

impl BatchCoordinator {
    pub fn new(database: Database, clock: Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>) -> Self {
        Self { database, clock }
    }

    fn now(&self) -> DateTime<Utc> {
        (self.clock)()
    }

    pub async fn commit(&self, entries: &[BatchEntry]) -> Result<BatchOutcome, BatchError> {
        let orders = self.database.orders();
        let mut tx = self.database.begin().await?;

        for (index, entry) in entries.iter().enumerate() {
            IntegrityValidator::customer_exists(&mut tx, entry.customer_id)
                .await
                .map_err(|err| BatchError::invalid(index, err))?;
            IntegrityValidator::item_exists(&mut tx, entry.item_id)
                .await
                .map_err(|err| BatchError::invalid(index, err))?;
        }

        let created_at = self.now();
        let mut order_ids = Vec::with_capacity(entries.len());
        for entry in entries {
            let order_id = orders
                .insert(
                    &mut tx,
                    NewOrder {
                        created_at,
                        customer_id: entry.customer_id,
                        notes: None,
                    },
                )
                .await?;
            for _ in 0..entry.quantity {
                orders.insert_line(&mut tx, order_id, entry.item_id).await?;
            }
            order_ids.push(order_id);
        }

        tx.commit().await?;
        counter!("batch_commits_total", "result" => "committed").increment(1);

        Ok(BatchOutcome {
            committed: order_ids.len(),
            order_ids,
        })
    }
}

/// Errors that reject a whole batch.
#[derive(Debug, Error)]
pub enum BatchError {
    #[error("entry {index}: {source}")]
    InvalidEntry {
        index: usize,
        source: IntegrityError,
    },
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl BatchError {
    fn invalid(index: usize, err: IntegrityError) -> Self {
        match err {
            IntegrityError::Database(err) => Self::Database(err),
            missing => Self::InvalidEntry {
                index,
                source: missing,
            },
        }
    }
}
