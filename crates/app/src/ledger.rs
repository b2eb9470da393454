use std::sync::Arc;

use chrono::{DateTime, Utc};
use metrics::counter;
use thiserror::Error;

use order_desk_core::types::{Order, OrderView};
use order_desk_storage::{Database, IntegrityError, IntegrityValidator, NewOrder, OrderError};

/// Executes order operations, wrapping each write in one transaction and
/// running every reference check before any row is written.
#[derive(Clone)]
pub struct OrderLedger {
    database: Database,
    clock: Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>,
}

impl OrderLedger {
    pub fn new(database: Database, clock: Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>) -> Self {
        Self { database, clock }
    }

    fn now(&self) -> DateTime<Utc> {
        (self.clock)()
    }

    /// Creates an order with one line row per item id.
    ///
    /// The customer and every item are validated inside the write
    /// transaction; on any missing reference nothing is persisted.
    pub async fn create(
        &self,
        customer_id: i64,
        line_items: &[i64],
        notes: Option<&str>,
    ) -> Result<Order, LedgerError> {
        let orders = self.database.orders();
        let mut tx = self.database.begin().await?;

        IntegrityValidator::customer_exists(&mut tx, customer_id).await?;
        for &item_id in line_items {
            IntegrityValidator::item_exists(&mut tx, item_id).await?;
        }

        let created_at = self.now();
        let order_id = orders
            .insert(
                &mut tx,
                NewOrder {
                    created_at,
                    customer_id,
                    notes,
                },
            )
            .await?;
        for &item_id in line_items {
            orders.insert_line(&mut tx, order_id, item_id).await?;
        }

        tx.commit().await?;
        counter!("orders_created_total").increment(1);

        Ok(Order {
            id: order_id,
            created_at,
            customer_id,
            notes: notes.map(str::to_string),
        })
    }

    /// Loads the resolved read-side view of an order.
    pub async fn get(&self, id: i64) -> Result<OrderView, LedgerError> {
        Ok(self.database.orders().fetch_view(id).await?)
    }

    /// Rewrites the mutable fields of an order; reassignment to a missing
    /// customer is rejected before any mutation.
    pub async fn update(
        &self,
        id: i64,
        customer_id: i64,
        notes: Option<&str>,
    ) -> Result<Order, LedgerError> {
        let orders = self.database.orders();
        let mut tx = self.database.begin().await?;

        IntegrityValidator::customer_exists(&mut tx, customer_id).await?;
        let order = orders.update(&mut tx, id, customer_id, notes).await?;
        tx.commit().await?;

        Ok(order)
    }

    /// Deletes an order and the line rows it owns.
    pub async fn delete(&self, id: i64) -> Result<(), LedgerError> {
        Ok(self.database.orders().delete(id).await?)
    }
}

/// Errors surfaced by the order ledger.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("order not found")]
    NotFound,
    #[error("{0}")]
    MissingReference(IntegrityError),
    #[error("database error: {0}")]
    Database(sqlx::Error),
}

impl From<IntegrityError> for LedgerError {
    fn from(err: IntegrityError) -> Self {
        match err {
            IntegrityError::Database(err) => Self::Database(err),
            missing => Self::MissingReference(missing),
        }
    }
}

impl From<OrderError> for LedgerError {
    fn from(err: OrderError) -> Self {
        match err {
            OrderError::NotFound => Self::NotFound,
            OrderError::Database(err) => Self::Database(err),
        }
    }
}

impl From<sqlx::Error> for LedgerError {
    fn from(err: sqlx::Error) -> Self {
        Self::Database(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn setup() -> (OrderLedger, Database, tempfile::TempDir) {
        let dir = tempfile::tempdir().expect("tempdir");
        let url = format!("sqlite://{}", dir.path().join("orders.db").display());
        let database = Database::connect(&url).await.expect("connect");
        database.provision().await.expect("provision");
        let ledger = OrderLedger::new(database.clone(), Arc::new(Utc::now));
        (ledger, database, dir)
    }

    async fn count(database: &Database, table: &str) -> i64 {
        let row: (i64,) = sqlx::query_as(&format!("SELECT COUNT(*) FROM {table}"))
            .fetch_one(database.pool())
            .await
            .expect("count");
        row.0
    }

    #[tokio::test]
    async fn create_then_read_resolves_references() {
        let (ledger, database, _dir) = setup().await;
        let customer = database
            .customers()
            .insert("Alice", "5551234")
            .await
            .expect("customer");
        let item = database.items().insert("Widget", 9.99).await.expect("item");

        let order = ledger
            .create(customer.id, &[item.id], None)
            .await
            .expect("create");

        let view = ledger.get(order.id).await.expect("view");
        assert_eq!(view.customer, "Alice");
        assert_eq!(view.lines.len(), 1);
        assert_eq!(view.lines[0].item, "Widget");
        assert_eq!(view.lines[0].price, 9.99);
    }

    #[tokio::test]
    async fn missing_customer_writes_nothing() {
        let (ledger, database, _dir) = setup().await;
        let item = database.items().insert("Widget", 9.99).await.expect("item");

        let err = ledger.create(42, &[item.id], None).await.unwrap_err();
        assert!(matches!(
            err,
            LedgerError::MissingReference(IntegrityError::MissingCustomer(42))
        ));
        assert_eq!(count(&database, "orders").await, 0);
        assert_eq!(count(&database, "order_lines").await, 0);
    }

    #[tokio::test]
    async fn one_missing_item_writes_nothing_and_is_named() {
        let (ledger, database, _dir) = setup().await;
        let customer = database
            .customers()
            .insert("Alice", "5551234")
            .await
            .expect("customer");
        let item = database.items().insert("Widget", 9.99).await.expect("item");

        let err = ledger
            .create(customer.id, &[item.id, 99], None)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            LedgerError::MissingReference(IntegrityError::MissingItem(99))
        ));
        assert_eq!(count(&database, "orders").await, 0);
        assert_eq!(count(&database, "order_lines").await, 0);
    }

    #[tokio::test]
    async fn fixed_clock_stamps_commit_time() {
        let (_, database, _dir) = setup().await;
        let fixed: DateTime<Utc> = "2024-06-01T12:00:00Z".parse().expect("timestamp");
        let ledger = OrderLedger::new(database.clone(), Arc::new(move || fixed));

        let customer = database
            .customers()
            .insert("Alice", "5551234")
            .await
            .expect("customer");
        let item = database.items().insert("Widget", 9.99).await.expect("item");

        let order = ledger
            .create(customer.id, &[item.id], Some("rush"))
            .await
            .expect("create");
        assert_eq!(order.created_at, fixed);

        let view = ledger.get(order.id).await.expect("view");
        assert_eq!(view.created_at, fixed);
        assert_eq!(view.notes.as_deref(), Some("rush"));
    }

    #[tokio::test]
    async fn update_rejects_missing_customer_before_mutation() {
        let (ledger, database, _dir) = setup().await;
        let customer = database
            .customers()
            .insert("Alice", "5551234")
            .await
            .expect("customer");
        let item = database.items().insert("Widget", 9.99).await.expect("item");
        let order = ledger
            .create(customer.id, &[item.id], Some("original"))
            .await
            .expect("create");

        let err = ledger.update(order.id, 77, None).await.unwrap_err();
        assert!(matches!(
            err,
            LedgerError::MissingReference(IntegrityError::MissingCustomer(77))
        ));

        let view = ledger.get(order.id).await.expect("view");
        assert_eq!(view.notes.as_deref(), Some("original"));
    }

    #[tokio::test]
    async fn delete_removes_order_and_lines() {
        let (ledger, database, _dir) = setup().await;
        let customer = database
            .customers()
            .insert("Alice", "5551234")
            .await
            .expect("customer");
        let item = database.items().insert("Widget", 9.99).await.expect("item");
        let order = ledger
            .create(customer.id, &[item.id], None)
            .await
            .expect("create");

        ledger.delete(order.id).await.expect("delete");
        assert!(matches!(
            ledger.get(order.id).await,
            Err(LedgerError::NotFound)
        ));
        assert_eq!(count(&database, "order_lines").await, 0);

        assert!(matches!(
            ledger.delete(order.id).await,
            Err(LedgerError::NotFound)
        ));
    }
}
