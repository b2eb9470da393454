use std::{str::FromStr, time::Duration};

use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous},
    Row, Sqlite, SqlitePool, Transaction,
};
use thiserror::Error;

use order_desk_core::types::{Customer, Item, Order, OrderLineView, OrderView};

/// Top-level database handle that owns the SQLite connection pool.
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Establishes a new SQLite connection pool for the provided connection string.
    ///
    /// Foreign-key enforcement, WAL journaling and the busy timeout are part
    /// of the connect options so every pooled connection gets them.
    pub async fn connect(database_url: &str) -> Result<Self, StorageError> {
        let options = SqliteConnectOptions::from_str(database_url)
            .map_err(StorageError::Connect)?
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(StorageError::Connect)?;

        Ok(Self { pool })
    }

    /// Creates the four relations when absent, in foreign-key dependency
    /// order (customers and items before orders, orders before order_lines).
    ///
    /// Safe to invoke repeatedly; touches no data rows.
    pub async fn provision(&self) -> Result<(), StorageError> {
        let mut tx = self.pool.begin().await.map_err(StorageError::Provision)?;
        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&mut *tx)
                .await
                .map_err(StorageError::Provision)?;
        }
        tx.commit().await.map_err(StorageError::Provision)?;
        Ok(())
    }

    /// Begins a transaction scoped to one logical write operation.
    pub async fn begin(&self) -> Result<Transaction<'_, Sqlite>, sqlx::Error> {
        self.pool.begin().await
    }

    /// Returns a handle for customer rows.
    pub fn customers(&self) -> CustomerRepository {
        CustomerRepository {
            pool: self.pool.clone(),
        }
    }

    /// Returns a handle for catalog item rows.
    pub fn items(&self) -> ItemRepository {
        ItemRepository {
            pool: self.pool.clone(),
        }
    }

    /// Returns a handle for order rows and their line rows.
    pub fn orders(&self) -> OrderRepository {
        OrderRepository {
            pool: self.pool.clone(),
        }
    }

    /// Exposes the inner pool when lower level access is required.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

const SCHEMA: [&str; 4] = [
    "CREATE TABLE IF NOT EXISTS customers (\
         id INTEGER PRIMARY KEY,\
         name TEXT NOT NULL,\
         phone TEXT NOT NULL\
     )",
    "CREATE TABLE IF NOT EXISTS items (\
         id INTEGER PRIMARY KEY,\
         name TEXT NOT NULL,\
         price REAL NOT NULL\
     )",
    "CREATE TABLE IF NOT EXISTS orders (\
         id INTEGER PRIMARY KEY,\
         created_at TEXT NOT NULL,\
         customer_id INTEGER NOT NULL,\
         notes TEXT,\
         FOREIGN KEY (customer_id) REFERENCES customers (id)\
     )",
    "CREATE TABLE IF NOT EXISTS order_lines (\
         order_id INTEGER NOT NULL,\
         item_id INTEGER NOT NULL,\
         FOREIGN KEY (order_id) REFERENCES orders (id),\
         FOREIGN KEY (item_id) REFERENCES items (id)\
     )",
];

/// General storage level errors.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("failed to connect to sqlite: {0}")]
    Connect(sqlx::Error),
    #[error("failed to provision schema: {0}")]
    Provision(sqlx::Error),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Whether a natural-key lookup resolved an existing row or inserted one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NaturalKeyOutcome {
    Existing,
    Created,
}

impl NaturalKeyOutcome {
    pub fn was_created(self) -> bool {
        matches!(self, Self::Created)
    }
}

/// Errors from customer and item repositories.
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("record not found")]
    NotFound,
    #[error("record is referenced by existing orders")]
    Referenced,
    #[error("database error: {0}")]
    Database(sqlx::Error),
}

impl From<sqlx::Error> for CatalogError {
    fn from(err: sqlx::Error) -> Self {
        Self::Database(err)
    }
}

// SQLITE_CONSTRAINT_FOREIGNKEY: the row is still referenced.
const SQLITE_FOREIGN_KEY_CODE: &str = "787";

fn map_delete_error(err: sqlx::Error) -> CatalogError {
    match err {
        sqlx::Error::Database(db_err) => {
            if db_err.code().as_deref() == Some(SQLITE_FOREIGN_KEY_CODE) {
                CatalogError::Referenced
            } else {
                CatalogError::Database(sqlx::Error::Database(db_err))
            }
        }
        other => CatalogError::Database(other),
    }
}

/// Repository for customer rows.
#[derive(Clone)]
pub struct CustomerRepository {
    pool: SqlitePool,
}

impl CustomerRepository {
    /// Inserts a new customer. Direct creation always inserts, even when the
    /// phone duplicates an existing row; only the import path dedups.
    pub async fn insert(&self, name: &str, phone: &str) -> Result<Customer, CatalogError> {
        let row = sqlx::query("INSERT INTO customers (name, phone) VALUES (?, ?) RETURNING id")
            .bind(name)
            .bind(phone)
            .fetch_one(&self.pool)
            .await?;

        Ok(Customer {
            id: row.get("id"),
            name: name.to_string(),
            phone: phone.to_string(),
        })
    }

    pub async fn fetch(&self, id: i64) -> Result<Customer, CatalogError> {
        let row = sqlx::query("SELECT id, name, phone FROM customers WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(CatalogError::NotFound)?;

        Ok(Customer {
            id: row.get("id"),
            name: row.get("name"),
            phone: row.get("phone"),
        })
    }

    pub async fn update(&self, id: i64, name: &str, phone: &str) -> Result<Customer, CatalogError> {
        let result = sqlx::query("UPDATE customers SET name = ?, phone = ? WHERE id = ?")
            .bind(name)
            .bind(phone)
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(CatalogError::NotFound);
        }

        Ok(Customer {
            id,
            name: name.to_string(),
            phone: phone.to_string(),
        })
    }

    /// Deletes a customer; rejected with [`CatalogError::Referenced`] while
    /// any order still points at it.
    pub async fn delete(&self, id: i64) -> Result<(), CatalogError> {
        let result = sqlx::query("DELETE FROM customers WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(map_delete_error)?;

        if result.rows_affected() == 0 {
            return Err(CatalogError::NotFound);
        }
        Ok(())
    }

    /// Resolves a customer by phone, inserting one on a miss.
    ///
    /// The lookup and insert share the caller's transaction so concurrent
    /// imports cannot both miss and insert duplicates.
    pub async fn find_or_create_by_phone(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        phone: &str,
        name: &str,
    ) -> Result<(Customer, NaturalKeyOutcome), CatalogError> {
        let existing = sqlx::query("SELECT id, name FROM customers WHERE phone = ? LIMIT 1")
            .bind(phone)
            .fetch_optional(&mut **tx)
            .await?;

        if let Some(row) = existing {
            return Ok((
                Customer {
                    id: row.get("id"),
                    name: row.get("name"),
                    phone: phone.to_string(),
                },
                NaturalKeyOutcome::Existing,
            ));
        }

        let row = sqlx::query("INSERT INTO customers (name, phone) VALUES (?, ?) RETURNING id")
            .bind(name)
            .bind(phone)
            .fetch_one(&mut **tx)
            .await?;

        Ok((
            Customer {
                id: row.get("id"),
                name: name.to_string(),
                phone: phone.to_string(),
            },
            NaturalKeyOutcome::Created,
        ))
    }
}

/// Repository for catalog item rows.
#[derive(Clone)]
pub struct ItemRepository {
    pool: SqlitePool,
}

impl ItemRepository {
    pub async fn insert(&self, name: &str, price: f64) -> Result<Item, CatalogError> {
        let row = sqlx::query("INSERT INTO items (name, price) VALUES (?, ?) RETURNING id")
            .bind(name)
            .bind(price)
            .fetch_one(&self.pool)
            .await?;

        Ok(Item {
            id: row.get("id"),
            name: name.to_string(),
            price,
        })
    }

    pub async fn fetch(&self, id: i64) -> Result<Item, CatalogError> {
        let row = sqlx::query("SELECT id, name, price FROM items WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(CatalogError::NotFound)?;

        Ok(Item {
            id: row.get("id"),
            name: row.get("name"),
            price: row.get("price"),
        })
    }

    pub async fn update(&self, id: i64, name: &str, price: f64) -> Result<Item, CatalogError> {
        let result = sqlx::query("UPDATE items SET name = ?, price = ? WHERE id = ?")
            .bind(name)
            .bind(price)
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(CatalogError::NotFound);
        }

        Ok(Item {
            id,
            name: name.to_string(),
            price,
        })
    }

    /// Deletes an item; rejected with [`CatalogError::Referenced`] while any
    /// order line still points at it.
    pub async fn delete(&self, id: i64) -> Result<(), CatalogError> {
        let result = sqlx::query("DELETE FROM items WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(map_delete_error)?;

        if result.rows_affected() == 0 {
            return Err(CatalogError::NotFound);
        }
        Ok(())
    }

    /// Resolves an item by name, inserting one on a miss. Same transaction
    /// discipline as [`CustomerRepository::find_or_create_by_phone`].
    pub async fn find_or_create_by_name(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        name: &str,
        price: f64,
    ) -> Result<(Item, NaturalKeyOutcome), CatalogError> {
        let existing = sqlx::query("SELECT id, price FROM items WHERE name = ? LIMIT 1")
            .bind(name)
            .fetch_optional(&mut **tx)
            .await?;

        if let Some(row) = existing {
            return Ok((
                Item {
                    id: row.get("id"),
                    name: name.to_string(),
                    price: row.get("price"),
                },
                NaturalKeyOutcome::Existing,
            ));
        }

        let row = sqlx::query("INSERT INTO items (name, price) VALUES (?, ?) RETURNING id")
            .bind(name)
            .bind(price)
            .fetch_one(&mut **tx)
            .await?;

        Ok((
            Item {
                id: row.get("id"),
                name: name.to_string(),
                price,
            },
            NaturalKeyOutcome::Created,
        ))
    }
}

/// Data required to insert a new order row.
pub struct NewOrder<'a> {
    pub created_at: DateTime<Utc>,
    pub customer_id: i64,
    pub notes: Option<&'a str>,
}

/// Errors from the order repository.
#[derive(Debug, Error)]
pub enum OrderError {
    #[error("order not found")]
    NotFound,
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

#[derive(Debug, sqlx::FromRow)]
struct OrderHeaderRow {
    id: i64,
    created_at: DateTime<Utc>,
    customer_name: String,
    notes: Option<String>,
}

#[derive(Debug, sqlx::FromRow)]
struct OrderLineRow {
    item_name: String,
    item_price: f64,
}

/// Repository for order rows and the line rows they own.
#[derive(Clone)]
pub struct OrderRepository {
    pool: SqlitePool,
}

impl OrderRepository {
    /// Inserts an order row inside the caller's transaction, returning its id.
    pub async fn insert(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        record: NewOrder<'_>,
    ) -> Result<i64, sqlx::Error> {
        let row = sqlx::query(
            "INSERT INTO orders (created_at, customer_id, notes) VALUES (?, ?, ?) RETURNING id",
        )
        .bind(to_rfc3339(record.created_at))
        .bind(record.customer_id)
        .bind(record.notes)
        .fetch_one(&mut **tx)
        .await?;

        Ok(row.get("id"))
    }

    /// Inserts one line row inside the caller's transaction.
    pub async fn insert_line(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        order_id: i64,
        item_id: i64,
    ) -> Result<(), sqlx::Error> {
        sqlx::query("INSERT INTO order_lines (order_id, item_id) VALUES (?, ?)")
            .bind(order_id)
            .bind(item_id)
            .execute(&mut **tx)
            .await?;
        Ok(())
    }

    /// Loads an order with its customer name and line items resolved.
    pub async fn fetch_view(&self, id: i64) -> Result<OrderView, OrderError> {
        let header = sqlx::query_as::<_, OrderHeaderRow>(
            "SELECT o.id, o.created_at, c.name AS customer_name, o.notes \
               FROM orders AS o \
               JOIN customers AS c ON c.id = o.customer_id \
              WHERE o.id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(OrderError::NotFound)?;

        let lines = sqlx::query_as::<_, OrderLineRow>(
            "SELECT i.name AS item_name, i.price AS item_price \
               FROM order_lines AS l \
               JOIN items AS i ON i.id = l.item_id \
              WHERE l.order_id = ? \
              ORDER BY l.rowid",
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await?;

        Ok(OrderView {
            id: header.id,
            created_at: header.created_at,
            customer: header.customer_name,
            notes: header.notes,
            lines: lines
                .into_iter()
                .map(|line| OrderLineView {
                    item: line.item_name,
                    price: line.item_price,
                })
                .collect(),
        })
    }

    /// Rewrites the mutable fields of an order inside the caller's
    /// transaction. Reference validation is the caller's responsibility.
    pub async fn update(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        id: i64,
        customer_id: i64,
        notes: Option<&str>,
    ) -> Result<Order, OrderError> {
        let row = sqlx::query(
            "UPDATE orders SET customer_id = ?, notes = ? WHERE id = ? \
             RETURNING id, created_at, customer_id, notes",
        )
        .bind(customer_id)
        .bind(notes)
        .bind(id)
        .fetch_optional(&mut **tx)
        .await?
        .ok_or(OrderError::NotFound)?;

        Ok(Order {
            id: row.get("id"),
            created_at: row.get("created_at"),
            customer_id: row.get("customer_id"),
            notes: row.get("notes"),
        })
    }

    /// Deletes an order together with the line rows it owns.
    pub async fn delete(&self, id: i64) -> Result<(), OrderError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM order_lines WHERE order_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        let result = sqlx::query("DELETE FROM orders WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        if result.rows_affected() == 0 {
            // Dropping the transaction rolls back the line deletion.
            return Err(OrderError::NotFound);
        }

        tx.commit().await?;
        Ok(())
    }
}

/// A referenced entity that does not exist at commit time.
#[derive(Debug, Error)]
pub enum IntegrityError {
    #[error("customer {0} does not exist")]
    MissingCustomer(i64),
    #[error("item {0} does not exist")]
    MissingItem(i64),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Read-only existence checks run inside the writing transaction, so the
/// validated rows cannot disappear before the write commits.
pub struct IntegrityValidator;

impl IntegrityValidator {
    pub async fn customer_exists(
        tx: &mut Transaction<'_, Sqlite>,
        id: i64,
    ) -> Result<(), IntegrityError> {
        let row = sqlx::query("SELECT 1 FROM customers WHERE id = ?")
            .bind(id)
            .fetch_optional(&mut **tx)
            .await?;

        if row.is_none() {
            return Err(IntegrityError::MissingCustomer(id));
        }
        Ok(())
    }

    pub async fn item_exists(
        tx: &mut Transaction<'_, Sqlite>,
        id: i64,
    ) -> Result<(), IntegrityError> {
        let row = sqlx::query("SELECT 1 FROM items WHERE id = ?")
            .bind(id)
            .fetch_optional(&mut **tx)
            .await?;

        if row.is_none() {
            return Err(IntegrityError::MissingItem(id));
        }
        Ok(())
    }
}

fn to_rfc3339(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Millis, true)
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn setup_db() -> (Database, tempfile::TempDir) {
        let dir = tempfile::tempdir().expect("tempdir");
        let url = format!("sqlite://{}", dir.path().join("orders.db").display());
        let db = Database::connect(&url).await.expect("connect");
        db.provision().await.expect("provision");
        (db, dir)
    }

    async fn count(db: &Database, table: &str) -> i64 {
        let row: (i64,) = sqlx::query_as(&format!("SELECT COUNT(*) FROM {table}"))
            .fetch_one(db.pool())
            .await
            .expect("count");
        row.0
    }

    #[tokio::test]
    async fn provision_is_idempotent() {
        let (db, _dir) = setup_db().await;
        db.provision().await.expect("second provision");

        let tables: (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' \
             AND name IN ('customers', 'items', 'orders', 'order_lines')",
        )
        .fetch_one(db.pool())
        .await
        .expect("fetch tables");
        assert_eq!(tables.0, 4);
    }

    #[tokio::test]
    async fn customer_roundtrip() {
        let (db, _dir) = setup_db().await;
        let repo = db.customers();

        let created = repo.insert("Alice", "5551234").await.expect("insert");
        let fetched = repo.fetch(created.id).await.expect("fetch");
        assert_eq!(fetched, created);

        let updated = repo
            .update(created.id, "Alicia", "5559999")
            .await
            .expect("update");
        assert_eq!(updated.name, "Alicia");
        assert_eq!(repo.fetch(created.id).await.expect("refetch"), updated);

        repo.delete(created.id).await.expect("delete");
        assert!(matches!(
            repo.fetch(created.id).await,
            Err(CatalogError::NotFound)
        ));
    }

    #[tokio::test]
    async fn item_roundtrip() {
        let (db, _dir) = setup_db().await;
        let repo = db.items();

        let created = repo.insert("Widget", 9.99).await.expect("insert");
        let fetched = repo.fetch(created.id).await.expect("fetch");
        assert_eq!(fetched, created);

        let updated = repo.update(created.id, "Widget XL", 12.5).await.expect("update");
        assert_eq!(updated.price, 12.5);
    }

    #[tokio::test]
    async fn delete_missing_rows_report_not_found() {
        let (db, _dir) = setup_db().await;

        assert!(matches!(
            db.customers().delete(42).await,
            Err(CatalogError::NotFound)
        ));
        assert!(matches!(
            db.items().delete(42).await,
            Err(CatalogError::NotFound)
        ));
        assert!(matches!(
            db.orders().delete(42).await,
            Err(OrderError::NotFound)
        ));
        assert_eq!(count(&db, "customers").await, 0);
    }

    #[tokio::test]
    async fn deleting_referenced_customer_is_rejected() {
        let (db, _dir) = setup_db().await;
        let customer = db.customers().insert("Alice", "5551234").await.expect("customer");
        let item = db.items().insert("Widget", 9.99).await.expect("item");

        let orders = db.orders();
        let mut tx = db.begin().await.expect("begin");
        let order_id = orders
            .insert(
                &mut tx,
                NewOrder {
                    created_at: Utc::now(),
                    customer_id: customer.id,
                    notes: None,
                },
            )
            .await
            .expect("order");
        orders
            .insert_line(&mut tx, order_id, item.id)
            .await
            .expect("line");
        tx.commit().await.expect("commit");

        assert!(matches!(
            db.customers().delete(customer.id).await,
            Err(CatalogError::Referenced)
        ));
        assert!(matches!(
            db.items().delete(item.id).await,
            Err(CatalogError::Referenced)
        ));
        assert_eq!(count(&db, "customers").await, 1);
    }

    #[tokio::test]
    async fn find_or_create_customer_dedups_by_phone() {
        let (db, _dir) = setup_db().await;
        let repo = db.customers();

        let mut tx = db.begin().await.expect("begin");
        let (first, outcome) = repo
            .find_or_create_by_phone(&mut tx, "5551234", "Alice")
            .await
            .expect("first");
        assert!(outcome.was_created());
        tx.commit().await.expect("commit");

        let mut tx = db.begin().await.expect("begin");
        let (second, outcome) = repo
            .find_or_create_by_phone(&mut tx, "5551234", "Someone Else")
            .await
            .expect("second");
        tx.commit().await.expect("commit");

        assert!(!outcome.was_created());
        assert_eq!(second.id, first.id);
        // The existing row wins; the new name is not applied.
        assert_eq!(second.name, "Alice");
        assert_eq!(count(&db, "customers").await, 1);
    }

    #[tokio::test]
    async fn find_or_create_item_dedups_by_name() {
        let (db, _dir) = setup_db().await;
        let repo = db.items();

        let mut tx = db.begin().await.expect("begin");
        let (first, _) = repo
            .find_or_create_by_name(&mut tx, "Widget", 9.99)
            .await
            .expect("first");
        let (second, outcome) = repo
            .find_or_create_by_name(&mut tx, "Widget", 19.99)
            .await
            .expect("second");
        tx.commit().await.expect("commit");

        assert!(!outcome.was_created());
        assert_eq!(second.id, first.id);
        assert_eq!(second.price, 9.99);
        assert_eq!(count(&db, "items").await, 1);
    }

    #[tokio::test]
    async fn direct_insert_allows_duplicate_natural_keys() {
        let (db, _dir) = setup_db().await;
        let repo = db.customers();

        let first = repo.insert("Alice", "5551234").await.expect("first");
        let second = repo.insert("Alice", "5551234").await.expect("second");
        assert_ne!(first.id, second.id);
        assert_eq!(count(&db, "customers").await, 2);
    }

    #[tokio::test]
    async fn fetch_view_resolves_names_and_prices() {
        let (db, _dir) = setup_db().await;
        let customer = db.customers().insert("Alice", "5551234").await.expect("customer");
        let widget = db.items().insert("Widget", 9.99).await.expect("widget");
        let gadget = db.items().insert("Gadget", 4.5).await.expect("gadget");

        let orders = db.orders();
        let created_at = Utc::now();
        let mut tx = db.begin().await.expect("begin");
        let order_id = orders
            .insert(
                &mut tx,
                NewOrder {
                    created_at,
                    customer_id: customer.id,
                    notes: Some("gift wrap"),
                },
            )
            .await
            .expect("order");
        orders.insert_line(&mut tx, order_id, widget.id).await.expect("line");
        orders.insert_line(&mut tx, order_id, gadget.id).await.expect("line");
        tx.commit().await.expect("commit");

        let view = orders.fetch_view(order_id).await.expect("view");
        assert_eq!(view.customer, "Alice");
        assert_eq!(view.notes.as_deref(), Some("gift wrap"));
        assert_eq!(view.lines.len(), 2);
        assert_eq!(view.lines[0].item, "Widget");
        assert_eq!(view.lines[0].price, 9.99);
        assert_eq!(view.lines[1].item, "Gadget");
    }

    #[tokio::test]
    async fn delete_order_cascades_to_lines() {
        let (db, _dir) = setup_db().await;
        let customer = db.customers().insert("Alice", "5551234").await.expect("customer");
        let item = db.items().insert("Widget", 9.99).await.expect("item");

        let orders = db.orders();
        let mut tx = db.begin().await.expect("begin");
        let order_id = orders
            .insert(
                &mut tx,
                NewOrder {
                    created_at: Utc::now(),
                    customer_id: customer.id,
                    notes: None,
                },
            )
            .await
            .expect("order");
        orders.insert_line(&mut tx, order_id, item.id).await.expect("line");
        orders.insert_line(&mut tx, order_id, item.id).await.expect("line");
        tx.commit().await.expect("commit");

        orders.delete(order_id).await.expect("delete");
        assert_eq!(count(&db, "order_lines").await, 0);
        assert!(matches!(
            orders.fetch_view(order_id).await,
            Err(OrderError::NotFound)
        ));
    }

    #[tokio::test]
    async fn update_order_rewrites_mutable_fields() {
        let (db, _dir) = setup_db().await;
        let alice = db.customers().insert("Alice", "5551234").await.expect("alice");
        let bob = db.customers().insert("Bob", "5555678").await.expect("bob");

        let orders = db.orders();
        let mut tx = db.begin().await.expect("begin");
        let order_id = orders
            .insert(
                &mut tx,
                NewOrder {
                    created_at: Utc::now(),
                    customer_id: alice.id,
                    notes: None,
                },
            )
            .await
            .expect("order");
        tx.commit().await.expect("commit");

        let mut tx = db.begin().await.expect("begin");
        let updated = orders
            .update(&mut tx, order_id, bob.id, Some("reassigned"))
            .await
            .expect("update");
        tx.commit().await.expect("commit");

        assert_eq!(updated.customer_id, bob.id);
        assert_eq!(updated.notes.as_deref(), Some("reassigned"));

        let mut tx = db.begin().await.expect("begin");
        let missing = orders.update(&mut tx, 999, bob.id, None).await;
        assert!(matches!(missing, Err(OrderError::NotFound)));
    }

    #[tokio::test]
    async fn integrity_validator_names_the_missing_reference() {
        let (db, _dir) = setup_db().await;
        let customer = db.customers().insert("Alice", "5551234").await.expect("customer");

        let mut tx = db.begin().await.expect("begin");
        IntegrityValidator::customer_exists(&mut tx, customer.id)
            .await
            .expect("existing customer passes");

        let err = IntegrityValidator::customer_exists(&mut tx, 99)
            .await
            .unwrap_err();
        assert!(matches!(err, IntegrityError::MissingCustomer(99)));

        let err = IntegrityValidator::item_exists(&mut tx, 7).await.unwrap_err();
        assert!(matches!(err, IntegrityError::MissingItem(7)));
    }
}
