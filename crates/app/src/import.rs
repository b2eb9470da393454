use std::path::Path;

use chrono::{DateTime, Utc};
use metrics::counter;
use serde::Deserialize;
use thiserror::Error;
use tracing::{info, warn};

use order_desk_storage::{CatalogError, Database, NewOrder};

/// One order record from the external import file.
#[derive(Debug, Clone, Deserialize)]
pub struct OrderRecord {
    pub phone: String,
    pub name: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub notes: Option<String>,
    pub items: Vec<ItemRecord>,
}

/// One item of an imported order, keyed by name.
#[derive(Debug, Clone, Deserialize)]
pub struct ItemRecord {
    pub name: String,
    pub price: f64,
}

/// Counters reported after an import pass.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ImportSummary {
    pub orders_created: usize,
    pub customers_created: usize,
    pub items_created: usize,
    pub records_skipped: usize,
}

/// One-time bulk importer for external order records.
///
/// Customers are deduplicated by phone and items by name; each record
/// commits in its own transaction, so the lookup cannot race the insert.
pub struct BulkImporter {
    database: Database,
}

impl BulkImporter {
    pub fn new(database: Database) -> Self {
        Self { database }
    }

    /// Reads a JSON array of order records from `path` and imports them.
    pub async fn import_file(&self, path: &Path) -> Result<ImportSummary, ImportError> {
        let raw = std::fs::read_to_string(path).map_err(ImportError::Read)?;
        let records: Vec<OrderRecord> = serde_json::from_str(&raw)?;
        self.import_records(&records).await
    }

    /// Imports the given records, one transaction per record.
    pub async fn import_records(
        &self,
        records: &[OrderRecord],
    ) -> Result<ImportSummary, ImportError> {
        let mut summary = ImportSummary::default();

        for record in records {
            if record.items.is_empty() {
                warn!(stage = "import", phone = %record.phone, "skipping record with no items");
                summary.records_skipped += 1;
                continue;
            }
            self.import_record(record, &mut summary).await?;
        }

        info!(
            stage = "import",
            orders = summary.orders_created,
            customers = summary.customers_created,
            items = summary.items_created,
            skipped = summary.records_skipped,
            "bulk import pass finished"
        );
        Ok(summary)
    }

    async fn import_record(
        &self,
        record: &OrderRecord,
        summary: &mut ImportSummary,
    ) -> Result<(), ImportError> {
        let customers = self.database.customers();
        let items = self.database.items();
        let orders = self.database.orders();

        let mut tx = self.database.begin().await?;

        let (customer, outcome) = customers
            .find_or_create_by_phone(&mut tx, &record.phone, &record.name)
            .await?;
        if outcome.was_created() {
            summary.customers_created += 1;
        }

        let mut item_ids = Vec::with_capacity(record.items.len());
        for item in &record.items {
            let (stored, outcome) = items
                .find_or_create_by_name(&mut tx, &item.name, item.price)
                .await?;
            if outcome.was_created() {
                summary.items_created += 1;
            }
            item_ids.push(stored.id);
        }

        let order_id = orders
            .insert(
                &mut tx,
                NewOrder {
                    created_at: record.timestamp,
                    customer_id: customer.id,
                    notes: record.notes.as_deref(),
                },
            )
            .await?;
        for item_id in item_ids {
            orders.insert_line(&mut tx, order_id, item_id).await?;
        }

        tx.commit().await?;
        summary.orders_created += 1;
        counter!("import_orders_total").increment(1);
        Ok(())
    }
}

/// Errors that abort an import pass.
#[derive(Debug, Error)]
pub enum ImportError {
    #[error("failed to read import file: {0}")]
    Read(std::io::Error),
    #[error("failed to parse import file: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("catalog error during import: {0}")]
    Catalog(#[from] CatalogError),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}
