use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A customer known to the catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Customer {
    pub id: i64,
    pub name: String,
    pub phone: String,
}

/// A purchasable catalog item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub id: i64,
    pub name: String,
    pub price: f64,
}

/// An order row as stored: references its customer, owns its line rows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: i64,
    pub created_at: DateTime<Utc>,
    pub customer_id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

/// Read-side projection of an order with its references resolved.
///
/// Customer name and item name/price are joined at read time; nothing here
/// is stored denormalized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderView {
    pub id: i64,
    pub created_at: DateTime<Utc>,
    pub customer: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    pub lines: Vec<OrderLineView>,
}

/// One resolved line of an [`OrderView`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderLineView {
    pub item: String,
    pub price: f64,
}
