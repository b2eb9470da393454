use std::sync::Arc;

use axum::{
    body::Body,
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use metrics::counter;
use metrics_exporter_prometheus::PrometheusHandle;
use serde::{Deserialize, Serialize};

use order_desk_core::types::{Customer, Item, Order, OrderView};
use order_desk_core::validate;
use order_desk_storage::Database;

use crate::batch::{BatchCoordinator, BatchEntry};
use crate::ledger::OrderLedger;
use crate::problem::{self, ProblemResponse};
use crate::telemetry;

#[derive(Clone)]
pub struct AppState {
    metrics: PrometheusHandle,
    storage: Database,
    ledger: OrderLedger,
    batch: BatchCoordinator,
}

impl AppState {
    pub fn new(metrics: PrometheusHandle, storage: Database) -> Self {
        let clock: Arc<dyn Fn() -> DateTime<Utc> + Send + Sync> = Arc::new(Utc::now);
        let ledger = OrderLedger::new(storage.clone(), clock.clone());
        let batch = BatchCoordinator::new(storage.clone(), clock);
        Self {
            metrics,
            storage,
            ledger,
            batch,
        }
    }

    pub fn metrics(&self) -> &PrometheusHandle {
        &self.metrics
    }

    pub fn storage(&self) -> &Database {
        &self.storage
    }

    pub fn ledger(&self) -> &OrderLedger {
        &self.ledger
    }

    pub fn batch(&self) -> &BatchCoordinator {
        &self.batch
    }
}

pub fn app_router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/metrics", get(metrics))
        .route("/customers", post(create_customer))
        .route(
            "/customers/:id",
            get(read_customer).put(update_customer).delete(delete_customer),
        )
        .route("/items", post(create_item))
        .route(
            "/items/:id",
            get(read_item).put(update_item).delete(delete_item),
        )
        .route("/orders", post(create_order))
        .route(
            "/orders/:id",
            get(read_order).put(update_order).delete(delete_order),
        )
        .route("/orders/bulk", post(create_bulk_order))
        .with_state(state)
}

async fn healthz() -> StatusCode {
    StatusCode::OK
}

async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    let body = telemetry::render_metrics(state.metrics());
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/plain; version=0.0.4")
        .body(Body::from(body))
        .unwrap()
}

#[derive(Debug, Deserialize)]
struct CustomerPayload {
    name: String,
    phone: String,
}

#[derive(Debug, Deserialize)]
struct ItemPayload {
    name: String,
    price: f64,
}

#[derive(Debug, Deserialize)]
struct OrderPayload {
    customer_id: i64,
    line_items: Vec<i64>,
    #[serde(default)]
    notes: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OrderUpdatePayload {
    customer_id: i64,
    #[serde(default)]
    notes: Option<String>,
}

#[derive(Debug, Deserialize)]
struct BulkOrderPayload {
    items: Vec<BulkEntryPayload>,
}

#[derive(Debug, Deserialize)]
struct BulkEntryPayload {
    customer_id: i64,
    item_id: i64,
    quantity: u32,
}

#[derive(Debug, Serialize)]
struct BulkOrderBody {
    committed: usize,
    order_ids: Vec<i64>,
}

async fn create_customer(
    State(state): State<AppState>,
    Json(payload): Json<CustomerPayload>,
) -> Result<Json<Customer>, ProblemResponse> {
    validate::customer_fields(&payload.name).map_err(problem::validation)?;
    let customer = state
        .storage()
        .customers()
        .insert(&payload.name, &payload.phone)
        .await
        .map_err(|err| problem::catalog(err, "customer"))?;
    counter!("catalog_writes_total", "entity" => "customer", "op" => "create").increment(1);
    Ok(Json(customer))
}

async fn read_customer(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<Customer>, ProblemResponse> {
    let customer = state
        .storage()
        .customers()
        .fetch(id)
        .await
        .map_err(|err| problem::catalog(err, "customer"))?;
    Ok(Json(customer))
}

async fn update_customer(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(payload): Json<CustomerPayload>,
) -> Result<Json<Customer>, ProblemResponse> {
    validate::customer_fields(&payload.name).map_err(problem::validation)?;
    let customer = state
        .storage()
        .customers()
        .update(id, &payload.name, &payload.phone)
        .await
        .map_err(|err| problem::catalog(err, "customer"))?;
    counter!("catalog_writes_total", "entity" => "customer", "op" => "update").increment(1);
    Ok(Json(customer))
}

async fn delete_customer(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<StatusCode, ProblemResponse> {
    state
        .storage()
        .customers()
        .delete(id)
        .await
        .map_err(|err| problem::catalog(err, "customer"))?;
    counter!("catalog_writes_total", "entity" => "customer", "op" => "delete").increment(1);
    Ok(StatusCode::NO_CONTENT)
}

async fn create_item(
    State(state): State<AppState>,
    Json(payload): Json<ItemPayload>,
) -> Result<Json<Item>, ProblemResponse> {
    validate::item_fields(&payload.name, payload.price).map_err(problem::validation)?;
    let item = state
        .storage()
        .items()
        .insert(&payload.name, payload.price)
        .await
        .map_err(|err| problem::catalog(err, "item"))?;
    counter!("catalog_writes_total", "entity" => "item", "op" => "create").increment(1);
    Ok(Json(item))
}

async fn read_item(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<Item>, ProblemResponse> {
    let item = state
        .storage()
        .items()
        .fetch(id)
        .await
        .map_err(|err| problem::catalog(err, "item"))?;
    Ok(Json(item))
}

async fn update_item(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(payload): Json<ItemPayload>,
) -> Result<Json<Item>, ProblemResponse> {
    validate::item_fields(&payload.name, payload.price).map_err(problem::validation)?;
    let item = state
        .storage()
        .items()
        .update(id, &payload.name, payload.price)
        .await
        .map_err(|err| problem::catalog(err, "item"))?;
    counter!("catalog_writes_total", "entity" => "item", "op" => "update").increment(1);
    Ok(Json(item))
}

async fn delete_item(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<StatusCode, ProblemResponse> {
    state
        .storage()
        .items()
        .delete(id)
        .await
        .map_err(|err| problem::catalog(err, "item"))?;
    counter!("catalog_writes_total", "entity" => "item", "op" => "delete").increment(1);
    Ok(StatusCode::NO_CONTENT)
}

async fn create_order(
    State(state): State<AppState>,
    Json(payload): Json<OrderPayload>,
) -> Result<Json<Order>, ProblemResponse> {
    validate::order_lines(&payload.line_items).map_err(problem::validation)?;
    let order = state
        .ledger()
        .create(
            payload.customer_id,
            &payload.line_items,
            payload.notes.as_deref(),
        )
        .await
        .map_err(problem::ledger)?;
    Ok(Json(order))
}

async fn read_order(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<OrderView>, ProblemResponse> {
    let view = state.ledger().get(id).await.map_err(problem::ledger)?;
    Ok(Json(view))
}

async fn update_order(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(payload): Json<OrderUpdatePayload>,
) -> Result<Json<Order>, ProblemResponse> {
    let order = state
        .ledger()
        .update(id, payload.customer_id, payload.notes.as_deref())
        .await
        .map_err(problem::ledger)?;
    Ok(Json(order))
}

async fn delete_order(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<StatusCode, ProblemResponse> {
    state.ledger().delete(id).await.map_err(problem::ledger)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn create_bulk_order(
    State(state): State<AppState>,
    Json(payload): Json<BulkOrderPayload>,
) -> Result<Json<BulkOrderBody>, ProblemResponse> {
    if payload.items.is_empty() {
        return Err(problem::validation(validate::FieldViolation {
            field: "items",
            reason: "must contain at least one entry",
        }));
    }
    for (index, entry) in payload.items.iter().enumerate() {
        validate::quantity(entry.quantity)
            .map_err(|violation| problem::batch_field(index, violation))?;
    }

    let entries: Vec<BatchEntry> = payload
        .items
        .iter()
        .map(|entry| BatchEntry {
            customer_id: entry.customer_id,
            item_id: entry.item_id,
            quantity: entry.quantity,
        })
        .collect();

    let outcome = state.batch().commit(&entries).await.map_err(|err| {
        counter!("batch_commits_total", "result" => "rejected").increment(1);
        problem::batch(err)
    })?;

    Ok(Json(BulkOrderBody {
        committed: outcome.committed,
        order_ids: outcome.order_ids,
    }))
}
