mod batch;
mod import;
mod ledger;
mod problem;
mod router;
mod telemetry;

use std::net::SocketAddr;

use tracing::info;

use order_desk_storage::Database;
use order_desk_util::{load_env_file, AppConfig};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    load_env_file();
    let config = AppConfig::from_env()?;

    telemetry::init_tracing(&config)?;
    let metrics = telemetry::init_metrics()?;

    let database = Database::connect(&config.database_url).await?;
    database.provision().await?;

    if let Some(path) = &config.import_file {
        let importer = import::BulkImporter::new(database.clone());
        let summary = importer.import_file(path).await?;
        info!(
            stage = "import",
            orders = summary.orders_created,
            customers = summary.customers_created,
            items = summary.items_created,
            "startup bulk import applied"
        );
    }

    let state = router::AppState::new(metrics, database);

    let addr: SocketAddr = config.bind_addr;
    info!(stage = "app", %addr, env = %config.environment.as_str(), "starting HTTP server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router::app_router(state))
        .await
        .map_err(|err| err.into())
}
