mod auth;
mod billing;
mod clients;
mod error;
mod ledger;
mod maintenance;
mod router;
mod session;
mod stock;
mod telemetry;
#[cfg(test)]
mod testing;

use std::net::SocketAddr;

use tracing::info;

use soderia_storage::Database;
use soderia_util::{load_env_file, AppConfig};

use crate::maintenance::MaintenanceWorker;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    load_env_file();
    let config = AppConfig::from_env()?;

    telemetry::init_tracing(&config)?;
    let metrics = telemetry::init_metrics()?;

    let database = Database::connect(&config.database_url).await?;
    database.run_migrations().await?;
    info!(stage = "app", database = %config.database_url, "database ready");

    MaintenanceWorker::new(database.clone()).spawn();

    let state = router::AppState::new(metrics, database, &config.auth);
    let app = router::app_router(state).layer(router::cors_layer(&config.cors_origins));

    let addr: SocketAddr = config.bind_addr;
    info!(stage = "app", %addr, env = %config.environment.as_str(), "starting HTTP server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await.map_err(|err| err.into())
}
