use std::sync::Arc;

use axum::{
    extract::State,
    http::{header, HeaderValue, Method, StatusCode},
    response::IntoResponse,
    routing::{get, post, put},
    Router,
};
use chrono::{DateTime, Utc};
use metrics_exporter_prometheus::PrometheusHandle;
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::warn;

use soderia_storage::Database;
use soderia_util::AuthConfig;

use crate::auth::{Passwords, TokenService};
use crate::ledger::LedgerExecutor;
use crate::{billing, clients, session, stock, telemetry};

#[derive(Clone)]
pub struct AppState {
    metrics: PrometheusHandle,
    storage: Database,
    clock: Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>,
    tokens: TokenService,
    passwords: Passwords,
    ledger: LedgerExecutor,
}

impl AppState {
    pub fn new(metrics: PrometheusHandle, storage: Database, auth: &AuthConfig) -> Self {
        let clock: Arc<dyn Fn() -> DateTime<Utc> + Send + Sync> = Arc::new(Utc::now);
        let ledger = LedgerExecutor::new(storage.clone(), clock.clone());
        Self {
            metrics,
            storage,
            clock,
            tokens: TokenService::new(auth),
            passwords: Passwords::default(),
            ledger,
        }
    }

    #[cfg(test)]
    pub fn with_clock(mut self, clock: Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>) -> Self {
        self.clock = clock.clone();
        self.ledger = LedgerExecutor::new(self.storage.clone(), clock);
        self
    }

    #[cfg(test)]
    pub fn with_passwords(mut self, passwords: Passwords) -> Self {
        self.passwords = passwords;
        self
    }

    pub fn metrics(&self) -> &PrometheusHandle {
        &self.metrics
    }

    pub fn storage(&self) -> &Database {
        &self.storage
    }

    pub fn now(&self) -> DateTime<Utc> {
        (self.clock)()
    }

    pub fn tokens(&self) -> &TokenService {
        &self.tokens
    }

    pub fn passwords(&self) -> &Passwords {
        &self.passwords
    }

    pub fn ledger(&self) -> &LedgerExecutor {
        &self.ledger
    }
}

pub fn app_router(state: AppState) -> Router {
    let auth = Router::new()
        .route("/register", post(session::register))
        .route("/login", post(session::login))
        .route("/refresh", post(session::refresh))
        .route("/logout", post(session::logout));

    let app = Router::new()
        .route("/clients", post(clients::create_client))
        .route("/clients/search", get(clients::search_clients))
        .route(
            "/clients/:id",
            get(clients::get_client)
                .put(clients::update_client)
                .delete(clients::delete_client),
        )
        .route(
            "/clients/:id/purchases",
            get(clients::list_purchases).post(clients::create_purchase),
        )
        .route(
            "/purchases/:id",
            put(clients::modify_purchase).delete(clients::delete_purchase),
        )
        .route("/billings/purchases", get(billing::purchases_by_dates))
        .route("/stock/products", get(stock::list_products))
        .route("/stock/products/:id", put(stock::update_price));

    Router::new()
        .route("/healthz", get(healthz))
        .route("/metrics", get(metrics))
        .nest("/auth", auth)
        .nest("/app", app)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Browser access for the configured front-end origins. `*` opens the API to any origin
/// without credentials.
pub fn cors_layer(origins: &[String]) -> CorsLayer {
    let base = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE]);

    if origins.iter().any(|origin| origin == "*") {
        return base.allow_origin(Any);
    }

    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(stage = "app", %origin, "ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    base.allow_origin(AllowOrigin::list(allowed))
        .allow_credentials(true)
}

async fn healthz() -> StatusCode {
    StatusCode::OK
}

async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        telemetry::render_metrics(state.metrics()),
    )
}
