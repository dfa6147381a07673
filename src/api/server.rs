//! HTTP server setup.

use axum::{
    extract::Request,
    http::{HeaderName, HeaderValue},
    middleware::{self, Next},
    response::Response,
    routing::{get, post, put},
    Router,
};
use sqlx::SqlitePool;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use super::{admin, handlers};
use crate::config::Config;
use crate::error::Result;
use crate::pool::PoolManager;
use crate::router::Router as PoolRouter;
use crate::storage::{self, providers};

/// Response header: correlation id (UUID v4), present on every response.
pub const REQUEST_ID_HEADER: &str = "x-llmpool-request-id";

/// Correlation id assigned to each request by middleware.
#[derive(Debug, Clone, Copy)]
pub struct RequestId(pub uuid::Uuid);

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub db: SqlitePool,
    pub pools: Arc<PoolManager>,
    pub router: Arc<PoolRouter>,
    pub config: Arc<Config>,
}

impl AppState {
    /// Wire up pools and router over an open, migrated database.
    ///
    /// Imports seed providers into an empty registry and builds every pool
    /// before returning.
    pub async fn new(db: SqlitePool, config: Config) -> Result<Self> {
        providers::import_seed(&db, &config.providers).await?;

        let pools = Arc::new(PoolManager::new(db.clone()));
        pools.rebuild_all().await?;

        let router = PoolRouter::new(
            db.clone(),
            pools.clone(),
            config.router.clone(),
            config.logging.log_dispatches,
        )?;

        Ok(Self {
            db,
            pools,
            router: Arc::new(router),
            config: Arc::new(config),
        })
    }
}

async fn assign_request_id(mut request: Request, next: Next) -> Response {
    let id = uuid::Uuid::new_v4();
    request.extensions_mut().insert(RequestId(id));

    let mut response = next.run(request).await;
    if let Ok(value) = HeaderValue::from_str(&id.to_string()) {
        response
            .headers_mut()
            .insert(HeaderName::from_static(REQUEST_ID_HEADER), value);
    }
    response
}

/// Create the axum router with all endpoints.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Dispatch
        .route("/v1/pools/:pool/dispatch", post(handlers::dispatch))
        .route("/v1/pools/:pool/stream", post(handlers::dispatch_stream))
        // Registry administration
        .route(
            "/api/admin/llm-providers",
            get(admin::list_providers).post(admin::create_provider),
        )
        .route(
            "/api/admin/llm-providers/:id",
            put(admin::update_provider).delete(admin::delete_provider),
        )
        .route(
            "/api/admin/llm-providers/:id/set-primary",
            post(admin::set_primary),
        )
        .route("/api/admin/llm-providers/:id/toggle", post(admin::toggle_provider))
        .route("/api/admin/config", post(admin::set_config))
        .route("/api/admin/config/:key", get(admin::get_config))
        .route("/api/admin/pools/rebuild", post(admin::rebuild_pools))
        .route("/api/admin/pools/:pool/channels", get(admin::list_channels))
        .route("/health", get(handlers::health))
        // State and middleware
        .with_state(state)
        .layer(middleware::from_fn(assign_request_id))
        .layer(TraceLayer::new_for_http())
}

/// Open the database, build pools and serve until shutdown.
pub async fn run_server(config: Config) -> anyhow::Result<()> {
    let listen_addr = config.server.listen.clone();
    let db_path = config.database().path;

    let db = storage::init_pool(&db_path).await?;
    tracing::info!(path = %db_path, "Database ready");

    let state = AppState::new(db, config).await?;
    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(&listen_addr).await?;
    tracing::info!(address = %listen_addr, "Starting llmpool server");

    axum::serve(listener, app).await?;

    Ok(())
}
