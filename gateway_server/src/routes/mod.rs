//! Gateway HTTP routes: generation, image proxy, admin API.

pub mod admin;
pub mod generate;
pub mod image;

use std::sync::Arc;
use std::time::Instant;

use axum::extract::DefaultBodyLimit;
use axum::http::header::{AUTHORIZATION, CACHE_CONTROL, CONTENT_TYPE};
use axum::http::{HeaderValue, Method};
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;

use crate::config::GatewayConfig;
use crate::services::comfy_client::ComfyClient;
use crate::services::data_store::DataStore;

/// Multipart framing and text fields on top of the image itself.
const MULTIPART_OVERHEAD: usize = 1024 * 1024;

/// Shared state for gateway route handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<GatewayConfig>,
    pub store: DataStore,
    pub comfy: ComfyClient,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(config: GatewayConfig) -> Self {
        Self {
            store: DataStore::from_config(&config),
            comfy: ComfyClient::new(&config.comfy_url),
            config: Arc::new(config),
            started_at: Instant::now(),
        }
    }
}

/// Build the gateway's Axum router.
pub fn app_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([CONTENT_TYPE, AUTHORIZATION]);

    let body_limit = state.config.max_upload_bytes + MULTIPART_OVERHEAD;
    let dashboard_dir = state.config.dashboard_dir.clone();

    let mut router = Router::new()
        // Generation
        .route(
            "/api/generate",
            get(generate::status).post(generate::create),
        )
        .route("/api/image", get(image::proxy))
        // Admin
        .route(
            "/api/admin",
            get(admin::query)
                .post(admin::action)
                .put(admin::update)
                .delete(admin::remove),
        )
        .route("/api/admin/verify", post(admin::verify))
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state);

    if let Some(dir) = dashboard_dir {
        tracing::info!(dir = %dir.display(), "Serving admin dashboard at /admin");
        router = router.nest_service("/admin", ServeDir::new(dir));
    }

    router
        .layer(SetResponseHeaderLayer::overriding(
            CACHE_CONTROL,
            HeaderValue::from_static("no-cache, no-store, must-revalidate"),
        ))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}
