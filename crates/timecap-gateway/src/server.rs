//! HTTP server implementation using Axum.

use std::sync::Arc;

use axum::{
    Router,
    routing::{get, patch, post},
};
use timecap_core::config::GatewayConfig;
use timecap_delivery::{Migrator, Sweeper};
use timecap_store::CapsuleStore;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Shared state for the gateway server.
#[derive(Clone)]
pub struct AppState {
    pub store: CapsuleStore,
    pub sweeper: Arc<Sweeper>,
    pub migrator: Arc<Migrator>,
    /// VAPID public key handed to browsers at subscribe time; empty when
    /// push is not configured.
    pub vapid_public_key: String,
}

/// Build the Axum router with all routes.
pub fn build_router(state: AppState) -> Router {
    let shared = Arc::new(state);

    Router::new()
        .route("/health", get(super::routes::health_check))
        .route("/api/capsules", post(super::routes::create_capsule))
        .route("/api/capsules/list", get(super::routes::list_capsules))
        .route(
            "/api/capsules/{id}",
            get(super::routes::get_capsule).patch(super::routes::return_capsule),
        )
        .route(
            "/api/deliver",
            get(super::routes::deliver).post(super::routes::deliver),
        )
        .route("/api/deliver-now", post(super::routes::deliver_now))
        .route("/api/migrate", post(super::routes::migrate))
        .route(
            "/api/user/preferences",
            patch(super::routes::update_preferences),
        )
        .route("/api/users", post(super::routes::create_user))
        .route("/api/push/subscribe", post(super::routes::push_subscribe))
        .route(
            "/api/push/unsubscribe",
            post(super::routes::push_unsubscribe),
        )
        .route("/api/push/vapid-key", get(super::routes::vapid_key))
        .layer(
            CorsLayer::new()
                .allow_methods([
                    axum::http::Method::GET,
                    axum::http::Method::POST,
                    axum::http::Method::PATCH,
                    axum::http::Method::OPTIONS,
                ])
                .allow_headers(Any)
                .allow_origin(Any),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(shared)
}

/// Start the HTTP server.
pub async fn start(config: &GatewayConfig, state: AppState) -> anyhow::Result<()> {
    let app = build_router(state);

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("🌐 Gateway server listening on http://{}", addr);

    axum::serve(listener, app).await?;
    Ok(())
}
