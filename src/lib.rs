pub mod auth;
pub mod config;
pub mod database;
pub mod errors;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod services;
pub mod storage;
pub mod utils;

use axum::{
    extract::DefaultBodyLimit,
    middleware::from_fn_with_state,
    routing::{get, post},
    Router,
};
use tower_http::{cors::CorsLayer, services::ServeDir, trace::TraceLayer};

use crate::handlers::{admin, ai, auth as auth_handlers, health, listings, metrics, AppState};

const DEFAULT_UPLOAD_PREFIX: &str = "/static/uploads";

/// Room for a full create-listing form: every photo at the size limit plus
/// the text fields.
fn body_limit(state: &AppState) -> usize {
    state
        .config
        .max_file_size
        .saturating_mul(state.config.max_images_per_listing.max(1))
        .saturating_add(1024 * 1024)
}

pub fn create_app(state: AppState) -> Router {
    let upload_prefix = match state.config.public_upload_prefix.trim_end_matches('/') {
        "" => DEFAULT_UPLOAD_PREFIX.to_string(),
        prefix => prefix.to_string(),
    };
    let uploads = ServeDir::new(&state.config.upload_dir);

    Router::new()
        .route("/health", get(health::health_check))
        .route("/metrics", get(metrics::metrics_handler))
        .route("/auth/register", post(auth_handlers::register))
        .route("/auth/login", post(auth_handlers::login))
        .route("/auth/logout", post(auth_handlers::logout))
        .route("/auth/me", get(auth_handlers::me))
        .route("/listings", get(listings::browse).post(listings::create))
        .route(
            "/listings/:id",
            get(listings::show)
                .put(listings::update)
                .delete(listings::delete),
        )
        .route("/listings/:id/favorite", post(listings::toggle_favorite))
        .route("/listings/:id/valuation", post(listings::valuation))
        .route("/users/me/listings", get(listings::my_listings))
        .route("/users/me/favorites", get(listings::my_favorites))
        .route("/users/:id/listings", get(listings::user_listings))
        .route("/ai/analyze-image", post(ai::analyze_image))
        .route("/ai/describe", post(ai::describe))
        .route("/ai/quota", get(ai::quota))
        .route("/admin/export", get(admin::export_data))
        .route("/admin/database", get(admin::export_database))
        .nest_service(&upload_prefix, uploads)
        .layer(DefaultBodyLimit::max(body_limit(&state)))
        .layer(from_fn_with_state(
            state.clone(),
            middleware::metrics::metrics_middleware,
        ))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|req: &axum::http::Request<_>| {
                    let method = req.method().clone();
                    let uri = req.uri().clone();
                    tracing::info_span!(
                        "http_request",
                        %method,
                        uri = %uri,
                        status = tracing::field::Empty
                    )
                })
                .on_response(
                    |res: &axum::http::Response<_>,
                     latency: std::time::Duration,
                     span: &tracing::Span| {
                        let status = res.status();
                        span.record("status", tracing::field::display(status));
                        if status.is_server_error() {
                            tracing::error!(%status, ?latency, "response");
                        } else {
                            tracing::info!(%status, ?latency, "response");
                        }
                    },
                ),
        )
}
