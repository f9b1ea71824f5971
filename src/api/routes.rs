use axum::{
    middleware,
    routing::{get, post, put},
    Router,
};
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::middleware::request_id::{make_span_with_request_id, request_id_middleware};

use super::handlers;
use super::AppState;

/// Creates the main API router with all routes
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health_check))
        .nest("/api/v1", api_routes())
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(middleware::from_fn(request_id_middleware))
                .layer(TraceLayer::new_for_http().make_span_with(make_span_with_request_id))
                .layer(CorsLayer::permissive()),
        )
}

/// API routes under /api/v1
fn api_routes() -> Router<AppState> {
    Router::new()
        // ETL ingestion
        .route("/interactions", post(handlers::ingest_interactions))
        // Graph entities
        .route("/customers/:id", put(handlers::upsert_customer))
        .route("/customers/:id/neighbors", get(handlers::customer_neighbors))
        .route("/products/:id", put(handlers::upsert_product))
        .route("/products/:id/neighbors", get(handlers::product_neighbors))
        .route("/products/:id/similar", get(handlers::similar_products))
        // Recommendations
        .route(
            "/recommendations/customers/:id",
            get(handlers::recommend_for_customer),
        )
        .route(
            "/recommendations/products/:id",
            get(handlers::recommend_for_product),
        )
        // Index administration
        .route("/index", get(handlers::index_status))
        .route(
            "/index/rebuild",
            post(handlers::start_rebuild).delete(handlers::cancel_rebuild),
        )
}
