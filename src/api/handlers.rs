use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Extension, Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::{AppError, AppResult};
use crate::middleware::request_id::RequestId;
use crate::models::{
    Customer, CustomerAttributes, CustomerId, InteractionRecord, Product, ProductAttributes,
    ProductId, Recommendation, RecommendationSource,
};
use crate::services::index_manager::{IndexStatus, IngestReport};

use super::AppState;

// Request/Response types

#[derive(Debug, Deserialize)]
pub struct IngestRequest {
    pub interactions: Vec<InteractionRecord>,
}

#[derive(Debug, Deserialize)]
pub struct RecommendQuery {
    pub k: Option<usize>,
    pub as_of: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
pub struct LimitQuery {
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct RecommendationResponse {
    #[serde(flatten)]
    pub recommendation: Recommendation,
    /// Set when the index lagged the store beyond the staleness bound
    pub stale: bool,
}

#[derive(Debug, Serialize)]
pub struct NeighborResponse {
    pub id: String,
    pub weight: f64,
}

#[derive(Debug, Serialize)]
pub struct NeighborsResponse {
    pub id: String,
    pub neighbors: Vec<NeighborResponse>,
}

#[derive(Debug, Serialize)]
pub struct ScoredProductResponse {
    pub product_id: ProductId,
    pub score: f64,
}

#[derive(Debug, Serialize)]
pub struct SimilarProductsResponse {
    pub product_id: ProductId,
    pub index_version: u64,
    pub similar: Vec<ScoredProductResponse>,
    pub stale: bool,
}

#[derive(Debug, Serialize)]
pub struct RebuildResponse {
    pub rebuild_id: uuid::Uuid,
}

// Handlers

/// Health check endpoint; OK once the store and index are queryable
pub async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    if !state.is_ready() {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "status": "initializing" })),
        );
    }

    let store_version = state.manager.store_version().await;
    let index_version = state.manager.snapshot().await.version();
    (
        StatusCode::OK,
        Json(json!({
            "status": "healthy",
            "store_version": store_version,
            "index_version": index_version,
        })),
    )
}

/// Records a batch of interactions delivered by the ETL job
///
/// The batch is validated as a whole; one bad record rejects all of it.
pub async fn ingest_interactions(
    State(state): State<AppState>,
    Extension(request_id): Extension<RequestId>,
    Json(request): Json<IngestRequest>,
) -> AppResult<(StatusCode, Json<IngestReport>)> {
    if request.interactions.is_empty() {
        return Err(AppError::InvalidInput(
            "Must provide at least one interaction".to_string(),
        ));
    }

    let now = Utc::now();
    let batch = request
        .interactions
        .into_iter()
        .enumerate()
        .map(|(position, record)| {
            record.validate(now).map_err(|e| match e {
                AppError::InvalidInteraction(msg) => {
                    AppError::InvalidInteraction(format!("record {}: {}", position, msg))
                }
                other => other,
            })
        })
        .collect::<AppResult<Vec<_>>>()
        .map_err(|e| {
            tracing::warn!(request_id = %request_id, error = %e, "Rejected interaction batch");
            e
        })?;

    let report = state.manager.ingest(batch).await;
    Ok((StatusCode::CREATED, Json(report)))
}

/// Creates or updates a customer node
pub async fn upsert_customer(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(attributes): Json<CustomerAttributes>,
) -> AppResult<Json<Customer>> {
    let id = CustomerId::new(id);
    if id.is_blank() {
        return Err(AppError::InvalidInput("customer id must not be empty".to_string()));
    }
    let id = state.manager.upsert_customer(id, attributes).await;
    state
        .manager
        .with_store(|store| store.customer(&id).cloned())
        .await
        .map(Json)
        .ok_or_else(|| AppError::Internal(format!("customer '{}' vanished after upsert", id)))
}

/// Creates or updates a product node
pub async fn upsert_product(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(attributes): Json<ProductAttributes>,
) -> AppResult<Json<Product>> {
    let id = ProductId::new(id);
    if id.is_blank() {
        return Err(AppError::InvalidInput("product id must not be empty".to_string()));
    }
    let id = state.manager.upsert_product(id, attributes).await;
    state
        .manager
        .with_store(|store| store.product(&id).cloned())
        .await
        .map(Json)
        .ok_or_else(|| AppError::Internal(format!("product '{}' vanished after upsert", id)))
}

/// Products a customer interacted with, one entry per interaction
pub async fn customer_neighbors(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<Json<NeighborsResponse>> {
    let customer = CustomerId::new(id);
    let neighbors = state
        .manager
        .with_store(|store| {
            store.customer(&customer).map(|_| {
                store
                    .neighbors_of_customer(&customer)
                    .map(|(product, weight)| NeighborResponse {
                        id: product.to_string(),
                        weight,
                    })
                    .collect::<Vec<_>>()
            })
        })
        .await
        .ok_or_else(|| AppError::UnknownEntity(format!("customer '{}'", customer)))?;

    Ok(Json(NeighborsResponse {
        id: customer.to_string(),
        neighbors,
    }))
}

/// Customers who interacted with a product, one entry per interaction
pub async fn product_neighbors(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<Json<NeighborsResponse>> {
    let product = ProductId::new(id);
    let neighbors = state
        .manager
        .with_store(|store| {
            store.product(&product).map(|_| {
                store
                    .neighbors_of_product(&product)
                    .map(|(customer, weight)| NeighborResponse {
                        id: customer.to_string(),
                        weight,
                    })
                    .collect::<Vec<_>>()
            })
        })
        .await
        .ok_or_else(|| AppError::UnknownEntity(format!("product '{}'", product)))?;

    Ok(Json(NeighborsResponse {
        id: product.to_string(),
        neighbors,
    }))
}

/// Raw co-occurrence listing for a product, strongest first
pub async fn similar_products(
    State(state): State<AppState>,
    Extension(request_id): Extension<RequestId>,
    Path(id): Path<String>,
    Query(params): Query<LimitQuery>,
) -> AppResult<Json<SimilarProductsResponse>> {
    let product = ProductId::new(id);
    let limit = state.limits.resolve(params.limit);
    let mut stale = signal_staleness(&state, &request_id).await;
    let snapshot = state.manager.snapshot().await;

    if snapshot.interaction_count(&product) == 0 {
        if !product_in_store(&state, &product).await {
            return Err(AppError::UnknownEntity(format!(
                "product '{}' has no interactions",
                product
            )));
        }
        tracing::warn!(
            request_id = %request_id,
            product_id = %product,
            index_version = snapshot.version(),
            "Product not yet in index"
        );
        stale = true;
    }

    let similar = snapshot
        .scores_for(&product)
        .take(limit)
        .map(|(other, score)| ScoredProductResponse {
            product_id: other.clone(),
            score,
        })
        .collect();

    Ok(Json(SimilarProductsResponse {
        product_id: product,
        index_version: snapshot.version(),
        similar,
        stale,
    }))
}

/// Personalized recommendations for a customer
pub async fn recommend_for_customer(
    State(state): State<AppState>,
    Extension(request_id): Extension<RequestId>,
    Path(id): Path<String>,
    Query(params): Query<RecommendQuery>,
) -> AppResult<Json<RecommendationResponse>> {
    let customer = CustomerId::new(id);
    let k = state.limits.resolve(params.k);
    let as_of = params.as_of.unwrap_or_else(Utc::now);

    tracing::info!(
        request_id = %request_id,
        customer_id = %customer,
        k,
        "Processing customer recommendation request"
    );

    let stale = signal_staleness(&state, &request_id).await;
    let snapshot = state.manager.snapshot().await;
    let recommendation = match state
        .engine
        .recommend_for_customer(&snapshot, &customer, k, as_of)
    {
        Err(AppError::UnknownEntity(message)) => {
            if !customer_in_store(&state, &customer).await {
                return Err(AppError::UnknownEntity(message));
            }
            tracing::warn!(
                request_id = %request_id,
                customer_id = %customer,
                index_version = snapshot.version(),
                "Customer not yet in index"
            );
            return Ok(Json(RecommendationResponse {
                recommendation: Recommendation::empty(
                    RecommendationSource::Customer(customer),
                    snapshot.version(),
                ),
                stale: true,
            }));
        }
        outcome => outcome?,
    };

    Ok(Json(RecommendationResponse {
        recommendation,
        stale,
    }))
}

/// Item-to-item recommendations for a product
pub async fn recommend_for_product(
    State(state): State<AppState>,
    Extension(request_id): Extension<RequestId>,
    Path(id): Path<String>,
    Query(params): Query<RecommendQuery>,
) -> AppResult<Json<RecommendationResponse>> {
    let product = ProductId::new(id);
    let k = state.limits.resolve(params.k);

    tracing::info!(
        request_id = %request_id,
        product_id = %product,
        k,
        "Processing product recommendation request"
    );

    let stale = signal_staleness(&state, &request_id).await;
    let snapshot = state.manager.snapshot().await;
    let recommendation = match state.engine.recommend_for_product(&snapshot, &product, k) {
        Err(AppError::UnknownEntity(message)) => {
            if !product_in_store(&state, &product).await {
                return Err(AppError::UnknownEntity(message));
            }
            tracing::warn!(
                request_id = %request_id,
                product_id = %product,
                index_version = snapshot.version(),
                "Product not yet in index"
            );
            return Ok(Json(RecommendationResponse {
                recommendation: Recommendation::empty(
                    RecommendationSource::Product(product),
                    snapshot.version(),
                ),
                stale: true,
            }));
        }
        outcome => outcome?,
    };

    Ok(Json(RecommendationResponse {
        recommendation,
        stale,
    }))
}

/// Index and store bookkeeping
pub async fn index_status(State(state): State<AppState>) -> Json<IndexStatus> {
    Json(state.manager.status().await)
}

/// Starts a background rebuild
pub async fn start_rebuild(
    State(state): State<AppState>,
    Extension(request_id): Extension<RequestId>,
) -> AppResult<(StatusCode, Json<RebuildResponse>)> {
    let rebuild_id = state.manager.start_rebuild().await?;
    tracing::info!(request_id = %request_id, rebuild_id = %rebuild_id, "Rebuild requested");
    Ok((StatusCode::ACCEPTED, Json(RebuildResponse { rebuild_id })))
}

/// Cancels the running rebuild
pub async fn cancel_rebuild(
    State(state): State<AppState>,
) -> AppResult<(StatusCode, Json<RebuildResponse>)> {
    state
        .manager
        .cancel_rebuild()
        .await
        .map(|rebuild_id| (StatusCode::ACCEPTED, Json(RebuildResponse { rebuild_id })))
        .ok_or_else(|| AppError::NotFound("No rebuild is running".to_string()))
}

// Cold start is decided by the store: a snapshot miss for an entity with
// recorded interactions only means the index has not caught up

async fn customer_in_store(state: &AppState, customer: &CustomerId) -> bool {
    state
        .manager
        .with_store(|store| store.neighbors_of_customer(customer).next().is_some())
        .await
}

async fn product_in_store(state: &AppState, product: &ProductId) -> bool {
    state
        .manager
        .with_store(|store| store.neighbors_of_product(product).next().is_some())
        .await
}

/// Reports whether the index is stale; a stale index triggers a background
/// rebuild but the read still proceeds against the current snapshot
async fn signal_staleness(state: &AppState, request_id: &RequestId) -> bool {
    let Err(stale) = state.manager.check_freshness().await else {
        return false;
    };

    tracing::warn!(request_id = %request_id, error = %stale, "Serving from stale index");
    match state.manager.start_rebuild().await {
        Ok(rebuild_id) => {
            tracing::info!(request_id = %request_id, rebuild_id = %rebuild_id, "Triggered rebuild for stale index");
        }
        Err(AppError::RebuildInProgress) => {}
        Err(e) => {
            tracing::error!(request_id = %request_id, error = %e, "Failed to trigger rebuild");
        }
    }
    true
}
