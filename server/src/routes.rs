//! HTTP surface exposed by the order creator.
//!
//! `POST /api/v1/orders` accepts a submission and returns 201 once the
//! order row is committed; progress after that is observed by polling
//! `GET /api/v1/orders/:id`.

use crate::error::AppError;
use crate::state::AppState;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use orderbus_core::model::{Order, OrderId};
use orderbus_workers::creator::{CreateOrderRequest, CreateOrderResponse};
use tower_http::trace::TraceLayer;

/// Build the application router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/v1/orders", post(create_order))
        .route("/api/v1/orders/:id", get(get_order))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn create_order(
    State(state): State<AppState>,
    Json(request): Json<CreateOrderRequest>,
) -> Result<(StatusCode, Json<CreateOrderResponse>), AppError> {
    let response = state.service.create_order(request).await?;
    Ok((StatusCode::CREATED, Json(response)))
}

async fn get_order(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Order>, AppError> {
    let order = state.service.get_order(&OrderId::new(id)).await?;
    Ok(Json(order))
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}
