//! HTTP error mapping.
//!
//! Bridges the creator's error taxonomy to HTTP responses: validation maps
//! to 400, unknown resources to 404, soft stock refusal to 409, everything
//! internal to 500 with the detail kept out of the body.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use orderbus_postgres::StoreError;
use orderbus_workers::creator::CreateOrderError;
use serde::Serialize;

/// Error type returned by every handler.
#[derive(Debug)]
pub struct AppError {
    status: StatusCode,
    message: String,
    code: &'static str,
    source: Option<anyhow::Error>,
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    error: &'a str,
    code: &'a str,
}

impl AppError {
    fn new(status: StatusCode, message: String, code: &'static str) -> Self {
        Self {
            status,
            message,
            code,
            source: None,
        }
    }

    /// 500 with an opaque body; the detail goes to the log only.
    pub fn internal(source: anyhow::Error) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: "internal error".to_string(),
            code: "INTERNAL",
            source: Some(source),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if let Some(source) = &self.source {
            tracing::error!(error = ?source, code = self.code, "request failed");
        } else if self.status.is_server_error() {
            tracing::error!(message = %self.message, code = self.code, "request failed");
        }
        let body = ErrorBody {
            error: &self.message,
            code: self.code,
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<CreateOrderError> for AppError {
    fn from(error: CreateOrderError) -> Self {
        match error {
            CreateOrderError::EmptyOrder | CreateOrderError::InvalidQuantity(_) => {
                Self::new(StatusCode::BAD_REQUEST, error.to_string(), "VALIDATION")
            },
            CreateOrderError::ProductNotFound(_) => {
                Self::new(StatusCode::NOT_FOUND, error.to_string(), "PRODUCT_NOT_FOUND")
            },
            CreateOrderError::InsufficientStock(_) => Self::new(
                StatusCode::CONFLICT,
                error.to_string(),
                "INSUFFICIENT_STOCK",
            ),
            CreateOrderError::Store(e) => Self::internal(e.into()),
        }
    }
}

impl From<StoreError> for AppError {
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::OrderNotFound(_) => {
                Self::new(StatusCode::NOT_FOUND, error.to_string(), "ORDER_NOT_FOUND")
            },
            other => Self::internal(other.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use orderbus_core::model::{OrderId, ProductId};

    #[test]
    fn validation_failures_map_to_400() {
        let error = AppError::from(CreateOrderError::EmptyOrder);
        assert_eq!(error.status, StatusCode::BAD_REQUEST);
        assert_eq!(error.code, "VALIDATION");
    }

    #[test]
    fn unknown_product_maps_to_404() {
        let error = AppError::from(CreateOrderError::ProductNotFound(ProductId::new(
            "p-404".to_string(),
        )));
        assert_eq!(error.status, StatusCode::NOT_FOUND);
    }

    #[test]
    fn soft_stock_refusal_maps_to_409() {
        let error = AppError::from(CreateOrderError::InsufficientStock(ProductId::new(
            "p-1".to_string(),
        )));
        assert_eq!(error.status, StatusCode::CONFLICT);
    }

    #[test]
    fn unknown_order_maps_to_404() {
        let error = AppError::from(StoreError::OrderNotFound(OrderId::new(
            "order-404".to_string(),
        )));
        assert_eq!(error.status, StatusCode::NOT_FOUND);
        assert_eq!(error.code, "ORDER_NOT_FOUND");
    }
}
