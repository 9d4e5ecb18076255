//! Order intake: validate, quote, persist, emit `OrderCreated`.

use orderbus_core::environment::Clock;
use orderbus_core::event::{EventType, OrderEvent};
use orderbus_core::event_bus::EventBus;
use orderbus_core::model::{Order, OrderId, OrderItem, ProductId, UserId};
use orderbus_core::status::OrderStatus;
use orderbus_postgres::{CatalogStore, OrderStore, StoreError};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

/// A submission from the HTTP surface.
#[derive(Clone, Debug, Deserialize)]
pub struct CreateOrderRequest {
    /// Submitting user.
    pub user_id: UserId,
    /// Requested lines; must be non-empty.
    pub items: Vec<CreateOrderItem>,
}

/// One requested line.
#[derive(Clone, Debug, Deserialize)]
pub struct CreateOrderItem {
    /// Requested product.
    pub product_id: ProductId,
    /// Requested quantity; must be positive.
    pub quantity: i32,
}

/// The creator's answer to a successful submission.
#[derive(Clone, Debug, Serialize)]
pub struct CreateOrderResponse {
    /// Id of the newly created order.
    pub order_id: OrderId,
    /// Echo of the submitting user.
    pub user_id: UserId,
    /// Computed total.
    #[serde(with = "rust_decimal::serde::float")]
    pub total_amount: Decimal,
    /// Always `CREATED` at this point.
    pub status: OrderStatus,
    /// Human-readable confirmation.
    pub message: String,
}

/// Failures surfaced to the submitting caller.
#[derive(Error, Debug)]
pub enum CreateOrderError {
    /// The submission carried no items.
    #[error("order must contain at least one item")]
    EmptyOrder,

    /// An item asked for a non-positive quantity.
    #[error("invalid quantity for product {0}")]
    InvalidQuantity(ProductId),

    /// An item referenced an unknown product.
    #[error("product {0} not found")]
    ProductNotFound(ProductId),

    /// The quote-time availability check failed.
    ///
    /// Soft: the authoritative check is the stock worker's row-locked
    /// reservation, this one only avoids accepting obviously dead orders.
    #[error("insufficient stock for product {0}")]
    InsufficientStock(ProductId),

    /// Persistence failed.
    #[error(transparent)]
    Store(StoreError),
}

/// The order creator.
///
/// Persists the order and emits the initial event, then steps out of the
/// way: every later status write belongs to the status reducer.
#[derive(Clone)]
pub struct OrderService {
    orders: Arc<OrderStore>,
    catalog: Arc<CatalogStore>,
    bus: Arc<dyn EventBus>,
    clock: Arc<dyn Clock>,
}

impl OrderService {
    /// Assemble the service.
    #[must_use]
    pub fn new(
        orders: Arc<OrderStore>,
        catalog: Arc<CatalogStore>,
        bus: Arc<dyn EventBus>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            orders,
            catalog,
            bus,
            clock,
        }
    }

    /// Accept a submission: validate, snapshot prices, persist atomically,
    /// publish `OrderCreated`.
    ///
    /// The publish is best-effort; a broker failure is logged and the
    /// submission still succeeds (the order row is the source of truth).
    ///
    /// # Errors
    ///
    /// Validation and availability failures return their specific
    /// [`CreateOrderError`] variant; persistence failures come back as
    /// [`CreateOrderError::Store`].
    pub async fn create_order(
        &self,
        request: CreateOrderRequest,
    ) -> Result<CreateOrderResponse, CreateOrderError> {
        validate_request(&request)?;

        let order_id = OrderId::generate();
        let now = self.clock.now();
        let mut items = Vec::with_capacity(request.items.len());

        for line in &request.items {
            let product = match self.catalog.product(&line.product_id).await {
                Ok(product) => product,
                Err(StoreError::ProductNotFound(id)) => {
                    return Err(CreateOrderError::ProductNotFound(id))
                },
                Err(e) => return Err(CreateOrderError::Store(e)),
            };
            if product.stock_quantity < line.quantity {
                return Err(CreateOrderError::InsufficientStock(line.product_id.clone()));
            }
            items.push(OrderItem {
                id: Uuid::new_v4().to_string(),
                order_id: order_id.clone(),
                product_id: line.product_id.clone(),
                quantity: line.quantity,
                price: product.price,
            });
        }

        let total_amount = order_total(&items);
        let order = Order {
            id: order_id.clone(),
            user_id: request.user_id.clone(),
            total_amount,
            status: OrderStatus::Created,
            created_at: now,
            updated_at: now,
            items,
        };

        self.orders
            .create(&order)
            .await
            .map_err(CreateOrderError::Store)?;

        let event = OrderEvent::new(
            EventType::OrderCreated,
            order_id.clone(),
            OrderStatus::Created,
            now,
        )
        .with_user(request.user_id.clone())
        .with_total(total_amount)
        .with_items(order.items.clone());

        if let Err(e) = self.bus.publish(&event).await {
            tracing::error!(order_id = %order_id, error = %e, "failed to publish OrderCreated");
        }

        tracing::info!(order_id = %order_id, total = %total_amount, "order created");

        Ok(CreateOrderResponse {
            order_id,
            user_id: request.user_id,
            total_amount,
            status: OrderStatus::Created,
            message: "Order created successfully".to_string(),
        })
    }

    /// Load an order with its items.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::OrderNotFound`] for an unknown id.
    pub async fn get_order(&self, order_id: &OrderId) -> Result<Order, StoreError> {
        self.orders.fetch(order_id).await
    }
}

fn validate_request(request: &CreateOrderRequest) -> Result<(), CreateOrderError> {
    if request.items.is_empty() {
        return Err(CreateOrderError::EmptyOrder);
    }
    for item in &request.items {
        if item.quantity <= 0 {
            return Err(CreateOrderError::InvalidQuantity(item.product_id.clone()));
        }
    }
    Ok(())
}

fn order_total(items: &[OrderItem]) -> Decimal {
    items
        .iter()
        .map(|item| item.price * Decimal::from(item.quantity))
        .sum()
}
