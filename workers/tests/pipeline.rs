//! End-to-end pipeline scenarios: real Postgres, in-memory bus.
//!
//! Every worker is registered against an [`InMemoryEventBus`], so the fan-out
//! and redelivery semantics are exercised deterministically while the stores
//! run against a real database. `#[ignore]`d by default; run with
//! `DATABASE_URL` set and `cargo test -p orderbus-workers -- --ignored`.

#![allow(clippy::expect_used)] // Test code uses expect for clear failure messages

use chrono::Utc;
use orderbus_core::environment::{Clock, SystemClock};
use orderbus_core::event::{EventType, OrderEvent};
use orderbus_core::event_bus::{EventBus, EventHandler, Queue};
use orderbus_core::model::{Order, OrderId, OrderItem, ProductId, UserId};
use orderbus_core::status::OrderStatus;
use orderbus_postgres::{CatalogStore, OrderStore, PaymentStore, ShippingStore, StockStore};
use orderbus_testing::InMemoryEventBus;
use orderbus_workers::creator::{CreateOrderItem, CreateOrderRequest, OrderService};
use orderbus_workers::payment::{PaymentConfig, PaymentWorker};
use orderbus_workers::shipping::{ShippingConfig, ShippingWorker};
use orderbus_workers::status::{StatusConfig, StatusWorker};
use orderbus_workers::stock::{StockConfig, StockWorker};
use rust_decimal::Decimal;
use sqlx::{PgPool, Row};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

struct Pipeline {
    pool: PgPool,
    bus: Arc<InMemoryEventBus>,
    service: OrderService,
    orders: Arc<OrderStore>,
    _shutdown: CancellationToken,
}

async fn pipeline(payment_success_rate: f64) -> Pipeline {
    let url = std::env::var("DATABASE_URL")
        .expect("DATABASE_URL must point at a disposable Postgres for these tests");
    let pool = orderbus_postgres::connect(&url, 5)
        .await
        .expect("failed to connect");
    orderbus_postgres::run_migrations(&pool)
        .await
        .expect("failed to run migrations");

    let orders = Arc::new(OrderStore::new(pool.clone()));
    let catalog = Arc::new(CatalogStore::new(pool.clone()));
    let stock = Arc::new(StockStore::new(pool.clone()));
    let payments = Arc::new(PaymentStore::new(pool.clone()));
    let shipping = Arc::new(ShippingStore::new(pool.clone()));

    let bus = Arc::new(InMemoryEventBus::new());
    let bus_dyn: Arc<dyn EventBus> = bus.clone();
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let shutdown = CancellationToken::new();

    let payment_worker: Arc<dyn EventHandler> = Arc::new(PaymentWorker::new(
        payments.clone(),
        bus_dyn.clone(),
        clock.clone(),
        PaymentConfig {
            success_rate: payment_success_rate,
            processing_delay: Duration::ZERO,
        },
    ));
    let stock_worker: Arc<dyn EventHandler> = Arc::new(StockWorker::new(
        stock.clone(),
        bus_dyn.clone(),
        clock.clone(),
        StockConfig {
            retry_attempts: 3,
            retry_backoff: Duration::ZERO,
            ..StockConfig::default()
        },
    ));
    let shipping_worker: Arc<dyn EventHandler> = Arc::new(ShippingWorker::new(
        orders.clone(),
        payments.clone(),
        stock.clone(),
        shipping,
        bus_dyn.clone(),
        clock.clone(),
        ShippingConfig {
            processing_delay: Duration::ZERO,
            ..ShippingConfig::default()
        },
    ));
    let status_worker: Arc<dyn EventHandler> = Arc::new(StatusWorker::new(
        orders.clone(),
        payments,
        stock.clone(),
        bus_dyn.clone(),
        clock.clone(),
        StatusConfig {
            audit_log_enabled: true,
        },
    ));

    // Registration happens at call time; the returned loop futures are not
    // needed for the pull-based test bus.
    drop(bus_dyn.consume(Queue::Payment, payment_worker, shutdown.clone()));
    drop(bus_dyn.consume(Queue::StockReservation, stock_worker, shutdown.clone()));
    drop(bus_dyn.consume(Queue::Shipping, shipping_worker, shutdown.clone()));
    drop(bus_dyn.consume(Queue::OrderStatus, status_worker, shutdown.clone()));

    let service = OrderService::new(orders.clone(), catalog, bus_dyn, clock);

    Pipeline {
        pool,
        bus,
        service,
        orders,
        _shutdown: shutdown,
    }
}

/// Drain the bus until no new events appear, giving detached readiness
/// tasks time to land between rounds.
async fn settle(bus: &InMemoryEventBus) {
    let mut stable_rounds = 0;
    for _ in 0..50 {
        let before = bus.published().len();
        bus.dispatch_all().await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        if bus.published().len() == before {
            stable_rounds += 1;
            if stable_rounds >= 3 {
                return;
            }
        } else {
            stable_rounds = 0;
        }
    }
}

async fn seed_product(pool: &PgPool, price: Decimal, stock: i32) -> ProductId {
    let id = ProductId::new(format!("prod-{}", Uuid::new_v4()));
    sqlx::query(
        "INSERT INTO products (id, name, description, price, stock_quantity) \
         VALUES ($1, $2, '', $3, $4)",
    )
    .bind(id.as_str())
    .bind(format!("Product {id}"))
    .bind(price)
    .bind(stock)
    .execute(pool)
    .await
    .expect("failed to seed product");
    id
}

async fn stock_of(pool: &PgPool, product_id: &ProductId) -> i32 {
    sqlx::query("SELECT stock_quantity FROM products WHERE id = $1")
        .bind(product_id.as_str())
        .fetch_one(pool)
        .await
        .expect("product row")
        .get("stock_quantity")
}

async fn count_rows(pool: &PgPool, table: &str, order_id: &OrderId) -> i64 {
    sqlx::query_scalar(&format!(
        "SELECT COUNT(*) FROM {table} WHERE order_id = $1"
    ))
    .bind(order_id.as_str())
    .fetch_one(pool)
    .await
    .expect("count")
}

fn count_events(events: &[OrderEvent], order_id: &OrderId, event_type: EventType) -> usize {
    events
        .iter()
        .filter(|event| event.order_id == *order_id && event.event_type == event_type)
        .count()
}

#[tokio::test]
#[ignore = "requires DATABASE_URL pointing at a disposable Postgres"]
async fn happy_path_converges_to_shipped() {
    let pipeline = pipeline(1.0).await;
    let p1 = seed_product(&pipeline.pool, Decimal::new(1000, 2), 5).await;
    let p2 = seed_product(&pipeline.pool, Decimal::new(500, 2), 3).await;

    let response = pipeline
        .service
        .create_order(CreateOrderRequest {
            user_id: UserId::generate(),
            items: vec![
                CreateOrderItem {
                    product_id: p1.clone(),
                    quantity: 2,
                },
                CreateOrderItem {
                    product_id: p2.clone(),
                    quantity: 1,
                },
            ],
        })
        .await
        .expect("create order");
    assert_eq!(response.status, OrderStatus::Created);
    assert_eq!(response.total_amount, Decimal::new(2500, 2));

    settle(&pipeline.bus).await;

    let order_id = response.order_id;
    let status = pipeline
        .orders
        .status_of(&order_id)
        .await
        .expect("status")
        .expect("order exists");
    assert_eq!(status, OrderStatus::Shipped);

    assert_eq!(stock_of(&pipeline.pool, &p1).await, 3);
    assert_eq!(stock_of(&pipeline.pool, &p2).await, 2);

    let events = pipeline.bus.published();
    assert_eq!(count_events(&events, &order_id, EventType::OrderCreated), 1);
    assert_eq!(
        count_events(&events, &order_id, EventType::PaymentSuccessful),
        1
    );
    assert_eq!(count_events(&events, &order_id, EventType::StockReserved), 1);
    assert_eq!(
        count_events(&events, &order_id, EventType::OrderReadyForShipping),
        1,
        "the guarded promotion must emit exactly one readiness event"
    );
    assert_eq!(count_events(&events, &order_id, EventType::OrderShipped), 1);

    assert_eq!(count_rows(&pipeline.pool, "payment_transactions", &order_id).await, 1);
    assert_eq!(count_rows(&pipeline.pool, "shipping_info", &order_id).await, 1);
    assert_eq!(count_rows(&pipeline.pool, "stock_reservations", &order_id).await, 2);

    // First branch transition, the promotion, and the dispatch are always
    // audited; the second branch event may lose the race against the async
    // promotion and be dropped as stale.
    let history = pipeline.orders.history(&order_id).await.expect("history");
    assert!(
        (3..=4).contains(&history.len()),
        "unexpected audit trail: {history:?}"
    );
    assert_eq!(
        history.last().expect("non-empty").new_status,
        OrderStatus::Shipped
    );
}

#[tokio::test]
#[ignore = "requires DATABASE_URL pointing at a disposable Postgres"]
async fn insufficient_stock_leaves_inventory_untouched() {
    let pipeline = pipeline(1.0).await;
    let product = seed_product(&pipeline.pool, Decimal::new(1000, 2), 5).await;

    // Build the order behind the creator's back so the quote-time check
    // cannot refuse it; only the reservation engine sees the shortfall.
    let order_id = OrderId::generate();
    let now = Utc::now();
    let order = Order {
        id: order_id.clone(),
        user_id: UserId::generate(),
        total_amount: Decimal::new(10_000, 2),
        status: OrderStatus::Created,
        created_at: now,
        updated_at: now,
        items: vec![OrderItem {
            id: Uuid::new_v4().to_string(),
            order_id: order_id.clone(),
            product_id: product.clone(),
            quantity: 10,
            price: Decimal::new(1000, 2),
        }],
    };
    pipeline.orders.create(&order).await.expect("create");

    let event = OrderEvent::new(
        EventType::OrderCreated,
        order_id.clone(),
        OrderStatus::Created,
        now,
    )
    .with_user(order.user_id.clone())
    .with_total(order.total_amount)
    .with_items(order.items.clone());
    pipeline.bus.publish(&event).await.expect("publish");

    settle(&pipeline.bus).await;

    let status = pipeline
        .orders
        .status_of(&order_id)
        .await
        .expect("status")
        .expect("order exists");
    assert_eq!(status, OrderStatus::StockInsufficient);

    assert_eq!(stock_of(&pipeline.pool, &product).await, 5);
    assert_eq!(count_rows(&pipeline.pool, "stock_reservations", &order_id).await, 0);

    let events = pipeline.bus.published();
    assert_eq!(
        count_events(&events, &order_id, EventType::StockInsufficient),
        1
    );
    assert_eq!(
        count_events(&events, &order_id, EventType::OrderReadyForShipping),
        0
    );
}

#[tokio::test]
#[ignore = "requires DATABASE_URL pointing at a disposable Postgres"]
async fn late_stock_reservation_does_not_revive_a_failed_payment() {
    let pipeline = pipeline(1.0).await;
    let product = seed_product(&pipeline.pool, Decimal::new(1000, 2), 5).await;

    let order_id = OrderId::generate();
    let now = Utc::now();
    let order = Order {
        id: order_id.clone(),
        user_id: UserId::generate(),
        total_amount: Decimal::new(1000, 2),
        status: OrderStatus::Created,
        created_at: now,
        updated_at: now,
        items: vec![OrderItem {
            id: Uuid::new_v4().to_string(),
            order_id: order_id.clone(),
            product_id: product,
            quantity: 1,
            price: Decimal::new(1000, 2),
        }],
    };
    pipeline.orders.create(&order).await.expect("create");

    let failed = OrderEvent::new(
        EventType::PaymentFailed,
        order_id.clone(),
        OrderStatus::PaymentFailed,
        now,
    );
    pipeline.bus.publish(&failed).await.expect("publish");
    settle(&pipeline.bus).await;

    let reserved = OrderEvent::new(
        EventType::StockReserved,
        order_id.clone(),
        OrderStatus::StockReserved,
        now,
    );
    pipeline.bus.publish(&reserved).await.expect("publish");
    settle(&pipeline.bus).await;

    // PAYMENT_FAILED -> STOCK_RESERVED is not a legal move; the event is
    // acked and dropped.
    let status = pipeline
        .orders
        .status_of(&order_id)
        .await
        .expect("status")
        .expect("order exists");
    assert_eq!(status, OrderStatus::PaymentFailed);
    assert_eq!(
        count_rows(&pipeline.pool, "order_status_history", &order_id).await,
        1
    );
}

#[tokio::test]
#[ignore = "requires DATABASE_URL pointing at a disposable Postgres"]
async fn duplicate_delivery_writes_history_once() {
    let pipeline = pipeline(1.0).await;
    let product = seed_product(&pipeline.pool, Decimal::new(1000, 2), 5).await;

    let order_id = OrderId::generate();
    let now = Utc::now();
    let order = Order {
        id: order_id.clone(),
        user_id: UserId::generate(),
        total_amount: Decimal::new(1000, 2),
        status: OrderStatus::Created,
        created_at: now,
        updated_at: now,
        items: vec![OrderItem {
            id: Uuid::new_v4().to_string(),
            order_id: order_id.clone(),
            product_id: product,
            quantity: 1,
            price: Decimal::new(1000, 2),
        }],
    };
    pipeline.orders.create(&order).await.expect("create");

    let successful = OrderEvent::new(
        EventType::PaymentSuccessful,
        order_id.clone(),
        OrderStatus::PaymentSuccessful,
        now,
    );
    pipeline.bus.publish(&successful).await.expect("publish");
    pipeline.bus.publish(&successful).await.expect("publish");
    settle(&pipeline.bus).await;

    let status = pipeline
        .orders
        .status_of(&order_id)
        .await
        .expect("status")
        .expect("order exists");
    assert_eq!(status, OrderStatus::PaymentSuccessful);
    assert_eq!(
        count_rows(&pipeline.pool, "order_status_history", &order_id).await,
        1,
        "the second delivery is a self-transition and writes nothing"
    );
}
