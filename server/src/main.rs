//! orderbus process bootstrap.
//!
//! One process runs the whole pipeline: the HTTP intake, the four queue
//! consumers and the reservation sweeper. Horizontal scale comes from
//! running more instances; consumers on the same queue compete, and all
//! cross-instance coordination goes through the database and the broker.

mod config;
mod error;
mod routes;
mod state;

use config::Config;
use orderbus_core::environment::{Clock, SystemClock};
use orderbus_core::event_bus::{EventBus, EventHandler, Queue};
use orderbus_postgres::{CatalogStore, OrderStore, PaymentStore, ShippingStore, StockStore};
use orderbus_rabbitmq::RabbitEventBus;
use orderbus_workers::creator::OrderService;
use orderbus_workers::payment::PaymentWorker;
use orderbus_workers::shipping::ShippingWorker;
use orderbus_workers::status::StatusWorker;
use orderbus_workers::stock::StockWorker;
use orderbus_workers::sweeper::ReservationSweeper;
use state::AppState;
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "orderbus=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env();
    info!(
        host = %config.server.host,
        port = config.server.port,
        exchange = %config.rabbitmq.exchange,
        "starting orderbus"
    );

    let pool = orderbus_postgres::connect(&config.database.url, config.database.max_connections)
        .await?;
    orderbus_postgres::run_migrations(&pool).await?;

    let orders = Arc::new(OrderStore::new(pool.clone()));
    let catalog = Arc::new(CatalogStore::new(pool.clone()));
    let stock = Arc::new(StockStore::new(pool.clone()));
    let payments = Arc::new(PaymentStore::new(pool.clone()));
    let shipping = Arc::new(ShippingStore::new(pool.clone()));

    let bus: Arc<dyn EventBus> = Arc::new(
        RabbitEventBus::builder()
            .url(config.rabbitmq.url.clone())
            .exchange(config.rabbitmq.exchange.clone())
            .retry_attempts(config.rabbitmq.retry_attempts)
            .retry_delay(config.rabbitmq.retry_delay)
            .heartbeat(config.rabbitmq.heartbeat)
            .connect()
            .await?,
    );
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let shutdown = CancellationToken::new();
    let mut tasks = JoinSet::new();

    let payment_worker: Arc<dyn EventHandler> = Arc::new(PaymentWorker::new(
        payments.clone(),
        bus.clone(),
        clock.clone(),
        config.payment.clone(),
    ));
    let stock_worker: Arc<dyn EventHandler> = Arc::new(StockWorker::new(
        stock.clone(),
        bus.clone(),
        clock.clone(),
        config.stock.clone(),
    ));
    let shipping_worker: Arc<dyn EventHandler> = Arc::new(ShippingWorker::new(
        orders.clone(),
        payments.clone(),
        stock.clone(),
        shipping,
        bus.clone(),
        clock.clone(),
        config.shipping.clone(),
    ));
    let status_worker: Arc<dyn EventHandler> = Arc::new(StatusWorker::new(
        orders.clone(),
        payments,
        stock.clone(),
        bus.clone(),
        clock.clone(),
        config.status.clone(),
    ));

    spawn_consumer(&mut tasks, bus.clone(), Queue::Payment, payment_worker, &shutdown);
    spawn_consumer(
        &mut tasks,
        bus.clone(),
        Queue::StockReservation,
        stock_worker,
        &shutdown,
    );
    spawn_consumer(
        &mut tasks,
        bus.clone(),
        Queue::Shipping,
        shipping_worker,
        &shutdown,
    );
    spawn_consumer(
        &mut tasks,
        bus.clone(),
        Queue::OrderStatus,
        status_worker,
        &shutdown,
    );

    let sweeper = ReservationSweeper::new(stock, clock.clone(), config.sweep_interval);
    let sweeper_shutdown = shutdown.clone();
    tasks.spawn(async move {
        sweeper.run(sweeper_shutdown).await;
    });

    let service = OrderService::new(orders, catalog, bus, clock);
    let app = routes::router(AppState::new(service));

    let listener =
        tokio::net::TcpListener::bind((config.server.host.as_str(), config.server.port)).await?;
    info!(addr = %listener.local_addr()?, "HTTP listener ready");

    axum::serve(listener, app)
        .with_graceful_shutdown(wait_for_shutdown(shutdown.clone()))
        .await?;

    shutdown.cancel();
    while let Some(result) = tasks.join_next().await {
        if let Err(e) = result {
            error!(error = %e, "background task panicked");
        }
    }
    info!("orderbus stopped");
    Ok(())
}

fn spawn_consumer(
    tasks: &mut JoinSet<()>,
    bus: Arc<dyn EventBus>,
    queue: Queue,
    handler: Arc<dyn EventHandler>,
    shutdown: &CancellationToken,
) {
    let shutdown = shutdown.clone();
    tasks.spawn(async move {
        if let Err(e) = bus.consume(queue, handler, shutdown).await {
            error!(queue = %queue, error = %e, "consumer terminated");
        }
    });
}

async fn wait_for_shutdown(shutdown: CancellationToken) {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("shutdown signal received"),
        Err(e) => error!(error = %e, "failed to listen for shutdown signal"),
    }
    shutdown.cancel();
}
