//! HTTP adapter and process wiring for the stock coordination system.
//!
//! Hosts both services behind one router: reservation and stock routes hit
//! the inventory side, order routes hit the order side, and the saga runs
//! between them over the in-process bus. Background tasks (expiry reaper,
//! two outbox publishers, two consumers) are spawned alongside the server
//! and share one cooperative shutdown signal.

pub mod config;
pub mod error;
pub mod routes;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use inventory::{
    ExpiryReaper, OrderCreatedHandler, ReaperConfig, ReservationService, ServiceConfig,
};
use messaging::{ConsumerConfig, EventConsumer, MessageBus, OutboxPublisher, PublisherConfig};
use metrics_exporter_prometheus::PrometheusHandle;
use orders::{OrderService, ReservationOutcomeHandler};
use store::{InventoryStore, OrderStore, OutboxStore, ProcessedEventStore};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub use config::Config;

/// Shared application state accessible from all handlers.
pub struct AppState<I: InventoryStore, O: OrderStore> {
    pub reservations: ReservationService<I>,
    pub orders: OrderService<O>,
}

/// Creates the Axum application router with all routes and shared state.
pub fn create_app<I, O>(state: Arc<AppState<I, O>>, metrics_handle: PrometheusHandle) -> Router
where
    I: InventoryStore + 'static,
    O: OrderStore + 'static,
{
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::get))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::health::check))
        .route("/reservations", post(routes::reservations::create::<I, O>))
        .route("/reservations/{id}", get(routes::reservations::get::<I, O>))
        .route(
            "/reservations/{id}/confirm",
            post(routes::reservations::confirm::<I, O>),
        )
        .route(
            "/reservations/{id}/cancel",
            post(routes::reservations::cancel::<I, O>),
        )
        .route("/stock/{product_id}", get(routes::stock::get::<I, O>))
        .route(
            "/stock/{product_id}/restock",
            post(routes::stock::restock::<I, O>),
        )
        .route("/orders", post(routes::orders::create::<I, O>))
        .route("/orders/{id}", get(routes::orders::get::<I, O>))
        .with_state(state)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}

/// Builds the application state over a pair of stores.
pub fn create_state<I, O>(
    inventory_store: I,
    order_store: O,
    config: &Config,
) -> Arc<AppState<I, O>>
where
    I: InventoryStore + Clone,
    O: OrderStore + Clone,
{
    let service_config = ServiceConfig {
        default_ttl_minutes: config.reservation_ttl_minutes,
        ..ServiceConfig::default()
    };
    Arc::new(AppState {
        reservations: ReservationService::with_config(inventory_store, service_config),
        orders: OrderService::new(order_store),
    })
}

/// Spawns the reaper, both outbox publishers and both saga consumers.
///
/// Returns the shutdown sender plus the task handles; flipping the sender
/// to `true` stops every task at its next loop turn.
pub fn spawn_background_tasks<I, O, B>(
    state: &Arc<AppState<I, O>>,
    inventory_store: I,
    order_store: O,
    bus: B,
    config: &Config,
) -> (watch::Sender<bool>, Vec<JoinHandle<()>>)
where
    I: InventoryStore + OutboxStore + ProcessedEventStore + Clone + 'static,
    O: OrderStore + OutboxStore + ProcessedEventStore + Clone + 'static,
    B: MessageBus + Clone + 'static,
{
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let publisher_config = PublisherConfig {
        interval: config.outbox_interval,
        max_retries: config.outbox_max_retries,
        ..PublisherConfig::default()
    };

    let mut handles = Vec::new();

    let reaper = ExpiryReaper::with_config(
        inventory_store.clone(),
        ReaperConfig {
            interval: config.reaper_interval,
            ..ReaperConfig::default()
        },
    );
    let rx = shutdown_rx.clone();
    handles.push(tokio::spawn(async move { reaper.run(rx).await }));

    let inventory_publisher =
        OutboxPublisher::new(inventory_store.clone(), bus.clone(), publisher_config.clone());
    let rx = shutdown_rx.clone();
    handles.push(tokio::spawn(
        async move { inventory_publisher.run(rx).await },
    ));

    let order_publisher =
        OutboxPublisher::new(order_store.clone(), bus.clone(), publisher_config);
    let rx = shutdown_rx.clone();
    handles.push(tokio::spawn(async move { order_publisher.run(rx).await }));

    let inventory_consumer = EventConsumer::new(
        inventory_store,
        bus.clone(),
        OrderCreatedHandler::new(state.reservations.clone()),
        ConsumerConfig {
            topic: "orders".to_string(),
            max_attempts: config.consumer_max_attempts,
        },
    );
    let rx = shutdown_rx.clone();
    handles.push(tokio::spawn(async move {
        if let Err(e) = inventory_consumer.run(rx).await {
            tracing::error!(error = %e, "inventory consumer stopped");
        }
    }));

    let order_consumer = EventConsumer::new(
        order_store,
        bus,
        ReservationOutcomeHandler::new(state.orders.clone()),
        ConsumerConfig {
            topic: "inventory".to_string(),
            max_attempts: config.consumer_max_attempts,
        },
    );
    let rx = shutdown_rx;
    handles.push(tokio::spawn(async move {
        if let Err(e) = order_consumer.run(rx).await {
            tracing::error!(error = %e, "order consumer stopped");
        }
    }));

    (shutdown_tx, handles)
}
