//! Server entry point: wires stores, bus, background tasks and the router.

use api::Config;
use messaging::InMemoryBus;
use store::{
    InMemoryInventoryStore, InMemoryOrderStore, InventoryStore, OrderStore, OutboxStore,
    PostgresInventoryStore, PostgresOrderStore, ProcessedEventStore,
};
use tokio::signal;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("received SIGINT, starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("received SIGTERM, starting graceful shutdown");
        }
    }
}

async fn run<I, O>(
    inventory_store: I,
    order_store: O,
    config: Config,
    metrics_handle: metrics_exporter_prometheus::PrometheusHandle,
) where
    I: InventoryStore + OutboxStore + ProcessedEventStore + Clone + 'static,
    O: OrderStore + OutboxStore + ProcessedEventStore + Clone + 'static,
{
    let bus = InMemoryBus::new();
    let state = api::create_state(inventory_store.clone(), order_store.clone(), &config);
    let (shutdown_tx, handles) =
        api::spawn_background_tasks(&state, inventory_store, order_store, bus, &config);

    let app = api::create_app(state, metrics_handle);

    let addr = config.addr();
    tracing::info!(%addr, "starting server");
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("failed to bind address");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");

    // Stop the background tasks and wait for them to wind down.
    let _ = shutdown_tx.send(true);
    for handle in handles {
        let _ = handle.await;
    }
    tracing::info!("server shut down gracefully");
}

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let metrics_handle = metrics_exporter_prometheus::PrometheusBuilder::new()
        .install_recorder()
        .expect("failed to install Prometheus recorder");

    let config = Config::from_env();

    match config.database_url.clone() {
        Some(url) => {
            let pool = sqlx::postgres::PgPoolOptions::new()
                .max_connections(10)
                .connect(&url)
                .await
                .expect("failed to connect to database");
            store::postgres::run_migrations(&pool)
                .await
                .expect("failed to run migrations");
            tracing::info!("running on PostgreSQL stores");
            run(
                PostgresInventoryStore::new(pool.clone()),
                PostgresOrderStore::new(pool),
                config,
                metrics_handle,
            )
            .await;
        }
        None => {
            tracing::info!("DATABASE_URL unset, running on in-memory stores");
            run(
                InMemoryInventoryStore::new(),
                InMemoryOrderStore::new(),
                config,
                metrics_handle,
            )
            .await;
        }
    }
}
