//! Order service entry point.

use std::error::Error;
use std::sync::Arc;

use api::config::{Config, LogFormat};
use api::routes::orders::{AppState, Store};
use metrics_exporter_prometheus::PrometheusHandle;
use order_store::{InMemoryOrderStore, PostgresOrderStore};
use saga::{
    Dispatcher, EventPublisher, HttpInventoryClient, HttpUserDirectory, InMemoryEventPublisher,
    InMemoryInventoryClient, InMemoryUserDirectory, InventoryClient, PgNotifyPublisher,
    PostgresInventory, Reconciler, UserDirectory,
};
use sqlx::postgres::PgPoolOptions;
use tokio::signal;
use tokio::sync::watch;
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

fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);

    match config.log_format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}

/// Remote collaborators that do not depend on the store choice.
struct Remotes {
    inventory: Option<Arc<dyn InventoryClient>>,
    users: Arc<dyn UserDirectory>,
}

fn remotes(config: &Config) -> Result<Remotes, Box<dyn Error>> {
    let inventory: Option<Arc<dyn InventoryClient>> = match &config.product_service_url {
        Some(url) => {
            tracing::info!(%url, "using product service for inventory");
            Some(Arc::new(HttpInventoryClient::new(url.as_str(), config.rpc_timeout)?))
        }
        None => None,
    };

    let users: Arc<dyn UserDirectory> = match &config.user_service_url {
        Some(url) => {
            tracing::info!(%url, "using user service for e-mail lookup");
            Arc::new(HttpUserDirectory::new(url.as_str(), config.rpc_timeout)?)
        }
        None => Arc::new(InMemoryUserDirectory::with_fallback(
            config.default_notification_email.as_str(),
        )),
    };

    Ok(Remotes { inventory, users })
}

/// Runs the HTTP server with the outbox dispatcher and reconciler until a
/// shutdown signal arrives.
async fn serve<S: Store + Clone>(
    config: &Config,
    store: S,
    inventory: Arc<dyn InventoryClient>,
    publisher: Arc<dyn EventPublisher>,
    users: Arc<dyn UserDirectory>,
    metrics_handle: PrometheusHandle,
) -> Result<(), Box<dyn Error>> {
    let saga = api::build_saga(
        store.clone(),
        inventory,
        publisher.clone(),
        users,
        config.default_notification_email.as_str(),
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let dispatcher = Dispatcher::new(store, publisher, config.dispatcher_config());
    let dispatcher_task = tokio::spawn(dispatcher.run(shutdown_rx.clone()));

    let reconciler = Reconciler::new(saga.clone(), config.reconciler_config());
    let reconciler_task = tokio::spawn(reconciler.run(shutdown_rx));

    let app = api::create_app(Arc::new(AppState::new(saga)), metrics_handle);

    let addr = config.addr();
    tracing::info!(%addr, "starting order service");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    _ = shutdown_tx.send(true);
    if let Err(error) = dispatcher_task.await {
        tracing::error!(%error, "outbox dispatcher task failed");
    }
    if let Err(error) = reconciler_task.await {
        tracing::error!(%error, "reconciler task failed");
    }

    tracing::info!("server shut down gracefully");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    // 1. Configuration and tracing
    let config = Config::from_env();
    init_tracing(&config);
    for warning in &config.warnings {
        tracing::warn!("{warning}");
    }

    // 2. Install Prometheus metrics recorder
    let metrics_handle = metrics_exporter_prometheus::PrometheusBuilder::new().install_recorder()?;

    // 3. Collaborators
    let Remotes { inventory, users } = remotes(&config)?;

    // 4. Store and broker, then serve
    match &config.database_url {
        Some(url) => {
            let pool = PgPoolOptions::new()
                .max_connections(config.database_max_connections)
                .connect(url)
                .await?;
            let store = PostgresOrderStore::new(pool.clone());
            store.run_migrations().await?;
            tracing::info!("using postgres order store");

            let inventory: Arc<dyn InventoryClient> = match inventory {
                Some(inventory) => inventory,
                None => Arc::new(PostgresInventory::new(pool.clone())),
            };
            let publisher = Arc::new(PgNotifyPublisher::new(pool));

            serve(&config, store, inventory, publisher, users, metrics_handle).await
        }
        None => {
            tracing::warn!("DATABASE_URL is not set, running with in-memory store and broker");
            let inventory: Arc<dyn InventoryClient> = match inventory {
                Some(inventory) => inventory,
                None => Arc::new(InMemoryInventoryClient::new()),
            };

            serve(
                &config,
                InMemoryOrderStore::new(),
                inventory,
                Arc::new(InMemoryEventPublisher::new()),
                users,
                metrics_handle,
            )
            .await
        }
    }
}
