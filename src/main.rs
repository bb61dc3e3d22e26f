use newsroom_api::{
    AppState,
    broker::{AmqpBroker, Broker},
    config::{AppConfig, Env},
    create_router,
    repository::{PostgresRepository, RepositoryState},
    rpc::{ChannelPool, RpcClient},
};
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// main
///
/// Loads configuration, initializes logging, the database pool and the broker RPC
/// client, then serves HTTP until Ctrl-C.
#[tokio::main]
async fn main() {
    // 1. Configuration
    dotenv::dotenv().ok();
    let config = AppConfig::load();

    // 2. Logging
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "newsroom_api=debug,tower_http=info,axum=trace".into());

    match config.env {
        Env::Local => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().pretty())
                .init();
        }
        Env::Production => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        }
    }

    tracing::info!("Application starting in {:?} mode", config.env);

    // 3. Database
    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&config.db_url)
        .await
        .expect("FATAL: Failed to connect to Postgres. Check DATABASE_URL.");

    let repo = Arc::new(PostgresRepository::new(pool)) as RepositoryState;

    // 4. Broker RPC client
    // The connection is opened lazily on the first call.
    let broker = Arc::new(AmqpBroker::new(config.amqp_url.clone())) as Arc<dyn Broker>;
    let channel_pool = Arc::new(ChannelPool::new(broker, config.rpc_max_channels));
    let rpc = Arc::new(RpcClient::new(channel_pool.clone(), config.rpc_timeout));
    tracing::info!(
        max_channels = channel_pool.max_channels(),
        timeout_secs = rpc.timeout().as_secs(),
        "RPC client ready"
    );

    // 5. State and router
    let port = config.port;
    let app = create_router(AppState { repo, rpc, config });

    let address = format!("0.0.0.0:{}", port);
    let listener = TcpListener::bind(&address)
        .await
        .expect("FATAL: Failed to bind HTTP listener. Check PORT.");

    tracing::info!("Listening on {}", address);
    tracing::info!("API Documentation (Swagger UI) available at: http://localhost:{}/swagger-ui", port);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("FATAL: HTTP server error");

    // 6. Teardown
    channel_pool.shutdown().await;
    tracing::info!("Shutdown complete");
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
