//! Hospital service entry point.

use std::sync::Arc;

use api::config::{Config, LogFormat};
use api::wiring::{self, Broker};
use sqlx::postgres::PgPoolOptions;
use store::PostgresStore;
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
    let (json, text) = match config.log_format {
        LogFormat::Json => (Some(tracing_subscriber::fmt::layer().json()), None),
        LogFormat::Text => (None, Some(tracing_subscriber::fmt::layer())),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(json)
        .with(text)
        .init();
}

#[tokio::main]
async fn main() {
    // 1. Configuration and tracing
    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("configuration error: {e}");
            std::process::exit(1);
        }
    };
    init_tracing(&config);

    // 2. Install Prometheus metrics recorder
    let metrics_handle = metrics_exporter_prometheus::PrometheusBuilder::new()
        .install_recorder()
        .expect("failed to install Prometheus recorder");

    // 3. Connect and migrate
    let pool = PgPoolOptions::new()
        .max_connections(config.db_max_connections)
        .min_connections(config.db_min_connections)
        .connect(&config.database_url)
        .await
        .expect("failed to connect to database");
    let store = PostgresStore::new(pool);
    store
        .run_migrations()
        .await
        .expect("failed to run migrations");

    // 4. Wire the propagation strategy and start its event source
    let broker = Broker::from_config(&config).expect("failed to set up broker");
    let propagation = wiring::build(&config, store.clone(), &broker)
        .await
        .expect("failed to set up propagation");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let source = propagation.source;
    let mut source_task = tokio::spawn(async move {
        if let Err(e) = source.run(shutdown_rx).await {
            tracing::error!(source = source.name(), error = %e, "event source failed");
        }
    });

    // 5. Build the application
    let state = Arc::new(api::AppState::new(store, propagation.write_path));
    let app = api::create_app(state, metrics_handle);

    // 6. Serve until a shutdown signal arrives
    let addr = config.addr();
    tracing::info!(%addr, strategy = ?config.strategy, "starting hospital service");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("failed to bind address");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");

    // 7. Stop the event source, waiting at most the grace period
    let _ = shutdown_tx.send(true);
    if tokio::time::timeout(config.shutdown_grace, &mut source_task)
        .await
        .is_err()
    {
        tracing::warn!(
            grace_secs = config.shutdown_grace.as_secs(),
            "event source did not stop within the grace period"
        );
        source_task.abort();
    }

    tracing::info!("server shut down gracefully");
}
