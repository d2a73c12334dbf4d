use anyhow::{Context, Result};
use axum::{body::Body, middleware, routing::get, Router};
use metrics_exporter_prometheus::PrometheusHandle;
use serde_json::json;
use std::{net::SocketAddr, sync::Arc};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::{
    config::{Config, DatabaseConfig},
    db::{Datastore, QueryLogger, SqlTraceLogger},
    handlers::{self, users::AppState},
    metrics,
    middleware::{
        capture_middleware, make_request_span, recover_middleware, trace_middleware,
        MiddlewareState,
    },
    observability::StructuredLogger,
    repository::UserRepository,
    service::UserService,
    signals::setup_signal_handlers,
};

/// Start the user API server
///
/// This function:
/// 1. Initializes metrics
/// 2. Connects the datastore and applies migrations (failure is fatal)
/// 3. Sets up signal handlers for graceful shutdown
/// 4. Serves requests until a shutdown signal arrives
/// 5. Flushes the log sink
pub async fn start_server(config: Config, logger: Arc<StructuredLogger>) -> Result<()> {
    let root = logger.root();

    info!("Initializing Prometheus metrics...");
    let metrics_handle = Arc::new(metrics::init_metrics()?);

    root.info(
        "Initializing database",
        json!({
            "url": &config.database.url,
            "log_sql": config.database.log_sql,
            "log_level": &config.database.log_level,
        }),
    );
    let datastore = match init_datastore(&config.database, &logger).await {
        Ok(datastore) => datastore,
        Err(err) => root.fatal(
            "Failed to initialize database",
            json!({ "err": format!("{:#}", err) }),
        ),
    };
    root.info("Database initialized successfully", json!({}));

    let (shutdown_tx, signal_handle) = setup_signal_handlers();
    let mut shutdown_rx = shutdown_tx.subscribe();

    let app = with_observability(
        create_router(build_state(datastore.clone(), logger.clone()), metrics_handle),
        MiddlewareState::new(logger.clone(), &config.server),
    );

    let addr = SocketAddr::from((
        config.server.host.parse::<std::net::IpAddr>()?,
        config.server.port,
    ));

    root.info("Starting server", json!({ "addr": addr.to_string() }));

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown_rx.recv().await;
            info!("Shutdown signal received, draining connections...");
        })
        .await?;

    signal_handle.await?;
    datastore.close().await;
    root.info("Server stopped gracefully", json!({}));
    logger.shutdown();

    Ok(())
}

/// Connect, attach the query logger when SQL logging is on, and migrate
pub async fn init_datastore(
    config: &DatabaseConfig,
    logger: &Arc<StructuredLogger>,
) -> Result<Datastore> {
    let query_logger: Option<Arc<dyn QueryLogger>> = if config.log_sql {
        Some(Arc::new(SqlTraceLogger::from_config(logger.clone(), config)))
    } else {
        None
    };

    let datastore = Datastore::connect(config, query_logger)
        .await
        .with_context(|| format!("failed to connect to {}", config.url))?;
    datastore
        .migrate()
        .await
        .context("failed to apply migrations")?;

    Ok(datastore)
}

/// Wire repository → service → handler state
pub fn build_state(datastore: Datastore, logger: Arc<StructuredLogger>) -> AppState {
    let repository = UserRepository::new(datastore, logger.clone());
    AppState {
        service: UserService::new(repository, logger.clone()),
        logger,
    }
}

/// Create the Axum router with all routes
pub fn create_router(app_state: AppState, metrics_handle: Arc<PrometheusHandle>) -> Router {
    let api_routes = Router::new()
        .route("/api/v1/users", get(handlers::users::list_users))
        .route("/api/v1/users/:id", get(handlers::users::get_user))
        .with_state(app_state);

    Router::new()
        .route("/metrics", get(handlers::metrics_handler::metrics))
        .with_state(metrics_handle)
        .merge(api_routes)
}

/// Wrap every route of `router` in the observability middleware chain
///
/// Layers are listed innermost first; `trace_middleware` ends up outermost so
/// the `request` span and every later stage see the trace context.
pub fn with_observability(router: Router, state: MiddlewareState) -> Router {
    let trace_layer = TraceLayer::new_for_http()
        .make_span_with(make_request_span::<Body>)
        .on_request(())
        .on_response(())
        .on_body_chunk(())
        .on_eos(())
        .on_failure(());

    router
        .layer(middleware::from_fn_with_state(state.clone(), recover_middleware))
        .layer(middleware::from_fn_with_state(state, capture_middleware))
        .layer(trace_layer)
        .layer(middleware::from_fn(trace_middleware))
}
