//! Shared helpers for integration tests
#![allow(dead_code)]

use axum::Router;
use metrics_exporter_prometheus::PrometheusBuilder;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;
use user_api::{
    config::{DatabaseConfig, LogConfig, ServerConfig},
    db::Datastore,
    middleware::MiddlewareState,
    observability::StructuredLogger,
    server,
};

pub fn log_config(dir: &Path) -> LogConfig {
    LogConfig {
        level: "debug".to_string(),
        filename: dir.join("logs/app.log").to_string_lossy().into_owned(),
        ..LogConfig::default()
    }
}

pub fn database_config(dir: &Path) -> DatabaseConfig {
    DatabaseConfig {
        url: format!("sqlite://{}", dir.join("data/users.db").display()),
        ..DatabaseConfig::default()
    }
}

/// Parse every JSON line of one log file
pub fn read_records(path: &Path) -> Vec<Value> {
    std::fs::read_to_string(path)
        .unwrap_or_default()
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| serde_json::from_str(line).expect("log line is valid JSON"))
        .collect()
}

pub fn files_in(dir: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = std::fs::read_dir(dir)
        .unwrap()
        .map(|entry| entry.unwrap().path())
        .filter(|path| path.is_file())
        .collect();
    files.sort();
    files
}

/// Full application over a temp directory: file logger, SQLite datastore, router
pub struct TestApp {
    pub dir: TempDir,
    pub logger: Arc<StructuredLogger>,
    pub datastore: Datastore,
    pub router: Router,
}

impl TestApp {
    pub async fn new() -> Self {
        Self::with_routes(Router::new()).await
    }

    /// `extra` routes are merged before the observability layers are applied
    pub async fn with_routes(extra: Router) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let logger = Arc::new(StructuredLogger::init(&log_config(dir.path())).unwrap());
        let datastore = server::init_datastore(&database_config(dir.path()), &logger)
            .await
            .unwrap();

        let metrics_handle = Arc::new(PrometheusBuilder::new().build_recorder().handle());
        let routes = server::create_router(
            server::build_state(datastore.clone(), logger.clone()),
            metrics_handle,
        )
        .merge(extra);
        let router = server::with_observability(
            routes,
            MiddlewareState::new(logger.clone(), &ServerConfig::default()),
        );

        Self {
            dir,
            logger,
            datastore,
            router,
        }
    }

    /// Insert users directly through the pool so seeding leaves no log records
    pub async fn seed_users(&self, count: usize) {
        for i in 1..=count {
            sqlx::query(
                "INSERT INTO users (name, email, created_at, updated_at) VALUES (?, ?, ?, ?)",
            )
            .bind(format!("user{:02}", i))
            .bind(format!("user{:02}@example.com", i))
            .bind("2024-01-01T00:00:00Z")
            .bind("2024-01-01T00:00:00Z")
            .execute(self.datastore.pool())
            .await
            .unwrap();
        }
    }

    /// Flush the sink and return everything written so far
    pub fn records(&self) -> Vec<Value> {
        self.logger.shutdown();
        read_records(&self.dir.path().join("logs/app.log"))
    }
}
