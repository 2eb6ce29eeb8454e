//! Demo service for the request telemetry pipeline.
//!
//! # Architecture Overview
//!
//! ```text
//!     Client Request
//!     ───────────────▶ TraceLayer ─▶ request_logging ─▶ /banks handlers
//!                                        │                   │
//!                                        │            QueryTimer (database)
//!                                        ▼                   ▼
//!                                  ExceptionBridge ──▶ Logger ──▶ EventRouter
//!                                                               ├─▶ FileSink ─▶ logs/{category}/
//!                                                               └─▶ console
//!                                                     SystemSampler ─┘
//! ```
//!
//! A small in-memory bank registry stands in for a real data layer so every
//! record kind can be produced from the command line.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::Context;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use clap::Parser;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;

use request_telemetry::config::validation::validate_config;
use request_telemetry::config::watcher::{spawn_reload_task, ConfigWatcher};
use request_telemetry::config::loader::read_config;
use request_telemetry::config::{ConfigError, ServiceConfig};
use request_telemetry::config::schema::Environment;
use request_telemetry::http::{ApiException, AppError, HttpServer};
use request_telemetry::lifecycle::{shutdown_signal, Shutdown};
use request_telemetry::observability::database::{log_connect, log_disconnect, QueryTimer};
use request_telemetry::observability::logging::init_console;
use request_telemetry::observability::{Logger, RequestLogger};

const DATABASE: &str = "banks";

#[derive(Parser)]
#[command(name = "request-telemetry")]
#[command(about = "Demo service emitting correlated request telemetry", long_about = None)]
struct Args {
    /// TOML configuration file; watched for HTTP logging changes
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[arg(long)]
    service_name: Option<String>,

    #[arg(long)]
    bind: Option<String>,

    /// Hide internal error detail from clients and log JSON to the console
    #[arg(long)]
    production: bool,
}

#[derive(Debug, Clone, Serialize)]
struct Bank {
    id: u64,
    name: String,
    code: String,
}

#[derive(Debug, Deserialize)]
struct NewBank {
    name: String,
    code: String,
}

#[derive(Clone)]
struct AppState {
    banks: Arc<RwLock<BTreeMap<u64, Bank>>>,
    next_id: Arc<AtomicU64>,
}

impl AppState {
    fn new() -> Self {
        Self {
            banks: Arc::new(RwLock::new(BTreeMap::new())),
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }
}

fn routes(state: AppState) -> Router {
    Router::new()
        .route("/ping", get(|| async { "pong" }))
        .route("/health", get(|| async { Json(serde_json::json!({ "status": "ok" })) }))
        .route("/banks", get(list_banks).post(create_bank))
        .route("/banks/{id}", get(get_bank).delete(delete_bank))
        .with_state(state)
}

async fn list_banks(State(state): State<AppState>, log: RequestLogger) -> Json<Vec<Bank>> {
    let timer = QueryTimer::start(log, DATABASE, "SELECT id, name, code FROM banks");
    let banks: Vec<Bank> = state.banks.read().values().cloned().collect();
    timer.finish(Some(banks.len() as u64));
    Json(banks)
}

async fn get_bank(
    State(state): State<AppState>,
    log: RequestLogger,
    Path(id): Path<u64>,
) -> Result<Json<Bank>, AppError> {
    let timer = QueryTimer::start(log, DATABASE, "SELECT id, name, code FROM banks WHERE id = $1");
    let bank = state.banks.read().get(&id).cloned();
    timer.finish(Some(bank.is_some() as u64));
    bank.map(Json).ok_or_else(|| {
        ApiException::not_found(format!("Bank {id} not found"))
            .with_component("banks")
            .into()
    })
}

async fn create_bank(
    State(state): State<AppState>,
    log: RequestLogger,
    Json(new): Json<NewBank>,
) -> Result<(StatusCode, Json<Bank>), AppError> {
    if new.name.trim().is_empty() || new.code.trim().is_empty() {
        return Err(ApiException::validation("name and code are required")
            .with_component("banks")
            .into());
    }

    let timer = QueryTimer::start(log, DATABASE, "INSERT INTO banks (name, code) VALUES ($1, $2)");
    let mut banks = state.banks.write();
    if banks.values().any(|b| b.code == new.code) {
        drop(banks);
        let err = std::io::Error::new(
            std::io::ErrorKind::AlreadyExists,
            format!("unique constraint violated: banks.code = {}", new.code),
        );
        timer.fail(&err);
        return Err(ApiException::domain(format!("Bank code {} already exists", new.code))
            .with_code("DUPLICATE_BANK")
            .with_component("banks")
            .into());
    }

    let id = state.next_id.fetch_add(1, Ordering::Relaxed);
    let bank = Bank {
        id,
        name: new.name,
        code: new.code,
    };
    banks.insert(id, bank.clone());
    drop(banks);
    timer.finish(Some(1));

    Ok((StatusCode::CREATED, Json(bank)))
}

async fn delete_bank(
    State(state): State<AppState>,
    log: RequestLogger,
    Path(id): Path<u64>,
) -> Result<StatusCode, AppError> {
    let timer = QueryTimer::start(log, DATABASE, "DELETE FROM banks WHERE id = $1");
    let removed = state.banks.write().remove(&id);
    timer.finish(Some(removed.is_some() as u64));
    match removed {
        Some(_) => Ok(StatusCode::NO_CONTENT),
        None => Err(ApiException::not_found(format!("Bank {id} not found"))
            .with_component("banks")
            .into()),
    }
}

fn resolve_config(args: &Args) -> Result<ServiceConfig, ConfigError> {
    let mut config = match &args.config {
        Some(path) => read_config(path)?,
        None => ServiceConfig::default(),
    };

    if let Some(name) = &args.service_name {
        config.logging.service_name = name.clone();
    }
    if config.logging.service_name.trim().is_empty() {
        config.logging.service_name = env!("CARGO_PKG_NAME").to_string();
    }
    if let Some(bind) = &args.bind {
        config.listener.bind_address = bind.clone();
    }
    if args.production {
        config.environment = Environment::Production;
    }

    validate_config(&config).map_err(ConfigError::Validation)?;
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = resolve_config(&args)?;

    init_console(&config.logging, config.environment);

    tracing::info!(
        service = %config.logging.service_name,
        bind_address = %config.listener.bind_address,
        environment = ?config.environment,
        logs_dir = %config.logging.logs_dir.display(),
        request_timeout_secs = config.timeouts.request_secs,
        "Configuration loaded"
    );

    let logger = Logger::new(&config.logging).context("failed to start structured logger")?;
    log_connect(&logger, DATABASE);

    let server = HttpServer::new(&config, logger.clone(), routes(AppState::new()));
    let shutdown = Shutdown::new();

    // Kept alive for the lifetime of the server.
    let _watcher = match &args.config {
        Some(path) => {
            let (watcher, updates) = ConfigWatcher::new(path);
            spawn_reload_task(updates, server.request_logging(), shutdown.subscribe());
            match watcher.run() {
                Ok(w) => Some(w),
                Err(e) => {
                    tracing::warn!(error = %e, "Config watcher unavailable; hot reload disabled");
                    None
                }
            }
        }
        None => None,
    };

    let listener = TcpListener::bind(&config.listener.bind_address)
        .await
        .with_context(|| format!("failed to bind {}", config.listener.bind_address))?;

    let stop = {
        let logger = logger.clone();
        async move {
            shutdown_signal().await;
            shutdown.trigger();
            log_disconnect(&logger, DATABASE);
        }
    };
    server.run(listener, stop).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
