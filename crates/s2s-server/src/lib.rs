//! Embedding host for the dialback federation core.
//!
//! Wires a [`DialbackContext`] to the rest of a server: configuration, an
//! engine task that owns the context, periodic sweeps, SQLite accounting and
//! an HTTP status API. Sockets, XML and name resolution stay with the stream
//! layer, which supplies a [`Connector`], consumes [`routing::RouterEvent`]s
//! and reports stream events through the [`EngineHandle`].
//!
//! ```rust,ignore
//! let config = load_config(Some("config.toml"))?;
//! init_tracing(&config.logging);
//! let (router, router_events) = ChannelRouter::new();
//! let federation = Federation::start(&config, connector, Arc::new(router))?;
//! let engine = federation.engine();
//! // hand `engine` and `router_events` to the stream layer, then:
//! federation.serve(config.status_addr(), shutdown_signal()).await?;
//! ```

pub mod accounting;
pub mod api;
pub mod background;
pub mod config;
pub mod routing;
pub mod service;
pub mod telemetry;

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::{routing::get, Extension, Json};
use s2s_db::DbPool;
use s2s_dialback::{Collaborators, Connector, DialbackContext, Router};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;

pub use accounting::SqliteAccounting;
pub use config::{load_config, resolve_config_path, Config, ConfigError};
pub use routing::{ChannelRouter, RouterEvent};
pub use service::{EngineHandle, ServiceError};
pub use telemetry::init_tracing;

/// Application state shared across all request handlers.
#[derive(Clone)]
pub struct AppState {
    pub engine: EngineHandle,
    /// Pool for the accounting log.
    pub pool: DbPool,
}

/// Health check handler.
async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Builds the status API router.
pub fn app(state: AppState) -> axum::Router {
    axum::Router::new()
        .route("/health", get(health))
        .route("/api/connections", get(api::connections_handler))
        .route("/api/connections/log", get(api::connection_log_handler))
        .layer(TraceLayer::new_for_http())
        .layer(Extension(Arc::new(state)))
}

/// A running federation service: engine, accounting writer and sweep task.
pub struct Federation {
    engine: EngineHandle,
    pool: DbPool,
    engine_task: JoinHandle<()>,
    sweep_task: JoinHandle<()>,
    writer_task: JoinHandle<()>,
}

impl Federation {
    /// Opens the database and starts the background tasks. Must be called
    /// inside a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns `ServiceError` if the policy rows are invalid or the database
    /// cannot be opened and migrated.
    pub fn start(
        config: &Config,
        connector: Arc<dyn Connector>,
        router: Arc<dyn Router>,
    ) -> Result<Self, ServiceError> {
        let policy = config.dialback.policy()?;
        let pool = s2s_db::open(&config.database.path, config.db_settings())?;

        let settings = config.dialback.settings();
        let interval = settings.sweep_interval();
        let (accounting, writer_task) = SqliteAccounting::spawn(pool.clone());

        let context = DialbackContext::new(
            settings,
            policy,
            Collaborators {
                router,
                connector,
                accounting: Arc::new(accounting),
            },
        );
        let (engine, engine_task) = EngineHandle::spawn(context);
        let sweep_task = tokio::spawn(background::start_sweep_task(engine.clone(), interval));

        tracing::info!(
            db = %config.database.path,
            allow_legacy = config.dialback.allow_legacy,
            hosts = config.dialback.hosts.len(),
            "federation service started"
        );

        Ok(Self {
            engine,
            pool,
            engine_task,
            sweep_task,
            writer_task,
        })
    }

    pub fn engine(&self) -> EngineHandle {
        self.engine.clone()
    }

    pub fn state(&self) -> AppState {
        AppState {
            engine: self.engine.clone(),
            pool: self.pool.clone(),
        }
    }

    /// Serves the status API on `addr` until `shutdown` resolves, then stops
    /// the service.
    ///
    /// # Errors
    ///
    /// Returns `ServiceError::Io` if the address cannot be bound or serving fails.
    pub async fn serve<F>(self, addr: SocketAddr, shutdown: F) -> Result<(), ServiceError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind(addr).await?;
        tracing::info!(%addr, "status API listening");

        let served = axum::serve(listener, app(self.state()))
            .with_graceful_shutdown(shutdown)
            .await;

        self.stop().await;
        served.map_err(ServiceError::from)
    }

    /// Stops the engine and sweep tasks and waits for queued accounting
    /// records to be written.
    pub async fn stop(self) {
        self.sweep_task.abort();
        self.engine_task.abort();
        // Dropping the engine's context closes the accounting channel.
        let _ = self.engine_task.await;
        if let Err(e) = self.writer_task.await {
            tracing::error!("accounting writer join error: {}", e);
        }
        tracing::info!("federation service stopped");
    }
}

/// Waits for a SIGINT (Ctrl+C) or SIGTERM signal for graceful shutdown.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => { tracing::info!("received SIGINT, initiating graceful shutdown"); }
        () = terminate => { tracing::info!("received SIGTERM, initiating graceful shutdown"); }
    }
}
