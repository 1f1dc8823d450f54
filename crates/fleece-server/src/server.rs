//! Core server implementation

use crate::{
    config::ServerConfig,
    error::{ServerError, ServerResult},
    handlers, middleware,
};

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use fleece_core::{
    HandleLoader, MetricsRecorder, ModelCache, Orchestrator, Probes, PrometheusRecorder, ServedFrom,
};
use std::{future::Future, path::PathBuf, sync::Arc};
use tokio::net::TcpListener;
use tower_http::{limit::RequestBodyLimitLayer, trace::TraceLayer};
use tracing::{error, info, warn};

/// Main server state
#[derive(Clone)]
pub struct ServerState {
    pub config: Arc<ServerConfig>,
    pub cache: Arc<ModelCache>,
    pub orchestrator: Arc<Orchestrator>,
    pub probes: Arc<Probes>,
    pub metrics: Arc<PrometheusRecorder>,
}

impl ServerState {
    /// Build the state with the loader named in the configuration
    pub fn new(config: ServerConfig) -> ServerResult<Self> {
        let loader = config.loader.build()?;
        Self::with_loader(config, loader)
    }

    /// Build the state around an explicit loader
    pub fn with_loader(config: ServerConfig, loader: Arc<dyn HandleLoader>) -> ServerResult<Self> {
        config.validate()?;

        let metrics = Arc::new(PrometheusRecorder::new());
        let recorder: Arc<dyn MetricsRecorder> = metrics.clone();
        let cache = Arc::new(ModelCache::new(&config.cache, loader, Arc::clone(&recorder))?);

        let mut orchestrator = Orchestrator::new(Arc::clone(&cache), recorder, config.device)
            .with_invoke_timeout(config.limits.invoke_timeout())
            .with_request_timeout(Some(config.limits.request_timeout()));
        if let Some(worker_id) = config.worker_id {
            orchestrator = orchestrator.with_worker_pid(worker_id);
        }

        let probes = Probes::new(Arc::clone(&cache), config.default_key());

        Ok(Self {
            config: Arc::new(config),
            cache,
            orchestrator: Arc::new(orchestrator),
            probes: Arc::new(probes),
            metrics,
        })
    }
}

/// Build the router with all routes and middleware
pub fn create_router(state: ServerState) -> Router {
    let limits = Arc::new(state.config.limits.clone());

    // /predict is bounded by the orchestrator's request timeout, which records the outcome
    let service_routes = Router::new()
        .route("/", get(handlers::info::root))
        .route("/healthz", get(handlers::health::healthz))
        .route("/readiness", get(handlers::health::readiness))
        .route("/metrics", get(handlers::metrics::metrics))
        .route("/cache_info", get(handlers::info::cache_info))
        .route_layer(axum::middleware::from_fn_with_state(
            Arc::clone(&limits),
            middleware::timeout_middleware,
        ));

    Router::new()
        .route("/predict", post(handlers::predict::predict))
        .merge(service_routes)
        .layer(axum::middleware::from_fn(middleware::logging_middleware))
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(limits.max_body_size))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Fleece HTTP server
pub struct FleeceServer {
    state: ServerState,
}

impl FleeceServer {
    /// Create a new server instance
    pub fn new(config: ServerConfig) -> ServerResult<Self> {
        Ok(Self {
            state: ServerState::new(config)?,
        })
    }

    /// Create a server around an explicit loader
    pub fn with_loader(config: ServerConfig, loader: Arc<dyn HandleLoader>) -> ServerResult<Self> {
        Ok(Self {
            state: ServerState::with_loader(config, loader)?,
        })
    }

    /// Load the default model if configured. Failure is logged, never fatal.
    pub async fn preload(&self) -> bool {
        let Some(key) = self.state.config.default_key() else {
            info!("No default model configured, skipping preload");
            return false;
        };

        match self.state.cache.get_or_load(&key).await {
            Ok(lookup) => {
                info!(
                    pid = self.state.orchestrator.worker_pid(),
                    model = %key.model_name(),
                    task = %key.task(),
                    already_cached = lookup.served_from != ServedFrom::Loaded,
                    "Default model preloaded"
                );
                true
            }
            Err(err) => {
                error!(
                    pid = self.state.orchestrator.worker_pid(),
                    model = %key.model_name(),
                    error = %err,
                    "Failed to preload default model"
                );
                false
            }
        }
    }

    /// Start the server on the configured address until Ctrl-C
    pub async fn start(self) -> ServerResult<()> {
        let addr = self.state.config.bind;
        info!("Starting Fleece server on {}", addr);

        let listener = TcpListener::bind(addr).await?;
        self.serve(listener, shutdown_signal()).await
    }

    /// Serve on `listener` until `shutdown` resolves, then drain in-flight requests
    pub async fn serve<F>(self, listener: TcpListener, shutdown: F) -> ServerResult<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if self.state.config.preload_default {
            self.preload().await;
        }

        let local_addr = listener.local_addr()?;
        let app = create_router(self.state.clone());
        info!(pid = self.state.orchestrator.worker_pid(), "Server listening on {}", local_addr);

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await
            .map_err(|e| ServerError::Internal(format!("Server error: {}", e)))?;

        info!("Server stopped");
        Ok(())
    }

    /// Get server configuration
    pub fn config(&self) -> &ServerConfig {
        &self.state.config
    }

    /// Get server state
    pub fn state(&self) -> &ServerState {
        &self.state
    }
}

/// Create a server from a configuration file, or defaults when none is given
pub async fn create_server_from_config(config_path: Option<PathBuf>) -> ServerResult<FleeceServer> {
    let config = if let Some(path) = config_path {
        ServerConfig::from_file(&path).map_err(|e| ServerError::Config(format!("Failed to load config: {}", e)))?
    } else {
        ServerConfig::default()
    };

    FleeceServer::new(config)
}

/// Run server with graceful shutdown handling
pub async fn run_server(server: FleeceServer) -> ServerResult<()> {
    server.start().await
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Shutdown signal received, draining in-flight requests"),
        Err(e) => {
            warn!("Failed to listen for shutdown signal: {}", e);
            std::future::pending::<()>().await;
        }
    }
}
