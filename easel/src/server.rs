use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use easel_cache::{FsArtifactStore, MemoryArtifactStore};
use easel_config::Config;
use easel_core::{ArtifactStore, GenerationRequest};
use easel_engine::{
    BatchId, BatchSnapshot, Dispatcher, DispatcherSettings, GenerationJob, JobId, MemoryJobStore, SubmitOptions,
};
use easel_providers::{ConfigCredentials, build_providers};
use easel_ratelimit::ProviderLimiters;
use serde::Deserialize;
use tower_http::trace::TraceLayer;

use crate::error::ApiError;

/// Assembled server with all routes and middleware
pub struct Server {
    router: Router,
    listen_address: SocketAddr,
    dispatcher: Dispatcher,
}

impl Server {
    /// Build the server from configuration
    ///
    /// # Errors
    ///
    /// Returns an error if rate-limiter or dispatcher construction fails
    pub fn new(config: Config, listen_override: Option<SocketAddr>) -> anyhow::Result<Self> {
        let listen_address = listen_override.unwrap_or(config.server.listen);

        let credentials = Arc::new(ConfigCredentials::from_config(&config));
        let providers = build_providers(&config, credentials);
        let limiters =
            ProviderLimiters::new(config.active_providers().map(|(name, p)| (name, p.rate)))?;

        let artifacts: Arc<dyn ArtifactStore> = match &config.artifacts.root {
            Some(root) => Arc::new(FsArtifactStore::new(root.clone())),
            None => Arc::new(MemoryArtifactStore::new()),
        };

        let settings = DispatcherSettings::from_config(&config.dispatcher)?;
        let dispatcher = Dispatcher::new(
            settings,
            providers,
            limiters,
            Arc::new(MemoryJobStore::new()),
            artifacts,
        );

        let router = Router::new()
            .route("/v1/images/generations", post(submit))
            .route("/v1/images/batches", post(submit_batch))
            .route("/v1/images/jobs/{id}", get(job).delete(cancel_job))
            .route("/v1/images/batches/{id}", get(batch).delete(cancel_batch))
            .route("/healthz", get(health))
            .layer(TraceLayer::new_for_http())
            .with_state(dispatcher.clone());

        Ok(Self {
            router,
            listen_address,
            dispatcher,
        })
    }

    /// Get the configured listen address
    #[must_use]
    pub const fn listen_address(&self) -> SocketAddr {
        self.listen_address
    }

    /// Start serving requests
    ///
    /// Blocks until the cancellation token is triggered.
    ///
    /// # Errors
    ///
    /// Returns an error if binding the TCP listener or serving fails
    pub async fn serve(self, shutdown: tokio_util::sync::CancellationToken) -> anyhow::Result<()> {
        let listener = tokio::net::TcpListener::bind(self.listen_address).await?;
        let local_addr = listener.local_addr()?;
        tracing::info!(%local_addr, "server listening");

        let dispatcher = self.dispatcher.clone();
        axum::serve(listener, self.router)
            .with_graceful_shutdown(async move {
                shutdown.cancelled().await;
                dispatcher.shutdown();
                tracing::info!("graceful shutdown initiated");
            })
            .await?;

        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct GenerateBody {
    #[serde(flatten)]
    request: GenerationRequest,
    /// Regenerate even when a cached artifact exists
    #[serde(default)]
    force: bool,
    /// Block until the job is terminal instead of returning the queued snapshot
    #[serde(default)]
    wait: bool,
}

#[derive(Debug, Deserialize)]
struct BatchBody {
    requests: Vec<GenerationRequest>,
    /// Block until every member is terminal
    #[serde(default)]
    wait: bool,
}

/// Handle single generation requests
async fn submit(
    State(dispatcher): State<Dispatcher>,
    Json(body): Json<GenerateBody>,
) -> Result<Json<GenerationJob>, ApiError> {
    let mut handle = dispatcher
        .submit(body.request, SubmitOptions { force: body.force })
        .await?;

    let job = if body.wait { handle.wait().await } else { handle.snapshot() };
    Ok(Json(job))
}

/// Handle batch submissions
async fn submit_batch(
    State(dispatcher): State<Dispatcher>,
    Json(body): Json<BatchBody>,
) -> Result<Json<BatchSnapshot>, ApiError> {
    let mut handle = dispatcher.submit_batch(body.requests).await?;
    if body.wait {
        handle.wait().await;
    }
    Ok(Json(dispatcher.batch(handle.id())?))
}

async fn job(
    State(dispatcher): State<Dispatcher>,
    Path(id): Path<String>,
) -> Result<Json<GenerationJob>, ApiError> {
    let id = parse_job_id(&id)?;
    Ok(Json(dispatcher.job(id).await?))
}

async fn cancel_job(
    State(dispatcher): State<Dispatcher>,
    Path(id): Path<String>,
) -> Result<Json<GenerationJob>, ApiError> {
    let id = parse_job_id(&id)?;
    dispatcher.cancel_job(id).await?;
    Ok(Json(dispatcher.job(id).await?))
}

async fn batch(
    State(dispatcher): State<Dispatcher>,
    Path(id): Path<String>,
) -> Result<Json<BatchSnapshot>, ApiError> {
    Ok(Json(dispatcher.batch(parse_batch_id(&id)?)?))
}

async fn cancel_batch(
    State(dispatcher): State<Dispatcher>,
    Path(id): Path<String>,
) -> Result<Json<BatchSnapshot>, ApiError> {
    let id = parse_batch_id(&id)?;
    dispatcher.cancel_batch(id).await?;
    Ok(Json(dispatcher.batch(id)?))
}

/// Health check handler
async fn health() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

fn parse_job_id(raw: &str) -> Result<JobId, ApiError> {
    raw.parse()
        .map_err(|_| easel_engine::EngineError::InvalidRequest(format!("malformed job id '{raw}'")).into())
}

fn parse_batch_id(raw: &str) -> Result<BatchId, ApiError> {
    raw.parse()
        .map_err(|_| easel_engine::EngineError::InvalidRequest(format!("malformed batch id '{raw}'")).into())
}
