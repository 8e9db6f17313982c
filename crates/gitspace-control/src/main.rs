//! Gitspace Control Plane - Infrastructure Lifecycle Orchestrator
//!
//! This is the main entry point for the control plane service. It wires the
//! store, the Docker provider, the completion listener and the action service,
//! and serves health endpoints until interrupted.

use std::sync::Arc;

use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use gitspace_control::{
    AllowAllAuthorizer, BackgroundTasks, ControlConfig, EventEmitter, EventMessages,
    GitspaceResumer, GitspaceService, InfraEventListener, InfraProvisioner, StoreEventEmitter,
};
use gitspace_infra::{
    BollardEngine, ChannelSink, DockerProvider, DockerProviderConfig, InfraProviderFactory,
};
use gitspace_store::{RocksStore, Store};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Application state shared across handlers.
struct AppState<S: Store> {
    service: Arc<GitspaceService<S>>,
}

impl<S: Store> Clone for AppState<S> {
    fn clone(&self) -> Self {
        Self {
            service: Arc::clone(&self.service),
        }
    }
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    service: &'static str,
}

async fn health_handler() -> impl IntoResponse {
    Json(HealthResponse {
        status: "healthy",
        service: "gitspace-control",
    })
}

async fn ready_handler<S: Store + 'static>(State(state): State<AppState<S>>) -> impl IntoResponse {
    if state.service.tasks().shutdown_token().is_cancelled() {
        (StatusCode::SERVICE_UNAVAILABLE, "shutting down")
    } else {
        (StatusCode::OK, "ready")
    }
}

fn create_router<S: Store + 'static>(state: AppState<S>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/ready", get(ready_handler::<S>))
        .with_state(state)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,gitspace=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Gitspace Control Plane");

    // Load configuration from environment
    let listen_addr = std::env::var("LISTEN_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string());
    let data_dir = std::env::var("DATA_DIR").unwrap_or_else(|_| "/data".to_string());
    let config = ControlConfig::from_env();

    // Initialize store
    let store = Arc::new(RocksStore::open(&data_dir)?);
    tracing::info!(data_dir = %data_dir, "Initialized RocksDB store");

    // Providers report completions through a channel
    let (sink, completions) = ChannelSink::channel();
    let sink = Arc::new(sink);

    let docker_config = DockerProviderConfig::from_env();
    let engine = BollardEngine::connect(docker_config.socket_path.as_deref())?;
    let docker = DockerProvider::new(Arc::new(engine), sink, docker_config);
    let factory = InfraProviderFactory::builder()
        .register(Arc::new(docker))
        .build();
    tracing::info!(providers = ?factory.provider_types(), "Registered infra providers");

    let messages = Arc::new(EventMessages::new());
    let emitter: Arc<dyn EventEmitter> =
        Arc::new(StoreEventEmitter::new(store.clone(), messages));
    let provisioner = Arc::new(InfraProvisioner::new(
        store.clone(),
        factory,
        config.clone(),
    ));

    let shutdown = CancellationToken::new();
    let tasks = BackgroundTasks::new(config.max_background_tasks, shutdown.clone());

    // Completion listener
    let listener = Arc::new(InfraEventListener::new(
        store.clone(),
        provisioner.clone(),
        Arc::new(GitspaceResumer::new(emitter.clone())),
    ));
    let listener_task = tokio::spawn(listener.run(completions, shutdown.clone()));

    let service = Arc::new(GitspaceService::new(
        store,
        provisioner,
        Arc::new(AllowAllAuthorizer),
        emitter,
        tasks.clone(),
        config,
    ));

    let app = create_router(AppState { service });

    // Start server
    tracing::info!(listen_addr = %listen_addr, "Starting HTTP server");
    let tcp = tokio::net::TcpListener::bind(&listen_addr).await?;
    let signal = shutdown.clone();
    axum::serve(tcp, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for shutdown signal");
            }
            tracing::info!("Shutdown requested");
            signal.cancel();
        })
        .await?;

    tasks.shutdown().await;
    if let Err(e) = listener_task.await {
        tracing::error!(error = %e, "Infra event listener task failed");
    }
    tracing::info!("Gitspace Control Plane stopped");

    Ok(())
}
