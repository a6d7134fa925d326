//! Inquest Engine
//!
//! Reasoning-and-retrieval orchestration service. Wires the pipeline
//! executor to the configured retrieval and generation backends and
//! keeps it running until shutdown. Transport surfaces are provided by
//! deployments embedding `inquest-core`; this binary exists for local
//! runs and smoke checks against configured backends.

use inquest_core::config::AppConfig;
use inquest_core::metrics::{EXTERNAL_CALL_BUCKETS, PIPELINE_BUCKETS, register_metrics};
use inquest_core::pipeline::{
    HttpRetriever, OpenAiGenerator, PipelineExecutor, StaticRetriever, StubGenerator,
};
use inquest_core::session::InMemoryStore;
use inquest_core::VERSION;
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{info, warn, Level};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_max_level(Level::INFO)
        .with_target(true)
        .json()
        .init();

    info!("Starting Inquest Engine v{}", VERSION);

    // Load configuration
    let config = AppConfig::load().map_err(|e| {
        tracing::error!(error = %e, "Failed to load configuration");
        e
    })?;

    let config = Arc::new(config);

    // Prometheus exporter (optional)
    if config.observability.metrics_port > 0 {
        let addr: SocketAddr = ([0, 0, 0, 0], config.observability.metrics_port).into();
        PrometheusBuilder::new()
            .with_http_listener(addr)
            .set_buckets_for_metric(
                Matcher::Suffix("pipeline_duration_seconds".to_string()),
                PIPELINE_BUCKETS,
            )?
            .set_buckets_for_metric(
                Matcher::Suffix("duration_seconds".to_string()),
                EXTERNAL_CALL_BUCKETS,
            )?
            .install()?;
        register_metrics();
        info!("Metrics exporter listening on port {}", config.observability.metrics_port);
    }

    // Retrieval backend: HTTP endpoint when configured, empty static
    // corpus otherwise
    let retriever: Arc<dyn inquest_core::pipeline::Retriever> =
        match config.retrieval.endpoint.as_deref() {
            Some(endpoint) => {
                info!("Using retrieval endpoint {}", endpoint);
                Arc::new(HttpRetriever::new(&config.retrieval)?)
            }
            None => {
                warn!("retrieval.endpoint not set, using empty static retriever");
                Arc::new(StaticRetriever::empty())
            }
        };

    // Generation backend: OpenAI-compatible API when a key is present,
    // deterministic stub otherwise
    let generator: Arc<dyn inquest_core::pipeline::Generator> =
        if config.generation.api_key.is_some() {
            info!(model = %config.generation.model, "Using generation endpoint {}", config.generation.endpoint);
            Arc::new(OpenAiGenerator::new(&config.generation)?)
        } else {
            warn!("generation.api_key not set, using stub generator");
            Arc::new(StubGenerator)
        };

    let store = Arc::new(InMemoryStore::new());
    let _executor = PipelineExecutor::new(store, retriever, generator, config);

    // TODO: serve PipelineRequest over gRPC once the transport contract
    // settles; until then the executor is exercised through library use
    info!("Inquest Engine ready");

    shutdown_signal().await;

    info!("Inquest Engine shutdown complete");
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, starting shutdown..."),
        _ = terminate => info!("Received SIGTERM, starting shutdown..."),
    }
}
