use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use llm_eval_core::{Catalog, JobQueue, TaskStore};
use llm_eval_inference::InferenceClient;
use llm_eval_storage::{
    postgres, InMemoryCatalog, InMemoryJobQueue, InMemoryStore, PgJobQueue, PgTaskStore,
    PostgresConfig,
};
use llm_eval_workflow::evaluators::{HttpSandboxClient, SandboxClient};
use llm_eval_workflow::{BackendKind, PollingProcessor, Processor, ProcessorCore, QueueProcessor};

mod config;
mod server;

use config::{LabConfig, LogFormat};

fn init_tracing(config: &LabConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.filter));
    let registry = tracing_subscriber::registry().with(filter);
    match config.logging.format {
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).init(),
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json().with_current_span(false))
            .init(),
    }
}

async fn open_storage(config: &LabConfig) -> Result<(Arc<dyn TaskStore>, Arc<dyn JobQueue>)> {
    let Some(url) = &config.database.url else {
        tracing::warn!("No database configured; state lives in memory and is lost on exit");
        return Ok((
            Arc::new(InMemoryStore::new()),
            Arc::new(InMemoryJobQueue::new(config.queue_settings())),
        ));
    };

    let pg = PostgresConfig::new(url.clone()).with_max_connections(config.database.max_connections);
    let pool = postgres::create_pool(&pg).await?;
    if config.database.run_migrations {
        postgres::migrate(&pool).await?;
    }
    Ok((
        Arc::new(PgTaskStore::new(pool.clone())),
        Arc::new(PgJobQueue::new(pool, config.queue_settings())),
    ))
}

async fn load_catalog(config: &LabConfig) -> Result<Arc<dyn Catalog>> {
    let catalog = match &config.catalog.path {
        Some(path) => InMemoryCatalog::from_json_file(path)
            .await
            .with_context(|| format!("loading catalog {}", path.display()))?,
        None => {
            tracing::warn!("No catalog configured; every task will be rejected");
            InMemoryCatalog::new()
        }
    };
    Ok(Arc::new(catalog))
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
    }
    tracing::info!("Shutdown signal received");
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = LabConfig::load()?;
    init_tracing(&config);
    tracing::info!(backend = ?config.processor.backend, "Starting LLM evaluation engine");

    let (store, queue) = open_storage(&config).await?;
    let catalog = load_catalog(&config).await?;
    let inference = InferenceClient::new(catalog.clone(), config.inference.clone())?;

    let missing = inference.models_without_credentials().await?;
    if !missing.is_empty() {
        tracing::warn!(models = ?missing, "Provider credentials missing; health check will fail");
    }

    let sandbox: Option<Arc<dyn SandboxClient>> = match &config.sandbox.url {
        Some(url) => Some(Arc::new(HttpSandboxClient::new(url, config.sandbox.timeout())?)),
        None => None,
    };

    let core = Arc::new(ProcessorCore::new(
        store,
        catalog,
        inference,
        sandbox,
        config.processor.clone(),
    ));
    let processor: Arc<dyn Processor> = match config.processor.backend {
        BackendKind::Polling => Arc::new(PollingProcessor::new(core)),
        BackendKind::Queue => Arc::new(QueueProcessor::new(core, queue)),
    };
    processor.start().await?;

    let app = server::router(server::AppState {
        processor: processor.clone(),
    });
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .context("invalid server address")?;
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    processor.stop().await?;
    tracing::info!("Engine stopped");
    Ok(())
}
