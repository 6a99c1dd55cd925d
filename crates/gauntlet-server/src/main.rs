//! Process bootstrap for the gauntlet gateway.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::Parser;
use tracing::{info, warn};

use gauntlet_core::{ContactInbox, ContextRegistry, Orchestrator, PromptStore, RequestLog};
use gauntlet_llm::{ModelBackend, OllamaBackend, RetryBackend};
use gauntlet_server::{build_router, Metrics, ServerState};
use gauntlet_types::GatewayConfig;

/// Zero-trust conversational inference gateway.
#[derive(Debug, Parser)]
#[command(name = "gauntlet", version)]
struct Cli {
    /// Bind address override (defaults to HOST:PORT from the environment).
    #[arg(long)]
    bind: Option<SocketAddr>,

    /// Verbose logging (debug level unless RUST_LOG is set).
    #[arg(short, long)]
    verbose: bool,
}

/// How often the backend liveness probe and conversation sweep run.
const MAINTENANCE_INTERVAL: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = Arc::new(GatewayConfig::from_env());

    let default_filter = if cli.verbose {
        "debug".to_string()
    } else {
        config.server.log_level.clone()
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .init();

    if config.server.ip_hash_salt.is_empty() {
        warn!("IP_HASH_SALT is empty; ip hashes are unsalted");
    }

    // Shared collaborators.
    let backend: Arc<dyn ModelBackend> = Arc::new(RetryBackend::new(OllamaBackend::new(
        config.models.ollama_url.clone(),
    )));
    let registry = Arc::new(ContextRegistry::load(
        &config.paths.context_dir,
        config.context.max_context_tokens,
    ));
    let prompts = Arc::new(PromptStore::load(&config.paths.prompts_dir));
    let inbox = Arc::new(ContactInbox::open(config.paths.contact_dir.clone())?);
    let reqlog = Arc::new(RequestLog::open(config.paths.request_log_path.clone())?);

    let orchestrator = Arc::new(Orchestrator::new(
        &config,
        Arc::clone(&backend),
        registry,
        prompts,
        Arc::clone(&inbox),
        Arc::clone(&reqlog),
    ));

    let models_healthy = Arc::new(AtomicBool::new(backend.probe().await));
    info!(
        healthy = models_healthy.load(Ordering::Relaxed),
        url = %config.models.ollama_url,
        "initial backend probe"
    );

    // Background maintenance: probe the backend and sweep expired
    // conversations.
    {
        let backend = Arc::clone(&backend);
        let models_healthy = Arc::clone(&models_healthy);
        let conversations = orchestrator.conversations();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(MAINTENANCE_INTERVAL);
            loop {
                ticker.tick().await;
                let healthy = backend.probe().await;
                models_healthy.store(healthy, Ordering::Relaxed);
                let swept = conversations.sweep().await;
                if swept > 0 {
                    info!(swept, "expired conversations evicted");
                }
            }
        });
    }

    let state = ServerState {
        orchestrator,
        inbox,
        reqlog,
        config: Arc::clone(&config),
        started: Instant::now(),
        models_healthy,
        metrics: Arc::new(Metrics::default()),
    };

    let addr = match cli.bind {
        Some(addr) => addr,
        None => format!("{}:{}", config.server.host, config.server.port).parse()?,
    };
    let app = build_router(state);

    info!(%addr, "gauntlet listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
