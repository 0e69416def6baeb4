//! Arena orchestrator
//!
//! Provisions game servers from templates on demand, handing each one an
//! overlay IP address or a host port from in-memory pools.

use std::sync::Arc;

use anyhow::{Context, Result};
use arena_networking::{IpPool, PortPool};
use arena_orchestrator::{
    api,
    config::{Config, ProviderKind},
    hook::HookClient,
    provider::{DockerProvider, MockProvider, Provider},
    provision::Provisioner,
    reconciler::Reconciler,
    state::AppState,
    template::TemplateStore,
};
use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::parse();

    // Prefer RUST_LOG, fall back to ARENA_LOG_LEVEL
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| config.log_level.clone().into()))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("Starting arena orchestrator");
    config.validate()?;
    info!(
        listen_addr = %config.listen_addr,
        templates_dir = %config.templates_dir.display(),
        ip_range = %format!("{}-{}", config.ip_start, config.ip_end),
        port_range = %format!("{}-{}", config.port_start, config.port_end),
        provider = ?config.provider,
        "Configuration loaded"
    );

    let templates = TemplateStore::load_dir(&config.templates_dir)
        .with_context(|| format!("loading templates from {}", config.templates_dir.display()))?;
    if templates.is_empty() {
        warn!("No templates loaded, every create request will fail");
    }

    let provider: Arc<dyn Provider> = match config.provider {
        ProviderKind::Docker => match DockerProvider::connect().await {
            Ok(provider) => Arc::new(provider),
            Err(e) => {
                error!(error = %e, "Failed to connect to Docker");
                return Err(e.into());
            }
        },
        ProviderKind::Mock => {
            warn!("Using in-memory mock provider");
            Arc::new(MockProvider::new())
        }
    };

    let ip_pool = Arc::new(IpPool::new(config.ip_start, config.ip_end)?);
    let port_pool = Arc::new(PortPool::new(config.port_start, config.port_end)?);

    // Pools must reflect running containers before the first request.
    Reconciler::new(provider.clone(), ip_pool.clone(), port_pool.clone())
        .run_once()
        .await;

    let provisioner = Provisioner::new(
        Arc::new(templates),
        provider,
        ip_pool,
        port_pool,
        HookClient::new(config.hook_timeout())?,
    )
    .with_external_host(config.external_host());

    let app = api::create_router(AppState::new(provisioner));
    let listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;
    info!(addr = %config.listen_addr, "Listening for connections");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "Failed to listen for shutdown signal");
            }
            info!("Received shutdown signal");
        })
        .await?;

    info!("Orchestrator shutdown complete");
    Ok(())
}
