use anyhow::{Context, Result};
use lifelog::{GroupStore, TimelineStore};
use std::sync::Arc;
use std::time::Duration;
use sync_engine::oauth::{create_router, OAuthAppState, StateSigner};
use sync_engine::{ProviderRegistry, Scheduler, SyncEngine, TokenRefresher};
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "sync_engine=info,lifelog=info".into()),
        )
        .init();

    info!("Lifelog sync engine starting...");

    // Configuration from environment
    let encryption_key = std::env::var("LIFELOG_ENCRYPTION_KEY")
        .context("LIFELOG_ENCRYPTION_KEY is required (base64-encoded 32-byte key)")?;
    let state_key = std::env::var("LIFELOG_STATE_KEY")
        .context("LIFELOG_STATE_KEY is required (base64-encoded key, >= 32 bytes)")?;
    let groups_db =
        std::env::var("LIFELOG_GROUPS_DB").unwrap_or_else(|_| "groups.db".to_string());
    let timeline_db =
        std::env::var("LIFELOG_TIMELINE_DB").unwrap_or_else(|_| "timeline.db".to_string());
    let api_port: u16 = std::env::var("LIFELOG_API_PORT")
        .unwrap_or_else(|_| "3002".to_string())
        .parse()
        .context("LIFELOG_API_PORT must be a valid port number")?;
    let callback_base_url = std::env::var("LIFELOG_CALLBACK_BASE_URL")
        .unwrap_or_else(|_| format!("http://localhost:{}", api_port));
    let scheduler_tick_secs: u64 = std::env::var("LIFELOG_SCHEDULER_TICK_SECS")
        .unwrap_or_else(|_| "60".to_string())
        .parse()
        .context("LIFELOG_SCHEDULER_TICK_SECS must be a number")?;

    info!(
        groups_db = %groups_db,
        timeline_db = %timeline_db,
        api_port,
        callback_base_url = %callback_base_url,
        "Configuration loaded"
    );

    // Stores
    let groups = Arc::new(
        GroupStore::new(&groups_db, &encryption_key)
            .context("Failed to initialize group store")?,
    );
    let store =
        Arc::new(TimelineStore::new(&timeline_db).context("Failed to initialize timeline store")?);

    // Providers are registered once here and injected everywhere
    let registry = Arc::new(ProviderRegistry::with_default_providers());
    info!(services = ?registry.services(), "Providers registered");

    let connected = groups.list_authorized().context("Failed to list groups")?;
    info!(connected_groups = connected.len(), "Group store loaded");

    // Engine + scheduler
    let (engine, work_queue) = SyncEngine::new(
        Arc::clone(&registry),
        Arc::clone(&groups),
        Arc::clone(&store),
    );
    engine.start(work_queue);

    let scheduler = Scheduler::new(
        engine.clone(),
        Arc::clone(&store),
        Duration::from_secs(scheduler_tick_secs),
    );
    scheduler.start();

    // Connection API (OAuth boundary + status)
    let signer = Arc::new(StateSigner::new(&state_key).map_err(|e| {
        anyhow::anyhow!("Invalid LIFELOG_STATE_KEY: {}", e)
    })?);

    // Consumed state tokens only matter within their TTL; clear the set
    // periodically so it cannot grow without bound
    let cleanup_signer = Arc::clone(&signer);
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(3600));
        interval.tick().await;
        loop {
            interval.tick().await;
            cleanup_signer.cleanup_consumed();
        }
    });
    let api_state = OAuthAppState {
        groups: Arc::clone(&groups),
        store: Arc::clone(&store),
        registry: Arc::clone(&registry),
        refresher: Arc::new(TokenRefresher::new(Arc::clone(&groups))),
        signer,
        engine: engine.clone(),
        callback_base_url,
    };
    let router = create_router(api_state);
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", api_port))
        .await
        .context("Failed to bind API port")?;
    info!(port = api_port, "Connection API listening");

    let server_handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, router).await {
            tracing::error!(error = %e, "Connection API server error");
        }
    });

    // Run until interrupted
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl_c signal")?;
    info!("Shutdown signal received");

    server_handle.abort();
    info!("Sync engine stopped");

    Ok(())
}
