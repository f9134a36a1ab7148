//! DevVault Server
//!
//! Serves the issue lifecycle API and keeps issues in sync with GitHub

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use devvault::server::{self, AppState};
use devvault::{
    seed, AdminService, Config, IssueLifecycle, MemoryStore, PgStore, Store, SyncError,
    SyncPipeline, UserService,
};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("Starting DevVault Server");

    let config_path =
        std::env::var("DEVVAULT_CONFIG").unwrap_or_else(|_| "config.toml".to_string());
    let config = Config::load_from(&config_path)?.with_env_overrides()?;

    let store: Arc<dyn Store> = match &config.database.url {
        Some(url) => {
            let store = PgStore::connect(url)
                .await
                .context("Failed to connect to PostgreSQL")?;
            info!("PostgreSQL storage initialized");
            Arc::new(store)
        }
        None => {
            warn!("DATABASE_URL not set - using in-memory storage, data is lost on restart");
            Arc::new(MemoryStore::new())
        }
    };

    if config.seed.demo_data {
        seed::seed_demo_data(store.as_ref()).await?;
    }

    let github = Arc::new(config.github_client()?);
    let pipeline = Arc::new(SyncPipeline::new(
        github,
        store.clone(),
        config.sync_settings(),
    ));

    if config.sync.enabled && !config.github.repos.is_empty() {
        let sync_pipeline = pipeline.clone();
        let initial_delay = Duration::from_secs(config.sync.initial_delay_secs);
        let every = Duration::from_secs(config.sync.interval_secs.max(1));
        tokio::spawn(async move {
            tokio::time::sleep(initial_delay).await;

            let mut interval = tokio::time::interval(every);
            loop {
                interval.tick().await;
                match sync_pipeline.run().await {
                    Ok(report) => {
                        if let Some(summary) = report.error_summary() {
                            warn!("GitHub sync finished with failures: {}", summary);
                        }
                    }
                    Err(SyncError::AlreadyRunning) => {
                        info!("Skipping scheduled sync, a run is already in progress");
                    }
                    Err(e) => error!("GitHub sync failed: {}", e),
                }
            }
        });
        info!(
            "Background GitHub sync started (every {} seconds, {} repos)",
            every.as_secs(),
            config.github.repos.len()
        );
    } else {
        info!("Background GitHub sync disabled");
    }

    let state = Arc::new(AppState {
        lifecycle: IssueLifecycle::new(store.clone()),
        users: UserService::new(store.clone()),
        admin: AdminService::new(store.clone(), pipeline.clone()),
        started_at: std::time::Instant::now(),
    });

    server::run_server(
        &config.server.host,
        config.server.port,
        state,
        pipeline.stop_handle(),
    )
    .await?;

    Ok(())
}
