//! Command handlers for the Cache Relay CLI
//!
//! Each handler wires configuration into the core components and drives
//! them until the work is done or a shutdown signal arrives.

use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::app::client::HttpFetcher;
use crate::app::coordinator::{
    heartbeat_channel, shutdown_channel, spawn_periodic_heartbeat, FetchCoordinator, FetchResult,
    FetchState, Heartbeat, HeartbeatReceiver, RefreshConfig, RefreshHandle, RefreshLoop,
    ShutdownTrigger, SignalHandler,
};
use crate::app::server::{self, create_router, AppState, ServerConfig};
use crate::app::store::FileStore;
use crate::cli::{ConfigAction, ConfigArgs, FetchArgs, ServeArgs};
use crate::config::AppConfig;
use crate::constants::refresh;
use crate::errors::{AppError, FetchError, Result, ServerError};

/// Components shared by the serve and fetch commands
struct Relay {
    coordinator: Arc<FetchCoordinator>,
    heartbeat: Heartbeat,
    heartbeats: HeartbeatReceiver,
    refresh: RefreshConfig,
    server: ServerConfig,
    /// Whether a cached copy was found on disk at startup
    hydrated: bool,
}

impl Relay {
    async fn build(config: &AppConfig) -> Result<Self> {
        let (coordinator_config, client_config, refresh, server) = config.to_runtime_config()?;

        let store = Arc::new(FileStore::new());
        if config.cache.create_dir {
            store.ensure_parent_dir(coordinator_config.cache_path()).await?;
        }

        let fetcher = Arc::new(HttpFetcher::new(&client_config, store.clone())?);
        info!("Backend: {}", fetcher.url());

        let (heartbeat, heartbeats) = heartbeat_channel();
        let coordinator = Arc::new(
            FetchCoordinator::new(coordinator_config, store, fetcher)
                .with_heartbeat(heartbeat.clone()),
        );

        let hydrated = coordinator.load_from_disk().await?;

        Ok(Self {
            coordinator,
            heartbeat,
            heartbeats,
            refresh,
            server,
            hydrated,
        })
    }
}

/// Turn a failed cycle into the error reported for it
fn fetch_failure(result: FetchResult) -> Arc<FetchError> {
    result
        .error
        .unwrap_or_else(|| Arc::new(FetchError::NoAttempts))
}

/// Stop background work and wait for it to wind down
async fn stop(trigger: &ShutdownTrigger, refresh: RefreshHandle) {
    trigger.trigger();
    if !refresh.shutdown().await {
        warn!("Refresh loop still running at exit");
    }
}

/// Handle the serve command
///
/// Binds the listener, makes sure a copy is available (fetching one on a cold
/// start), then serves until CTRL-C or SIGTERM. A cold start whose first
/// refresh cycle fails aborts startup.
pub async fn handle_serve(args: ServeArgs, mut config: AppConfig) -> Result<()> {
    args.apply(&mut config);
    let relay = Relay::build(&config).await?;

    let (trigger, shutdown) = shutdown_channel();
    let _signals = SignalHandler::new(trigger.clone()).setup();

    let listener = server::bind(&relay.server).await?;

    let mut refresh = RefreshLoop::spawn(
        relay.coordinator.clone(),
        relay.heartbeats,
        relay.refresh.result_buffer,
        shutdown.clone(),
    );

    let status = relay.coordinator.status().await;
    if status.state != FetchState::Fresh {
        debug!("Cached copy is {:?}; requesting refresh", status.state);
        relay.coordinator.request_refresh().await;
    }

    if !relay.hydrated {
        info!("No cached copy on disk; waiting for the first refresh");
        let first = tokio::select! {
            result = refresh.next_result() => Some(result),
            _ = shutdown.cancelled() => None,
        };
        let Some(first) = first else {
            info!("Shutdown requested before the first refresh completed");
            stop(&trigger, refresh).await;
            return Ok(());
        };

        match first {
            Some(result) if result.available => {
                info!("Initial copy cached at {}", result.path.display());
            }
            Some(result) => {
                let error = fetch_failure(result);
                error!("Initial refresh failed: {}", error);
                stop(&trigger, refresh).await;
                return Err(ServerError::InitialFetchFailed(error).into());
            }
            None => {
                stop(&trigger, refresh).await;
                return Err(ServerError::RefreshLoopStopped.into());
            }
        }
    }

    let ticker = spawn_periodic_heartbeat(
        relay.heartbeat.clone(),
        relay.refresh.interval,
        shutdown.clone(),
    );
    info!("Refreshing every {:?}", relay.refresh.interval);

    let router = create_router(AppState::new(relay.coordinator.clone(), relay.server));
    let served = server::run_server(listener, router, shutdown).await;

    stop(&trigger, refresh).await;
    if tokio::time::timeout(refresh::TASK_SHUTDOWN_TIMEOUT, ticker)
        .await
        .is_err()
    {
        warn!("Heartbeat ticker did not stop within timeout");
    }

    served?;
    info!("Shutdown complete");
    Ok(())
}

/// Handle the fetch command
///
/// Runs exactly one refresh cycle through the refresh loop and reports it.
pub async fn handle_fetch(args: FetchArgs, mut config: AppConfig) -> Result<()> {
    args.source.apply(&mut config);
    let relay = Relay::build(&config).await?;

    let (trigger, shutdown) = shutdown_channel();
    let _signals = SignalHandler::new(trigger.clone()).setup();

    let mut refresh = RefreshLoop::spawn(
        relay.coordinator.clone(),
        relay.heartbeats,
        relay.refresh.result_buffer,
        shutdown,
    );

    if !relay.coordinator.request_refresh().await.is_accepted() {
        stop(&trigger, refresh).await;
        return Err(AppError::generic("Refresh loop is not accepting requests"));
    }

    let result = refresh.next_result().await;
    stop(&trigger, refresh).await;

    match result {
        Some(result) if result.available => {
            let status = relay.coordinator.status().await;
            println!("✅ Cached {}", result.path.display());
            if let Some(fetched_at) = status.fetched_at {
                println!("   Fetched at {}", fetched_at.to_rfc3339());
            }
            Ok(())
        }
        Some(result) => {
            let error = fetch_failure(result);
            println!("❌ Refresh failed: {}", error);
            Err(AppError::RefreshFailed(error))
        }
        None => Err(ServerError::RefreshLoopStopped.into()),
    }
}

/// Handle configuration commands
pub async fn handle_config(args: ConfigArgs, config: AppConfig) -> Result<()> {
    match args.action {
        ConfigAction::Show => {
            print!("{}", config.to_toml_string()?);
            Ok(())
        }
        ConfigAction::Init { path, force } => {
            let written = AppConfig::write_default_config(path, force).await?;
            println!("📁 Wrote default configuration to {}", written.display());
            Ok(())
        }
    }
}
