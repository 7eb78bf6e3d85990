use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use renderwatch_comfyui::bridge::ProgressBridge;
use renderwatch_comfyui::client::ComfyUIClient;
use renderwatch_comfyui::reconnect::BackoffPolicy;
use renderwatch_comfyui::{ComfyUIApi, ComfyUIBackend};
use renderwatch_events::{DownstreamNotifier, EventBus, EventPersistence};
use renderwatch_worker::{CompletionMonitor, JobSubmitter, MonitorConfig, MonitorStats, OutputVerifier};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use renderwatch_api::config::ServerConfig;
use renderwatch_api::relay::{JobEventRelay, ProgressRelay};
use renderwatch_api::router::build_app_router;
use renderwatch_api::state::AppState;
use renderwatch_api::ws;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "renderwatch_api=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // --- Configuration ---
    let config = ServerConfig::from_env();
    let monitor_config = MonitorConfig::from_env().expect("Invalid monitor configuration");
    tracing::info!(
        host = %config.host,
        port = %config.port,
        comfyui_url = %monitor_config.comfyui_url,
        monitor_enabled = config.monitor_enabled,
        "Loaded server configuration",
    );

    // --- Database ---
    let pool = renderwatch_db::create_pool(&monitor_config.database_url)
        .await
        .expect("Failed to connect to database");
    renderwatch_db::health_check(&pool)
        .await
        .expect("Database health check failed");
    renderwatch_db::run_migrations(&pool)
        .await
        .expect("Failed to run database migrations");
    tracing::info!("Database ready");

    let cancel = CancellationToken::new();
    let consumers_cancel = CancellationToken::new();

    // --- Progress stream ---
    let progress_hub = Arc::new(ws::ProgressHub::new());
    let keepalive_handle =
        progress_hub.spawn_keepalive(ws::hub::KEEPALIVE_INTERVAL, consumers_cancel.clone());

    // --- Event bus and consumers ---
    let event_bus = Arc::new(EventBus::default());
    let persistence_handle = tokio::spawn(EventPersistence::run(
        pool.clone(),
        event_bus.subscribe(),
        consumers_cancel.clone(),
    ));
    let notifier = DownstreamNotifier::new(pool.clone(), monitor_config.notify_webhook_url.clone());
    let notifier_handle =
        tokio::spawn(notifier.run(event_bus.subscribe(), consumers_cancel.clone()));
    let job_relay_handle = tokio::spawn(
        JobEventRelay::new(Arc::clone(&progress_hub)).run(event_bus.subscribe(), consumers_cancel.clone()),
    );

    // --- ComfyUI ---
    // Progress frames only reach the socket whose client id queued the
    // prompt, so the bridge and the submitter share one id.
    let client_id = ComfyUIClient::generate_client_id();
    let comfyui: Arc<dyn ComfyUIBackend> =
        Arc::new(ComfyUIApi::new(monitor_config.comfyui_url.clone()));
    let bridge = ProgressBridge::start(
        ComfyUIClient::from_api_url(&monitor_config.comfyui_url, client_id.clone()),
        BackoffPolicy::default(),
        cancel.child_token(),
    );
    let progress_handle = tokio::spawn(
        ProgressRelay::new(pool.clone(), Arc::clone(&progress_hub))
            .run(bridge.subscribe(), cancel.child_token()),
    );

    let submitter = Arc::new(JobSubmitter::new(
        pool.clone(),
        Arc::clone(&comfyui),
        Arc::clone(&event_bus),
        monitor_config.settings.retry.clone(),
        client_id,
    ));
    let stats = Arc::new(MonitorStats::new());

    // --- Monitor ---
    let monitor_handle = if config.monitor_enabled {
        let monitor = CompletionMonitor::new(
            pool.clone(),
            Arc::clone(&comfyui),
            Arc::clone(&event_bus),
            Arc::clone(&submitter),
            OutputVerifier::new(monitor_config.output_dir.clone()),
            monitor_config.settings.clone(),
            Arc::clone(&stats),
        );
        let monitor_cancel = cancel.child_token();
        Some(tokio::spawn(async move { monitor.run(monitor_cancel).await }))
    } else {
        tracing::info!("Completion monitor disabled in this process");
        None
    };

    // --- App state ---
    let state = AppState {
        pool,
        config: Arc::new(config.clone()),
        progress_hub: Arc::clone(&progress_hub),
        event_bus: Arc::clone(&event_bus),
        comfyui,
        submitter,
        stats,
    };
    let app = build_app_router(state, &config);

    // --- Start server ---
    let addr = SocketAddr::new(
        config.host.parse().expect("Invalid HOST address"),
        config.port,
    );
    tracing::info!(%addr, "Starting server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind to address");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Server error");

    // --- Post-shutdown cleanup ---
    tracing::info!("Server stopped accepting connections, cleaning up");
    let drain = Duration::from_secs(config.shutdown_timeout_secs);

    cancel.cancel();
    bridge.shutdown().await;
    let _ = tokio::time::timeout(Duration::from_secs(5), progress_handle).await;
    if let Some(handle) = monitor_handle {
        let _ = tokio::time::timeout(drain, handle).await;
        tracing::info!("Completion monitor stopped");
    }

    // The router (and its state) is gone; dropping this last sender closes
    // the bus so consumers drain and exit.
    drop(event_bus);
    let _ = tokio::time::timeout(Duration::from_secs(5), persistence_handle).await;
    let _ = tokio::time::timeout(Duration::from_secs(5), job_relay_handle).await;
    let _ = tokio::time::timeout(drain, notifier_handle).await;
    consumers_cancel.cancel();
    tracing::info!("Event services shut down");

    let closed = progress_hub.close_all().await;
    tracing::info!(closed, "Closed remaining progress streams");
    let _ = keepalive_handle.await;

    tracing::info!("Graceful shutdown complete");
}

/// Wait for SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl-C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}
