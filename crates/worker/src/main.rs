use std::sync::Arc;
use std::time::Duration;

use renderwatch_comfyui::client::ComfyUIClient;
use renderwatch_comfyui::{ComfyUIApi, ComfyUIBackend};
use renderwatch_events::{DownstreamNotifier, EventBus, EventPersistence};
use renderwatch_worker::{CompletionMonitor, JobSubmitter, MonitorConfig, MonitorStats, OutputVerifier};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "renderwatch_worker=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // --- Configuration ---
    let config = MonitorConfig::from_env().expect("Invalid monitor configuration");
    tracing::info!(
        comfyui_url = %config.comfyui_url,
        output_dir = %config.output_dir.display(),
        notify = config.notify_webhook_url.is_some(),
        "Loaded monitor configuration",
    );

    // --- Database ---
    let pool = renderwatch_db::create_pool(&config.database_url)
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
    // Consumers stop once the bus closes; this token is the fallback.
    let consumers_cancel = CancellationToken::new();

    // --- Event bus and consumers ---
    let event_bus = Arc::new(EventBus::default());
    let persistence_handle = tokio::spawn(EventPersistence::run(
        pool.clone(),
        event_bus.subscribe(),
        consumers_cancel.clone(),
    ));
    let notifier = DownstreamNotifier::new(pool.clone(), config.notify_webhook_url.clone());
    let notifier_handle =
        tokio::spawn(notifier.run(event_bus.subscribe(), consumers_cancel.clone()));

    // --- Monitor ---
    let comfyui: Arc<dyn ComfyUIBackend> = Arc::new(ComfyUIApi::new(config.comfyui_url.clone()));
    let submitter = Arc::new(JobSubmitter::new(
        pool.clone(),
        Arc::clone(&comfyui),
        Arc::clone(&event_bus),
        config.settings.retry.clone(),
        ComfyUIClient::generate_client_id(),
    ));
    let monitor = CompletionMonitor::new(
        pool,
        comfyui,
        Arc::clone(&event_bus),
        submitter,
        OutputVerifier::new(config.output_dir.clone()),
        config.settings.clone(),
        Arc::new(MonitorStats::new()),
    );
    let monitor_cancel = cancel.clone();
    let monitor_handle = tokio::spawn(async move { monitor.run(monitor_cancel).await });

    shutdown_signal().await;

    // --- Shutdown ---
    cancel.cancel();
    let _ = tokio::time::timeout(Duration::from_secs(30), monitor_handle).await;
    tracing::info!("Completion monitor stopped");

    // Dropping the last sender closes the bus so consumers drain and exit.
    drop(event_bus);
    let _ = tokio::time::timeout(Duration::from_secs(5), persistence_handle).await;
    // In-flight deliveries take at most ~17s with retries.
    let _ = tokio::time::timeout(Duration::from_secs(20), notifier_handle).await;
    consumers_cancel.cancel();
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
        () = ctrl_c => tracing::info!("Received SIGINT, shutting down"),
        () = terminate => tracing::info!("Received SIGTERM, shutting down"),
    }
}
