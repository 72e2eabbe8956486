// Main entry point for the job queue service

use anyhow::{Context, Result};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use server_core::config::Config;
use server_core::kernel::jobs::WorkerRuntime;
use server_core::kernel::scheduler::start_scheduler;
use server_core::kernel::ServiceDeps;
use server_core::server::{build_app, build_metrics_app};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration (fatal if invalid)
    let config = Config::from_env().context("Failed to load configuration")?;

    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!("{},server_core=debug", config.log_level).into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting job queue service");

    // Connect stores and assemble engines
    let deps = ServiceDeps::connect(config).await?;
    let shutdown = CancellationToken::new();

    // Webhook fanout consumes the event bus
    {
        let fanout = deps.fanout.clone();
        let bus = deps.manager.bus().clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            fanout.run(bus, shutdown).await;
        });
    }

    // Worker runtime executes registered queues
    {
        let worker_config = server_core::kernel::jobs::WorkerConfig {
            default_timeout: std::time::Duration::from_millis(
                deps.config.default_job_timeout_ms,
            ),
            ..Default::default()
        };
        let runtime = Arc::new(WorkerRuntime::with_config(
            deps.manager.clone(),
            deps.registry.clone(),
            worker_config,
        ));
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if let Err(e) = runtime.run(shutdown).await {
                tracing::error!(error = %e, "worker runtime exited with error");
            }
        });
    }

    // Scheduler tick
    let scheduler = start_scheduler(
        deps.schedules.clone(),
        deps.manager.clone(),
        deps.metrics.clone(),
        deps.config.scheduler_tick_secs,
    )
    .await
    .context("Failed to start scheduler")?;

    // Metrics endpoint on its own port
    if deps.config.metrics_enabled {
        let metrics_app = build_metrics_app(deps.clone());
        let addr = format!("0.0.0.0:{}", deps.config.metrics_port);
        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .context("Failed to bind metrics port")?;
        tracing::info!("Metrics: http://localhost:{}/metrics", deps.config.metrics_port);
        tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, metrics_app).await {
                tracing::error!(error = %e, "metrics server exited with error");
            }
        });
    }

    // Main API server
    let app = build_app(deps.clone());
    let addr = format!("0.0.0.0:{}", deps.config.port);
    tracing::info!("Starting server on {}", addr);
    tracing::info!("Health check: http://localhost:{}/health", deps.config.port);
    tracing::info!("API docs: http://localhost:{}/api/explain", deps.config.port);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context("Failed to bind to address")?;

    let graceful_shutdown = {
        let shutdown = shutdown.clone();
        async move {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown signal received");
            shutdown.cancel();
        }
    };

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .with_graceful_shutdown(graceful_shutdown)
    .await
    .context("Server error")?;

    // Drain background services
    shutdown.cancel();
    let mut scheduler = scheduler;
    let _ = scheduler.shutdown().await;
    tracing::info!("shutdown complete");

    Ok(())
}
