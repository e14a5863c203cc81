//! Gateway service entry point.

use anyhow::Result;
use chrono::Utc;
use gateway::jobs::{LICENSE_PERIOD, OVERDUE_PERIOD, REPORT_PERIOD};
use gateway::services::{
    NotificationService, PlaceService, PostService, SessionService, SystemService,
};
use gateway::{
    create_router, AppState, BusMailer, ConnectionRegistry, FlagStore, GatewayConfig, LicenseJob,
    MemoryDirectory, MemoryModel, Model, NtfyRelay, OverdueJob, PushManager, PushQueue,
    RedisDirectory, ReportJob, Reporter, Scheduler, WebsocketDelivery, WebsocketDirectory, Worker,
};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("Starting Gateway service");

    let config = GatewayConfig::from_env()?;
    info!("Configuration:");
    info!("  BUNDLE_ID: {}", config.bundle_id);
    info!("  HTTP_PORT: {}", config.http_port);
    info!("  METRICS_PORT: {}", config.metrics_port);
    info!("  BUS_URL: {}", config.bus_url);
    info!("  REDIS_URL: {}", config.redis_url.as_deref().unwrap_or("(in-process)"));
    info!("  PUSH_WORKERS: {}", config.push_workers);
    info!("  NTFY_RELAY: {}", config.ntfy_relay);

    PrometheusBuilder::new()
        .with_http_listener(([0, 0, 0, 0], config.metrics_port))
        .install()?;
    info!("Prometheus metrics server started on port {}", config.metrics_port);

    info!("Connecting to bus at {}", config.bus_url);
    let bus = nats_client::connect(&config.bus_url).await?;
    info!("Connected to bus");

    let directory: Arc<dyn WebsocketDirectory> = match &config.redis_url {
        Some(url) => Arc::new(RedisDirectory::new(url)?),
        None => {
            warn!("REDIS_URL not set, websocket directory is local to this bundle");
            Arc::new(MemoryDirectory::new())
        }
    };

    // Persistence lives behind the Model boundary; this build ships the
    // in-memory model for single-bundle deployments.
    let model: Arc<dyn Model> = Arc::new(MemoryModel::new());
    let flags = Arc::new(FlagStore::new());
    let reporter = Arc::new(Reporter::new());
    let registry = Arc::new(ConnectionRegistry::new(config.bundle_id.clone()));

    let push = Arc::new(PushManager::new(
        PushQueue::start(bus.clone(), config.push_workers, config.push_queue_capacity),
        model.clone(),
        reporter.clone(),
    ));
    let mailer = Arc::new(BusMailer::new(bus.clone()));

    let worker = Worker::builder(model.clone(), flags.clone(), reporter.clone())
        .register(Arc::new(SessionService::new(
            model.clone(),
            registry.clone(),
            push.clone(),
            flags.clone(),
        )))?
        .register(Arc::new(PostService::new(
            model.clone(),
            push.clone(),
            mailer,
            reporter.clone(),
        )))?
        .register(Arc::new(PlaceService::new(model.clone())))?
        .register(Arc::new(NotificationService::new(model.clone(), push.clone())))?
        .register(Arc::new(SystemService::new(
            model.clone(),
            flags.clone(),
            registry.clone(),
        )))?
        .build();

    // Cross-bundle delivery
    let delivery = Arc::new(WebsocketDelivery::new(
        registry.clone(),
        directory.clone(),
        bus.clone(),
    ));
    let (delivery_shutdown_tx, delivery_shutdown_rx) = mpsc::channel(1);
    let delivery_handle = tokio::spawn(async move {
        if let Err(e) = delivery.run(delivery_shutdown_rx).await {
            error!("Websocket delivery error: {:?}", e);
        }
    });

    let (relay_shutdown_tx, relay_shutdown_rx) = mpsc::channel(1);
    let relay_handle = if config.ntfy_relay {
        let relay = Arc::new(NtfyRelay::new(directory.clone(), bus.clone()));
        Some(tokio::spawn(async move {
            if let Err(e) = relay.run(relay_shutdown_rx).await {
                error!("NTFY relay error: {:?}", e);
            }
        }))
    } else {
        None
    };

    // Background jobs
    let license_job = Arc::new(LicenseJob::new(model.clone(), flags.clone()));
    if let Err(e) = license_job.refresh(Utc::now()).await {
        warn!("Initial license check failed: {:?}", e);
    }
    let mut scheduler = Scheduler::new();
    scheduler.schedule(
        REPORT_PERIOD,
        Arc::new(ReportJob::new(
            model.clone(),
            reporter.clone(),
            registry.clone(),
            flags.clone(),
        )),
    );
    scheduler.schedule(OVERDUE_PERIOD, Arc::new(OverdueJob::new(model.clone(), push.clone())));
    scheduler.schedule(LICENSE_PERIOD, license_job);

    let state = Arc::new(AppState {
        worker: Arc::new(worker),
        registry,
        push: push.clone(),
        model,
        flags,
        reporter,
        request_timeout: config.request_timeout,
    });
    let app = create_router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.http_port));
    let listener = TcpListener::bind(addr).await?;
    info!("Gateway {} listening on {}", config.bundle_id, addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    info!("Shutting down background jobs...");
    scheduler.shutdown().await;

    info!("Shutting down delivery...");
    let _ = delivery_shutdown_tx.send(()).await;
    let _ = delivery_handle.await;
    if let Some(handle) = relay_handle {
        let _ = relay_shutdown_tx.send(()).await;
        let _ = handle.await;
    }

    info!("Draining push queue...");
    push.shutdown().await;
    if let Err(e) = bus.flush().await {
        warn!("Failed to flush bus: {:?}", e);
    }

    info!("Gateway stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {:?}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut term) => {
                term.recv().await;
            }
            Err(e) => {
                error!("Failed to install signal handler: {:?}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C"),
        _ = terminate => info!("Received terminate signal"),
    }
}
