//! rolesync daemon entry point.

use axum::Router;
use rolesync_core::Datastore;
use rolesync_daemon::{
    create_app_router, gateway_channel, init_tracing, ApiError, ApiResult, AppState,
    DaemonConfig, DiscordClient, GatewayForwarder, LiveState, PgDatastore, ProcFsProbe,
    PrometheusSink,
};
use rolesync_engine::{job_queue, EngineContext, GlobalSampler, GuildRegistry, ReconciliationWorker};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

const GATEWAY_COMMAND_CAPACITY: usize = 64;

#[tokio::main]
async fn main() -> ApiResult<()> {
    let config = DaemonConfig::load()?;
    init_tracing(&config.log_level, config.log_format)?;

    let addr = config.bind_addr()?;
    let engine_config = config.engine_config();
    tracing::info!(
        guilds = config.guilds.guild_ids().count(),
        queue_capacity = engine_config.queue_capacity,
        chunk_size = engine_config.chunk_size,
        "Starting rolesync daemon"
    );

    let datastore = PgDatastore::from_config(&config.database)?;
    datastore.ping().await?;
    datastore.verify_statements().await?;
    let datastore = Arc::new(datastore);

    let live = Arc::new(LiveState::new());
    let (gateway_tx, gateway_rx) = gateway_channel(GATEWAY_COMMAND_CAPACITY);
    let platform = Arc::new(DiscordClient::new(&config.discord, live.clone(), gateway_tx)?);
    let sink = Arc::new(PrometheusSink::global());

    let (submitter, receiver) = job_queue(engine_config.queue_capacity);
    let metrics_interval = engine_config.metrics_interval;
    let ctx = EngineContext::new(
        config.guilds.clone(),
        datastore,
        platform,
        sink.clone(),
        submitter.clone(),
        engine_config,
    );
    let registry = Arc::new(GuildRegistry::new());
    let state = Arc::new(AppState::new(ctx.clone(), registry.clone(), live));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let worker = tokio::spawn(ReconciliationWorker::new(ctx, receiver).run(shutdown_rx.clone()));
    let sampler = tokio::spawn(
        GlobalSampler::new(sink, Arc::new(ProcFsProbe), submitter, metrics_interval)
            .run(shutdown_rx.clone()),
    );

    let bridge_http = reqwest::Client::builder()
        .timeout(Duration::from_secs(30))
        .build()
        .map_err(|e| ApiError::internal_error(format!("Failed to create HTTP client: {}", e)))?;
    let forwarder = tokio::spawn(
        GatewayForwarder::new(
            bridge_http,
            config.discord.gateway_bridge_url.clone(),
            gateway_rx,
        )
        .run(shutdown_rx),
    );

    let app: Router = create_app_router(state);
    tracing::info!(%addr, "Listening");
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| ApiError::internal_error(format!("Failed to bind {}: {}", addr, e)))?;

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| ApiError::internal_error(format!("Server error: {}", e)));

    tracing::info!("Stopping background tasks");
    registry.stop_all().await;
    let _ = shutdown_tx.send(true);

    if let Err(e) = worker.await {
        tracing::error!(error = %e, "Reconciliation worker panicked");
    }
    if let Err(e) = sampler.await {
        tracing::error!(error = %e, "Global sampler panicked");
    }
    if let Err(e) = forwarder.await {
        tracing::error!(error = %e, "Gateway forwarder panicked");
    }

    served
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for ctrl-c");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("Shutdown signal received");
}
