//! temperd - GPU thermal and power control daemon
//!
//! Drives GPU fans and power limits from temperature curves, steers the
//! chassis fans through the BMC, watches the local inference service and
//! serves the joined metrics snapshot over HTTP.

use anyhow::{Context, Result};
use std::sync::Arc;
use temper_lib::{
    chassis::{BackendSelection, ChassisController},
    gpu::NvmlBackend,
    inference::InferenceMonitor,
    orchestrator::ControlLoop,
    process::{CommandRunner, ProcessRunner},
    server::{self, ServerState, SnapshotStore},
    EventLogger,
};
use tokio::sync::broadcast;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod config;

use config::DaemonConfig;

const DAEMON_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    let (config, load_error) = match DaemonConfig::load() {
        Ok(config) => (config, None),
        Err(e) => (DaemonConfig::default(), Some(e)),
    };

    // RUST_LOG wins over the verbose toggle
    let default_level = if config.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
        .with(fmt::layer().json())
        .init();

    if let Some(e) = load_error {
        warn!(error = %format!("{e:#}"), "Invalid configuration, using defaults");
    }

    info!("Starting temperd");

    let gpu = Arc::new(NvmlBackend::init().context("Failed to initialize GPU management library")?);

    let backend = config.chassis_backend().unwrap_or_else(|e| {
        warn!(error = %e, "Invalid chassis backend, probing automatically");
        BackendSelection::Auto
    });
    let runner: Arc<dyn CommandRunner> = Arc::new(ProcessRunner);
    let chassis = Arc::new(ChassisController::init(config.chassis_config(backend), runner).await);

    let inference = if config.llama_enabled {
        match InferenceMonitor::new(&config.inference_config()) {
            Ok(monitor) => Some(Arc::new(monitor)),
            Err(e) => {
                warn!(error = %e, "Failed to build inference service client, monitor disabled");
                None
            }
        }
    } else {
        None
    };

    let store = Arc::new(SnapshotStore::new());
    let logger = EventLogger::new(&config.node_name);

    let control = ControlLoop::new(
        config.control_config(),
        gpu,
        chassis.clone(),
        inference.clone(),
        store.clone(),
        logger.clone(),
    )
    .context("Failed to enumerate GPUs")?;

    logger.log_startup(DAEMON_VERSION, control.device_count(), chassis.is_enabled());

    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    let monitor_handle = inference
        .map(|monitor| tokio::spawn(monitor.run(shutdown_tx.subscribe())));

    let server_state = ServerState::new(store, config.server_token.clone());
    let server_rx = shutdown_tx.subscribe();
    let bind = config.server_bind.clone();
    let port = config.server_port;
    let server_handle = tokio::spawn(async move {
        // The control loop keeps running without the server
        if let Err(e) = server::serve(&bind, port, server_state, server_rx).await {
            error!(error = %e, "Snapshot server failed");
        }
    });

    let control_handle = tokio::spawn(control.run(shutdown_tx.subscribe()));

    let reason = wait_for_signal().await;
    logger.log_shutdown(reason);
    let _ = shutdown_tx.send(());

    // The control loop restores automatic fan control on its way out
    if let Err(e) = control_handle.await {
        error!(error = %e, "Control loop task failed");
    }
    if let Some(handle) = monitor_handle {
        let _ = handle.await;
    }
    let _ = server_handle.await;

    info!("temperd stopped");
    Ok(())
}

#[cfg(unix)]
async fn wait_for_signal() -> &'static str {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(sigterm) => sigterm,
        Err(e) => {
            warn!(error = %e, "Failed to install SIGTERM handler");
            let _ = tokio::signal::ctrl_c().await;
            return "SIGINT received";
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => "SIGINT received",
        _ = sigterm.recv() => "SIGTERM received",
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() -> &'static str {
    let _ = tokio::signal::ctrl_c().await;
    "SIGINT received"
}
