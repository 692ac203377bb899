//! `spindled` — headless optical-media ripping daemon.
//!
//! Wires the Platform Probe, Drive Registry, Job Store, Telemetry Hub and
//! Pipeline Planner/Runner together behind `spindle_core::Service`, spawns
//! the Watcher Loop (spec §4.4), and shuts everything down cleanly on
//! SIGTERM/SIGINT (spec §5: "Graceful shutdown of the whole service cancels
//! all Runners and closes all Telemetry brokers").

use std::path::PathBuf;
use std::sync::Arc;

use spindle_core::config::Config;
use spindle_core::{host, watcher, Service};

fn config_path() -> PathBuf {
    std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| dirs::config_dir().unwrap_or_else(|| PathBuf::from(".")).join("spindle").join("config.toml"))
}

#[tokio::main]
async fn main() {
    env_logger::init();

    let path = config_path();
    let config = Config::load_or_default(&path);
    log::info!("starting spindled, config read from {}", path.display());

    let host = Arc::from(host::current());
    let service = Arc::new(Service::new(config, host.clone()));

    let (watcher_tx, watcher_rx) = tokio::sync::mpsc::unbounded_channel();
    let watcher_registry = service.registry();
    let watcher_service = service.clone();
    let watcher_task = tokio::spawn(watcher::run(host, watcher_registry, watcher_tx, move |id| watcher_service.job_is_terminal(id)));
    let consumer_task = tokio::spawn(spindle_core::drive_watcher_events(service.clone(), watcher_rx));

    wait_for_shutdown_signal().await;
    log::info!("shutdown signal received, cancelling all active jobs");

    watcher_task.abort();
    consumer_task.abort();
    service.shutdown();

    // Give in-flight Runners a moment to observe cancellation and publish
    // their terminal tick before the process exits.
    tokio::time::sleep(std::time::Duration::from_millis(500)).await;
    log::info!("spindled stopped");
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate()).expect("install SIGTERM handler");
    let mut sigint = signal(SignalKind::interrupt()).expect("install SIGINT handler");
    tokio::select! {
        _ = sigterm.recv() => log::info!("received SIGTERM"),
        _ = sigint.recv() => log::info!("received SIGINT"),
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    log::info!("received ctrl-c");
}
