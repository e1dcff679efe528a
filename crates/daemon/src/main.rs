// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Daemon entry point: logging, configuration, sockets, runtime.

use std::sync::Arc;

use tokio::net::UnixListener;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use sipd_core::config::Config;
use sipd_core::SystemClock;
use sipd_daemon::app::manager::spawn_acceptor;
use sipd_daemon::env;
use sipd_daemon::event::Event;
use sipd_daemon::iam::AllowAll;
use sipd_daemon::runtime::{Runtime, RuntimeDeps};
use sipd_daemon::sd::endpoint::{spawn_receiver, SdEndpoint};
use sipd_daemon::sd::jitter::UniformJitter;
use sipd_daemon::services::transport::NullTransport;

fn init_tracing() -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    match env::log_dir() {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "sipd.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::fmt().with_env_filter(filter).with_writer(writer).init();
            Some(guard)
        }
        None => {
            tracing_subscriber::fmt().with_env_filter(filter).init();
            None
        }
    }
}

fn load_config() -> Result<Arc<Config>, String> {
    let path = env::config_path();
    let raw = std::fs::read_to_string(&path)
        .map_err(|e| format!("cannot read {}: {e}", path.display()))?;
    let config: Config =
        serde_json::from_str(&raw).map_err(|e| format!("cannot parse {}: {e}", path.display()))?;
    config.validate().map_err(|e| format!("invalid configuration: {e}"))?;
    Ok(Arc::new(config))
}

#[tokio::main]
async fn main() -> std::process::ExitCode {
    let _log_guard = init_tracing();
    info!(version = env::DAEMON_VERSION, "sipd starting");

    let config = match load_config() {
        Ok(config) => config,
        Err(err) => {
            error!(%err, "startup failed");
            return std::process::ExitCode::FAILURE;
        }
    };

    let socket_path = env::socket_path();
    if let Some(parent) = socket_path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }
    let _ = std::fs::remove_file(&socket_path);
    let listener = match UnixListener::bind(&socket_path) {
        Ok(listener) => listener,
        Err(err) => {
            error!(path = %socket_path.display(), %err, "cannot bind IPC socket");
            return std::process::ExitCode::FAILURE;
        }
    };
    info!(path = %socket_path.display(), "IPC socket bound");

    let (endpoint, unicast_socket, multicast_socket) = match SdEndpoint::bind(&config.machine).await {
        Ok(bound) => bound,
        Err(err) => {
            error!(%err, "cannot bind SD endpoint");
            return std::process::ExitCode::FAILURE;
        }
    };

    let deps = RuntimeDeps {
        config: Arc::clone(&config),
        iam: Arc::new(AllowAll),
        transport: Arc::new(NullTransport),
        sd_out: Arc::new(endpoint),
    };
    let (runtime, events) = Runtime::new(
        deps,
        SystemClock,
        Box::new(UniformJitter),
        env::MAX_APPLICATIONS,
    );

    spawn_receiver(unicast_socket, false, events.clone());
    spawn_receiver(multicast_socket, true, events.clone());
    spawn_acceptor(listener, env::tx_warn_threshold(), events.clone());

    // The deployment assumes the interface is up when the daemon starts;
    // link supervision feeds NetworkDown/NetworkUp at runtime.
    events.emit(Event::NetworkUp);

    let shutdown_events = events.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            shutdown_events.emit(Event::Shutdown);
        }
    });

    runtime.run().await;
    info!("sipd stopped");
    std::process::ExitCode::SUCCESS
}
