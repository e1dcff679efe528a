// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Centralized environment variable access for the daemon crate.

use std::path::PathBuf;
use std::time::Duration;

/// Daemon version string.
pub const DAEMON_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default warning threshold for a connection's transmit queue depth.
pub const DEFAULT_TX_WARN_THRESHOLD: usize = 100;

/// Compile-time bound on concurrently connected applications.
pub const MAX_APPLICATIONS: usize = 256;

/// IPC socket path: `SIPD_SOCKET` > `/run/sipd/sipd.sock`.
pub fn socket_path() -> PathBuf {
    std::env::var("SIPD_SOCKET")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/run/sipd/sipd.sock"))
}

/// Configuration file path: `SIPD_CONFIG` > `/etc/sipd/config.json`.
pub fn config_path() -> PathBuf {
    std::env::var("SIPD_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/etc/sipd/config.json"))
}

/// Transmit queue warning threshold override.
pub fn tx_warn_threshold() -> usize {
    std::env::var("SIPD_TX_WARN_THRESHOLD")
        .ok()
        .and_then(|s| s.parse::<usize>().ok())
        .unwrap_or(DEFAULT_TX_WARN_THRESHOLD)
}

/// Default IPC read timeout.
pub fn ipc_timeout() -> Duration {
    std::env::var("SIPD_IPC_TIMEOUT_MS")
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .map(Duration::from_millis)
        .unwrap_or(Duration::from_secs(5))
}

/// Directory for daemon log files, when file logging is enabled.
pub fn log_dir() -> Option<PathBuf> {
    std::env::var("SIPD_LOG_DIR").ok().map(PathBuf::from)
}
