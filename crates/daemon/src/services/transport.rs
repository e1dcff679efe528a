// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Seam toward the connection manager that owns the raw user-traffic
//! sockets.
//!
//! The daemon core never touches UDP/TCP endpoints for SOME/IP user
//! traffic directly; it hands fully encoded packets to this trait. The
//! real connection manager lives outside the core.

use std::net::SocketAddr;
use std::sync::Arc;

use tracing::debug;

use sipd_wire::TransportProto;

/// Outbound user-traffic transmission.
pub trait NetTransport: Send + Sync + 'static {
    /// Queue a packet toward a remote endpoint. Transmission is
    /// best-effort; delivery failures surface as missing responses, not
    /// errors.
    fn send(&self, proto: TransportProto, to: SocketAddr, packet: Arc<[u8]>);
}

/// Transport used when no connection manager is registered; drops traffic
/// with a debug log so bring-up without a network stack stays observable.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullTransport;

impl NetTransport for NullTransport {
    fn send(&self, proto: TransportProto, to: SocketAddr, packet: Arc<[u8]>) {
        debug!(?proto, %to, len = packet.len(), "dropping packet: no transport registered");
    }
}

/// Records every transmission for assertions.
#[cfg(any(test, feature = "test-support"))]
#[derive(Debug, Default)]
pub struct RecordingTransport {
    sent: parking_lot::Mutex<Vec<(TransportProto, SocketAddr, Arc<[u8]>)>>,
}

#[cfg(any(test, feature = "test-support"))]
impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<(TransportProto, SocketAddr, Arc<[u8]>)> {
        self.sent.lock().clone()
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().len()
    }
}

#[cfg(any(test, feature = "test-support"))]
impl NetTransport for RecordingTransport {
    fn send(&self, proto: TransportProto, to: SocketAddr, packet: Arc<[u8]>) {
        self.sent.lock().push((proto, to, packet));
    }
}
