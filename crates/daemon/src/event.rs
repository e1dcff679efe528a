// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Events processed by the runtime loop.
//!
//! Everything that happens in the daemon arrives here: frames and
//! disconnects from IPC connections, datagrams from the SD socket, link
//! state changes, and the software events the loop posts to itself to
//! defer work to a later turn.

use std::net::SocketAddr;

use tokio::sync::mpsc;
use tracing::trace;

use sipd_core::{Credentials, InstanceKey};
use sipd_wire::RawFrame;

use crate::app::connection::{Connection, ConnectionId};

/// One unit of work for the runtime loop.
pub enum Event {
    /// A new application connected; credentials were already read from the
    /// socket by the acceptor.
    Accepted { connection: Connection, credentials: Credentials },
    /// A frame arrived on an IPC connection.
    Frame { conn: ConnectionId, frame: RawFrame },
    /// An IPC connection hit EOF or an I/O error. Posted exactly once.
    Disconnected { conn: ConnectionId },
    /// A datagram arrived on the SD socket.
    SdDatagram { from: SocketAddr, multicast: bool, datagram: Vec<u8> },
    /// The network interface came up.
    NetworkUp,
    /// The network interface went down.
    NetworkDown,
    /// Software event: reap applications whose connection is disconnected.
    ReapApplications,
    /// Software event: reap stopped wildcard SD children no longer
    /// required by any application.
    ReapSdChildren { key: InstanceKey },
    /// Stop the runtime loop.
    Shutdown,
}

impl std::fmt::Debug for Event {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Event::Accepted { connection, credentials } => f
                .debug_struct("Accepted")
                .field("conn", &connection.id())
                .field("credentials", credentials)
                .finish(),
            Event::Frame { conn, frame } => f
                .debug_struct("Frame")
                .field("conn", conn)
                .field("message_type", &frame.message_type)
                .field("body_len", &frame.body.len())
                .finish(),
            Event::Disconnected { conn } => {
                f.debug_struct("Disconnected").field("conn", conn).finish()
            }
            Event::SdDatagram { from, multicast, datagram } => f
                .debug_struct("SdDatagram")
                .field("from", from)
                .field("multicast", multicast)
                .field("len", &datagram.len())
                .finish(),
            Event::NetworkUp => f.write_str("NetworkUp"),
            Event::NetworkDown => f.write_str("NetworkDown"),
            Event::ReapApplications => f.write_str("ReapApplications"),
            Event::ReapSdChildren { key } => {
                f.debug_struct("ReapSdChildren").field("key", key).finish()
            }
            Event::Shutdown => f.write_str("Shutdown"),
        }
    }
}

/// Cloneable producer half of the event bus.
#[derive(Clone)]
pub struct EventSender {
    tx: mpsc::UnboundedSender<Event>,
}

impl EventSender {
    /// Post an event. Returns false when the runtime loop is gone.
    pub fn emit(&self, event: Event) -> bool {
        trace!(?event, "emit");
        self.tx.send(event).is_ok()
    }
}

/// Create the event bus consumed by the runtime loop.
pub fn event_bus() -> (EventSender, mpsc::UnboundedReceiver<Event>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (EventSender { tx }, rx)
}
