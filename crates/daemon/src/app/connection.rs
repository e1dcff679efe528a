// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Framed IPC transport to one application.
//!
//! A connection owns two I/O tasks: a reader that posts every received
//! frame onto the event bus, and a writer that drains the transmit queue
//! strictly FIFO with one send in flight. The handle itself is a cheap
//! clone; the send router and the network-side packet router share it.
//!
//! The transmit queue is unbounded. A depth monitor logs a warning when
//! the queue crosses the configured threshold and re-arms after the queue
//! drains below half of it, so a slow application produces one warning per
//! excursion rather than a flood.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use sipd_wire::ipc::{read_frame, write_frame};

use crate::event::{Event, EventSender};

/// Identifies one IPC connection for the lifetime of the daemon.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u32);

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Connection lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connected,
    Disconnected,
}

/// One entry of the transmit queue.
///
/// Routing messages share their encoded packet with other connections'
/// queues; control and SD-update messages own their buffer.
#[derive(Debug, Clone)]
pub enum TxEntry {
    Shared { packet: Arc<[u8]>, received_at: Option<Instant> },
    Owned { buffer: Vec<u8> },
}

impl TxEntry {
    fn bytes(&self) -> &[u8] {
        match self {
            TxEntry::Shared { packet, .. } => packet,
            TxEntry::Owned { buffer } => buffer,
        }
    }
}

/// Errors surfaced to senders.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum TxError {
    #[error("connection is disconnected")]
    Disconnected,
}

/// Warns once per threshold excursion of the transmit queue depth.
#[derive(Debug)]
struct DepthMonitor {
    threshold: usize,
    armed: bool,
}

impl DepthMonitor {
    fn new(threshold: usize) -> Self {
        Self { threshold, armed: true }
    }

    fn observe(&mut self, id: ConnectionId, depth: usize) {
        if self.armed && depth >= self.threshold {
            warn!(%id, depth, threshold = self.threshold, "transmit queue above threshold");
            self.armed = false;
        } else if !self.armed && depth <= self.threshold / 2 {
            self.armed = true;
        }
    }
}

struct ConnectionInner {
    id: ConnectionId,
    tx: mpsc::UnboundedSender<TxEntry>,
    depth: AtomicUsize,
    state: Mutex<ConnectionState>,
    monitor: Mutex<DepthMonitor>,
    events: EventSender,
}

impl ConnectionInner {
    /// Transition to Disconnected and post the disconnect event exactly
    /// once; both I/O tasks may race into this.
    fn disconnect(&self) {
        let mut state = self.state.lock();
        if *state == ConnectionState::Disconnected {
            return;
        }
        *state = ConnectionState::Disconnected;
        drop(state);
        debug!(id = %self.id, "connection disconnected");
        self.events.emit(Event::Disconnected { conn: self.id });
    }
}

/// Shared handle to one IPC connection.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<ConnectionInner>,
}

impl Connection {
    /// Wire up a connection over a split stream and spawn its I/O tasks.
    pub fn spawn<R, W>(
        id: ConnectionId,
        reader: R,
        writer: W,
        warn_threshold: usize,
        events: EventSender,
    ) -> Connection
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (tx, rx) = mpsc::unbounded_channel();
        let inner = Arc::new(ConnectionInner {
            id,
            tx,
            depth: AtomicUsize::new(0),
            state: Mutex::new(ConnectionState::Connected),
            monitor: Mutex::new(DepthMonitor::new(warn_threshold)),
            events,
        });

        tokio::spawn(run_reader(reader, Arc::clone(&inner)));
        tokio::spawn(run_writer(writer, rx, Arc::clone(&inner)));

        Connection { inner }
    }

    pub fn id(&self) -> ConnectionId {
        self.inner.id
    }

    pub fn state(&self) -> ConnectionState {
        *self.inner.state.lock()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Current transmit queue depth (entries enqueued but not yet written).
    pub fn queue_depth(&self) -> usize {
        self.inner.depth.load(Ordering::Acquire)
    }

    /// Append an entry to the transmit queue.
    ///
    /// The writer task starts it as soon as every earlier entry has
    /// completed; ordering is strictly FIFO.
    pub fn enqueue(&self, entry: TxEntry) -> Result<(), TxError> {
        if !self.is_connected() {
            return Err(TxError::Disconnected);
        }
        let depth = self.inner.depth.fetch_add(1, Ordering::AcqRel) + 1;
        self.inner.monitor.lock().observe(self.inner.id, depth);
        self.inner.tx.send(entry).map_err(|_| {
            self.inner.depth.fetch_sub(1, Ordering::AcqRel);
            TxError::Disconnected
        })
    }
}

async fn run_reader<R>(mut reader: R, inner: Arc<ConnectionInner>)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    loop {
        match read_frame(&mut reader).await {
            Ok(frame) => {
                if !inner.events.emit(Event::Frame { conn: inner.id, frame }) {
                    break; // runtime gone, shutdown in progress
                }
            }
            Err(err) => {
                debug!(id = %inner.id, error = %err, "IPC read ended");
                inner.disconnect();
                break;
            }
        }
    }
}

async fn run_writer<W>(
    mut writer: W,
    mut rx: mpsc::UnboundedReceiver<TxEntry>,
    inner: Arc<ConnectionInner>,
) where
    W: AsyncWrite + Unpin + Send + 'static,
{
    while let Some(entry) = rx.recv().await {
        let result = write_frame(&mut writer, entry.bytes()).await;
        inner.depth.fetch_sub(1, Ordering::AcqRel);
        if let Err(err) = result {
            debug!(id = %inner.id, error = %err, "IPC write failed");
            inner.disconnect();
            break;
        }
    }
}

#[cfg(test)]
#[path = "connection_tests.rs"]
mod tests;
