// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Application pool and IPC acceptor.
//!
//! The acceptor task owns the listening socket: it reads peer credentials,
//! wires up the connection I/O tasks, and posts an `Accepted` event. The
//! pool itself lives in the runtime loop. Disconnected applications are
//! never destroyed inside their own callback; the runtime posts a
//! `ReapApplications` software event and the reap runs on a later turn.

use std::collections::HashMap;

use tokio::net::UnixListener;
use tracing::{error, info, warn};

use sipd_core::Credentials;

use crate::app::application::Application;
use crate::app::connection::{Connection, ConnectionId};
use crate::event::{Event, EventSender};
use crate::iam::IamPolicy;

/// Pool of connected applications, bounded by a fixed capacity.
pub struct ApplicationManager {
    apps: HashMap<ConnectionId, Application>,
    capacity: usize,
}

impl ApplicationManager {
    pub fn new(capacity: usize) -> Self {
        Self { apps: HashMap::new(), capacity }
    }

    /// Admit a freshly accepted connection.
    ///
    /// Credentials are checked against the policy unless IAM is disabled;
    /// a rejected or over-capacity connection is dropped, which closes it.
    pub fn on_accepted(
        &mut self,
        connection: Connection,
        credentials: Credentials,
        iam: &dyn IamPolicy,
        iam_enabled: bool,
    ) -> bool {
        if self.apps.len() >= self.capacity {
            warn!(id = %connection.id(), "application pool exhausted, rejecting connection");
            return false;
        }
        if iam_enabled && !iam.allow_connect(credentials) {
            warn!(id = %connection.id(), %credentials, "connection rejected by policy");
            return false;
        }
        let id = connection.id();
        info!(%id, %credentials, "application connected");
        self.apps.insert(id, Application::new(connection, credentials));
        true
    }

    pub fn get(&self, id: ConnectionId) -> Option<&Application> {
        self.apps.get(&id)
    }

    pub fn get_mut(&mut self, id: ConnectionId) -> Option<&mut Application> {
        self.apps.get_mut(&id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Application> {
        self.apps.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Application> {
        self.apps.values_mut()
    }

    pub fn len(&self) -> usize {
        self.apps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.apps.is_empty()
    }

    /// Remove every application whose connection is disconnected
    /// (software-event handler).
    pub fn reap_disconnected(&mut self) -> Vec<Application> {
        let dead: Vec<ConnectionId> = self
            .apps
            .iter()
            .filter(|(_, app)| app.is_disconnected())
            .map(|(&id, _)| id)
            .collect();
        dead.into_iter()
            .filter_map(|id| {
                info!(%id, "reaping disconnected application");
                self.apps.remove(&id)
            })
            .collect()
    }

    /// Remove every application unconditionally (shutdown).
    pub fn drain_all(&mut self) -> Vec<Application> {
        self.apps.drain().map(|(_, app)| app).collect()
    }

    /// Does any application still hold a client for this instance?
    pub fn any_client_for_instance(
        &self,
        service: sipd_core::ServiceId,
        instance: sipd_core::InstanceId,
    ) -> bool {
        self.apps.values().any(|app| app.has_client_for_instance(service, instance))
    }
}

/// Accept IPC connections until the listener fails or the runtime goes
/// away.
pub fn spawn_acceptor(listener: UnixListener, warn_threshold: usize, events: EventSender) {
    tokio::spawn(async move {
        let mut next_id: u32 = 1;
        loop {
            match listener.accept().await {
                Ok((stream, _)) => {
                    let credentials = match stream.peer_cred() {
                        Ok(cred) => Credentials { uid: cred.uid(), gid: cred.gid() },
                        Err(err) => {
                            error!(error = %err, "failed to read peer credentials");
                            continue;
                        }
                    };
                    let id = ConnectionId(next_id);
                    next_id = next_id.wrapping_add(1);
                    let (reader, writer) = stream.into_split();
                    let connection =
                        Connection::spawn(id, reader, writer, warn_threshold, events.clone());
                    if !events.emit(Event::Accepted { connection, credentials }) {
                        break;
                    }
                }
                Err(err) => {
                    error!(error = %err, "accept failed");
                }
            }
        }
    });
}

#[cfg(test)]
#[path = "manager_tests.rs"]
mod tests;
