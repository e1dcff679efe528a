// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! One connected application: its connection, send router, and the
//! local-client/local-server bookkeeping the command controller operates
//! on.

use std::collections::{HashMap, HashSet};

use sipd_core::{ClientId, Credentials, EventId, EventgroupId, ServiceInstanceId};

use crate::app::connection::{Connection, ConnectionId, ConnectionState};
use crate::app::send::SendRouter;

/// A required-side handle vended on `RequestService`.
///
/// Owns its subscription state; destroying the client tears the
/// subscriptions down and frees the id.
#[derive(Debug, Clone)]
pub struct LocalClient {
    pub target: ServiceInstanceId,
    pub id: ClientId,
    /// `(event, eventgroup)` pairs this client subscribed to.
    pub subscriptions: Vec<(EventId, EventgroupId)>,
}

impl LocalClient {
    pub fn new(target: ServiceInstanceId, id: ClientId) -> Self {
        Self { target, id, subscriptions: Vec::new() }
    }

    pub fn add_subscription(&mut self, event: EventId, eventgroup: EventgroupId) {
        if !self.subscriptions.contains(&(event, eventgroup)) {
            self.subscriptions.push((event, eventgroup));
        }
    }

    pub fn remove_subscription(&mut self, event: EventId, eventgroup: EventgroupId) -> bool {
        let before = self.subscriptions.len();
        self.subscriptions.retain(|s| *s != (event, eventgroup));
        before != self.subscriptions.len()
    }
}

/// See the module docs.
pub struct Application {
    conn: Connection,
    credentials: Credentials,
    send: SendRouter,
    /// Keyed by the dummy-minor instance identity plus the client id.
    local_clients: HashMap<(ServiceInstanceId, ClientId), LocalClient>,
    /// Instances this application provides (the LocalServer objects live
    /// in the runtime's routing map; the keys here drive cleanup).
    local_servers: HashSet<ServiceInstanceId>,
    /// Instances this application watches via StartServiceDiscovery.
    sd_watches: HashSet<ServiceInstanceId>,
}

impl Application {
    pub fn new(conn: Connection, credentials: Credentials) -> Self {
        let send = SendRouter::new(conn.clone());
        Self {
            conn,
            credentials,
            send,
            local_clients: HashMap::new(),
            local_servers: HashSet::new(),
            sd_watches: HashSet::new(),
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.conn.id()
    }

    pub fn credentials(&self) -> Credentials {
        self.credentials
    }

    pub fn send_router(&self) -> &SendRouter {
        &self.send
    }

    pub fn is_disconnected(&self) -> bool {
        self.conn.state() == ConnectionState::Disconnected
    }

    // — local clients —

    pub fn insert_client(&mut self, client: LocalClient) {
        self.local_clients.insert((client.target.lookup_key(), client.id), client);
    }

    pub fn client(&self, target: ServiceInstanceId, id: ClientId) -> Option<&LocalClient> {
        self.local_clients.get(&(target.lookup_key(), id))
    }

    pub fn client_mut(
        &mut self,
        target: ServiceInstanceId,
        id: ClientId,
    ) -> Option<&mut LocalClient> {
        self.local_clients.get_mut(&(target.lookup_key(), id))
    }

    pub fn remove_client(
        &mut self,
        target: ServiceInstanceId,
        id: ClientId,
    ) -> Option<LocalClient> {
        self.local_clients.remove(&(target.lookup_key(), id))
    }

    /// Drain every client (application teardown).
    pub fn take_clients(&mut self) -> Vec<LocalClient> {
        self.local_clients.drain().map(|(_, client)| client).collect()
    }

    /// Any client of this application targeting `instance`, regardless of
    /// client id (request routing from the network side).
    pub fn any_client_for(&self, target: ServiceInstanceId) -> Option<&LocalClient> {
        let key = target.lookup_key();
        self.local_clients
            .iter()
            .find(|((client_key, _), _)| *client_key == key)
            .map(|(_, client)| client)
    }

    pub fn has_client_for_instance(
        &self,
        service: sipd_core::ServiceId,
        instance: sipd_core::InstanceId,
    ) -> bool {
        self.local_clients
            .keys()
            .any(|(key, _)| key.service == service && key.instance == instance)
    }

    // — local servers —

    pub fn add_server(&mut self, id: ServiceInstanceId) {
        self.local_servers.insert(id.lookup_key());
    }

    pub fn remove_server(&mut self, id: ServiceInstanceId) -> bool {
        self.local_servers.remove(&id.lookup_key())
    }

    pub fn owns_server(&self, id: ServiceInstanceId) -> bool {
        self.local_servers.contains(&id.lookup_key())
    }

    pub fn take_servers(&mut self) -> Vec<ServiceInstanceId> {
        self.local_servers.drain().collect()
    }

    // — service discovery watches —

    pub fn watch(&mut self, id: ServiceInstanceId) -> bool {
        self.sd_watches.insert(id.lookup_key())
    }

    pub fn unwatch(&mut self, id: ServiceInstanceId) -> bool {
        self.sd_watches.remove(&id.lookup_key())
    }

    /// Whether a notification for `id` belongs to this application. A
    /// wildcard watch covers every concrete instance of its service.
    pub fn watches(&self, id: ServiceInstanceId) -> bool {
        let key = id.lookup_key();
        self.sd_watches.contains(&key)
            || self.sd_watches.iter().any(|watch| {
                watch.instance.is_all()
                    && watch.service == key.service
                    && watch.major == key.major
            })
    }

    pub fn take_watches(&mut self) -> Vec<ServiceInstanceId> {
        self.sd_watches.drain().collect()
    }
}

#[cfg(test)]
#[path = "application_tests.rs"]
mod tests;
