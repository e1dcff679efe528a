// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Provided-side handles: exclusive instance ownership and event/request
//! routing for one locally provided service instance.

use std::collections::HashMap;
use std::net::{SocketAddr, SocketAddrV4};
use std::sync::Arc;

use tracing::{debug, trace, warn};

use sipd_core::config::ServiceInterface;
use sipd_core::{ClientId, EventId, EventgroupId, ServiceInstanceId, SessionId};
use sipd_wire::{SomeIpHeader, TransportProto};

use crate::app::connection::ConnectionId;
use crate::app::send::SendRouter;
use crate::services::transport::NetTransport;

/// Enforces that one instance is provided by at most one application.
#[derive(Debug, Default)]
pub struct LocalServerManager {
    owners: HashMap<ServiceInstanceId, ConnectionId>,
}

impl LocalServerManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take exclusive ownership. Fails when another connection holds it.
    pub fn try_acquire(&mut self, id: ServiceInstanceId, conn: ConnectionId) -> bool {
        let key = id.lookup_key();
        match self.owners.get(&key) {
            Some(&owner) if owner != conn => false,
            _ => {
                self.owners.insert(key, conn);
                true
            }
        }
    }

    /// Release ownership; only the owner can release.
    pub fn release(&mut self, id: ServiceInstanceId, conn: ConnectionId) -> bool {
        let key = id.lookup_key();
        if self.owners.get(&key) == Some(&conn) {
            self.owners.remove(&key);
            true
        } else {
            false
        }
    }

    pub fn owner_of(&self, id: ServiceInstanceId) -> Option<ConnectionId> {
        self.owners.get(&id.lookup_key()).copied()
    }

    /// Drop every ownership held by a disconnected application.
    pub fn release_connection(&mut self, conn: ConnectionId) -> Vec<ServiceInstanceId> {
        let released: Vec<ServiceInstanceId> = self
            .owners
            .iter()
            .filter(|(_, &owner)| owner == conn)
            .map(|(&id, _)| id)
            .collect();
        self.owners.retain(|_, &mut owner| owner != conn);
        released
    }
}

/// Where a method response must be routed back to.
pub enum Requester {
    Local { router: SendRouter },
    Remote { to: SocketAddrV4, proto: TransportProto },
}

/// One local subscriber of a locally provided eventgroup.
#[derive(Clone)]
pub struct ServedSubscriber {
    pub conn: ConnectionId,
    pub client: ClientId,
    pub router: SendRouter,
}

/// The in-daemon representation of one provided instance owned by an
/// application.
pub struct LocalServer {
    id: ServiceInstanceId,
    conn: ConnectionId,
    /// Router toward the providing application (requests go here).
    router: SendRouter,
    local_subscribers: HashMap<EventgroupId, Vec<ServedSubscriber>>,
    remote_subscribers: HashMap<EventgroupId, Vec<SocketAddrV4>>,
    pending: HashMap<(ClientId, SessionId), Requester>,
    /// Latest value per field event, replayed to new subscribers.
    field_cache: HashMap<EventId, Arc<[u8]>>,
    transport: Arc<dyn NetTransport>,
}

impl LocalServer {
    pub fn new(
        id: ServiceInstanceId,
        conn: ConnectionId,
        router: SendRouter,
        transport: Arc<dyn NetTransport>,
    ) -> Self {
        Self {
            id,
            conn,
            router,
            local_subscribers: HashMap::new(),
            remote_subscribers: HashMap::new(),
            pending: HashMap::new(),
            field_cache: HashMap::new(),
            transport,
        }
    }

    pub fn id(&self) -> ServiceInstanceId {
        self.id
    }

    pub fn conn(&self) -> ConnectionId {
        self.conn
    }

    // — requests toward the provider —

    /// Forward a method request from a local client to the providing
    /// application, remembering where the response must go.
    pub fn send_method_request(
        &mut self,
        header: &SomeIpHeader,
        packet: Arc<[u8]>,
        requester: Requester,
        expects_response: bool,
    ) {
        if expects_response {
            self.pending.insert((header.client, header.session), requester);
            let _ = self.router.handle_method_request(self.id.instance, packet, None);
        } else {
            let _ = self.router.handle_method_request_no_return(self.id.instance, packet, None);
        }
    }

    /// Route a method response from the provider back to the requester.
    pub fn send_method_response(&mut self, header: &SomeIpHeader, packet: Arc<[u8]>) {
        match self.pending.remove(&(header.client, header.session)) {
            Some(Requester::Local { router }) => {
                let _ = router.on_method_response(self.id.instance, packet);
            }
            Some(Requester::Remote { to, proto }) => {
                self.transport.send(proto, SocketAddr::V4(to), packet);
            }
            None => {
                warn!(
                    id = %self.id,
                    client = %header.client,
                    session = %header.session,
                    "response without a pending request"
                );
            }
        }
    }

    // — events from the provider —

    /// Fan an event notification out to every subscriber of its
    /// eventgroup. Field values are cached for later initial-value
    /// delivery.
    pub fn send_event(
        &mut self,
        service: &ServiceInterface,
        event: EventId,
        packet: Arc<[u8]>,
    ) {
        let Some(event_cfg) = service.event(event) else {
            warn!(id = %self.id, %event, "event not in the service catalog");
            return;
        };
        if event_cfg.field {
            self.field_cache.insert(event, Arc::clone(&packet));
        }

        if let Some(subscribers) = self.local_subscribers.get(&event_cfg.eventgroup) {
            for subscriber in subscribers {
                let _ = subscriber.router.on_someip_event(
                    self.id.instance,
                    Arc::clone(&packet),
                    None,
                );
            }
        }
        if let Some(remotes) = self.remote_subscribers.get(&event_cfg.eventgroup) {
            for &to in remotes {
                self.transport.send(TransportProto::Udp, SocketAddr::V4(to), Arc::clone(&packet));
            }
        }
        trace!(id = %self.id, %event, "event fanned out");
    }

    /// Fan a PDU out to every subscriber of the instance. PDUs carry no
    /// eventgroup on the inner header, so delivery is instance-wide.
    pub fn send_pdu(&mut self, packet: Arc<[u8]>) {
        for subscribers in self.local_subscribers.values() {
            for subscriber in subscribers {
                let _ =
                    subscriber.router.on_pdu_event(self.id.instance, Arc::clone(&packet), None);
            }
        }
        for remotes in self.remote_subscribers.values() {
            for &to in remotes {
                self.transport.send(TransportProto::Udp, SocketAddr::V4(to), Arc::clone(&packet));
            }
        }
    }

    /// Deliver an initial field notification produced by the provider to
    /// exactly one subscribing client.
    pub fn send_initial_field_notification(
        &self,
        target_client: ClientId,
        packet: Arc<[u8]>,
    ) {
        for subscribers in self.local_subscribers.values() {
            if let Some(subscriber) =
                subscribers.iter().find(|s| s.client == target_client)
            {
                let _ = subscriber.router.on_initial_field_notification(
                    self.id.instance,
                    target_client,
                    packet,
                );
                return;
            }
        }
        debug!(id = %self.id, client = %target_client, "no subscriber for initial field");
    }

    // — subscriptions —

    /// A local client subscribed. Cached field values of the eventgroup
    /// are replayed to the new subscriber immediately.
    pub fn subscribe_local(
        &mut self,
        service: &ServiceInterface,
        eventgroup: EventgroupId,
        subscriber: ServedSubscriber,
    ) {
        for event_cfg in service.events.iter().filter(|e| e.eventgroup == eventgroup && e.field)
        {
            if let Some(value) = self.field_cache.get(&event_cfg.event) {
                let _ = subscriber.router.on_initial_field_notification(
                    self.id.instance,
                    subscriber.client,
                    Arc::clone(value),
                );
            }
        }
        self.local_subscribers.entry(eventgroup).or_default().push(subscriber);
    }

    pub fn unsubscribe_local(
        &mut self,
        eventgroup: EventgroupId,
        conn: ConnectionId,
        client: ClientId,
    ) {
        if let Some(subscribers) = self.local_subscribers.get_mut(&eventgroup) {
            subscribers.retain(|s| !(s.conn == conn && s.client == client));
        }
    }

    /// A remote peer subscribed via SD.
    pub fn subscribe_remote(&mut self, eventgroup: EventgroupId, to: SocketAddrV4) {
        let subscribers = self.remote_subscribers.entry(eventgroup).or_default();
        if !subscribers.contains(&to) {
            subscribers.push(to);
        }
    }

    pub fn unsubscribe_remote(&mut self, eventgroup: EventgroupId, to: SocketAddrV4) {
        if let Some(subscribers) = self.remote_subscribers.get_mut(&eventgroup) {
            subscribers.retain(|s| *s != to);
        }
    }

    /// Cached field values for one eventgroup (initial delivery after an
    /// Ack went out to a remote subscriber).
    pub fn cached_fields(
        &self,
        service: &ServiceInterface,
        eventgroup: EventgroupId,
    ) -> Vec<Arc<[u8]>> {
        service
            .events
            .iter()
            .filter(|e| e.eventgroup == eventgroup && e.field)
            .filter_map(|e| self.field_cache.get(&e.event).cloned())
            .collect()
    }

    /// Drop state belonging to a disconnected subscriber application.
    pub fn remove_connection(&mut self, conn: ConnectionId) {
        for subscribers in self.local_subscribers.values_mut() {
            subscribers.retain(|s| s.conn != conn);
        }
    }
}

#[cfg(test)]
#[path = "local_server_tests.rs"]
mod tests;
