// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Daemon-side proxy of one discovered remote service instance.
//!
//! Holds the offered endpoints and the per-eventgroup subscription state
//! shared by every local subscriber. SD traffic (SubscribeEventgroup,
//! StopSubscribe) is returned to the caller for scheduling; subscription
//! state changes are pushed to the subscribing applications directly
//! through their send routers.

use std::collections::HashMap;
use std::net::{SocketAddr, SocketAddrV4};
use std::sync::Arc;

use tracing::{debug, trace};

use sipd_core::config::MachineConfig;
use sipd_core::{ClientId, EventId, EventgroupId, ServiceInstanceId, Ttl};
use sipd_wire::TransportProto;

use crate::app::connection::ConnectionId;
use crate::app::send::SendRouter;
use crate::sd::entries::{EntryEndpoints, OfferEntry, SubscribeEntry};
use crate::services::subscription::SubscriptionState;
use crate::services::transport::NetTransport;
use crate::validator::ValidationError;

/// One application-side subscriber of an eventgroup.
#[derive(Clone)]
pub struct LocalSubscriber {
    pub conn: ConnectionId,
    pub client: ClientId,
    pub event: EventId,
    pub router: SendRouter,
}

#[derive(Default)]
struct EventgroupSub {
    state: SubscriptionState,
    subscribers: Vec<LocalSubscriber>,
}

/// See the module docs.
pub struct RemoteServer {
    id: ServiceInstanceId,
    subscribe_ttl: Ttl,
    endpoints: Option<EntryEndpoints>,
    sd_peer: Option<SocketAddr>,
    eventgroups: HashMap<EventgroupId, EventgroupSub>,
    transport: Arc<dyn NetTransport>,
}

impl RemoteServer {
    pub fn new(id: ServiceInstanceId, subscribe_ttl: Ttl, transport: Arc<dyn NetTransport>) -> Self {
        Self {
            id,
            subscribe_ttl,
            endpoints: None,
            sd_peer: None,
            eventgroups: HashMap::new(),
            transport,
        }
    }

    pub fn id(&self) -> ServiceInstanceId {
        self.id
    }

    pub fn is_available(&self) -> bool {
        self.endpoints.is_some()
    }

    pub fn sd_peer(&self) -> Option<SocketAddr> {
        self.sd_peer
    }

    pub fn subscription_state(&self, eventgroup: EventgroupId) -> SubscriptionState {
        self.eventgroups
            .get(&eventgroup)
            .map(|sub| sub.state)
            .unwrap_or(SubscriptionState::NotSubscribed)
    }

    // — offer lifecycle —

    /// A new offer became active. Returns the SubscribeEventgroup entries
    /// that must be scheduled for eventgroups with waiting subscribers.
    pub fn on_offer_activated(
        &mut self,
        machine: &MachineConfig,
        from: SocketAddr,
        entry: &OfferEntry,
    ) -> Vec<SubscribeEntry> {
        self.endpoints = Some(entry.endpoints);
        self.sd_peer = Some(from);
        self.id.minor = entry.id.minor;

        let mut to_subscribe = Vec::new();
        for (&eventgroup, sub) in &mut self.eventgroups {
            if !sub.subscribers.is_empty() && sub.state == SubscriptionState::NotSubscribed {
                sub.state = SubscriptionState::SubscriptionPending;
                notify_all(&self.id, sub, SubscriptionState::SubscriptionPending);
                to_subscribe.push(subscribe_entry(
                    &self.id,
                    machine,
                    eventgroup,
                    self.subscribe_ttl,
                ));
            }
        }
        to_subscribe
    }

    /// A matching renewal arrived; endpoints may have been refreshed.
    pub fn on_offer_renewed(&mut self, _multicast: bool, entry: &OfferEntry) {
        self.endpoints = Some(entry.endpoints);
    }

    /// The active offer went away; every subscription is torn down.
    pub fn on_offer_lost(&mut self) {
        self.endpoints = None;
        self.sd_peer = None;
        for sub in self.eventgroups.values_mut() {
            if sub.state != SubscriptionState::NotSubscribed {
                sub.state = SubscriptionState::NotSubscribed;
                notify_all(&self.id, sub, SubscriptionState::NotSubscribed);
            }
        }
    }

    // — subscriptions —

    /// Register a local subscriber. Returns the SubscribeEventgroup entry
    /// to schedule when this subscription needs SD traffic.
    pub fn subscribe(
        &mut self,
        machine: &MachineConfig,
        eventgroup: EventgroupId,
        subscriber: LocalSubscriber,
    ) -> Option<SubscribeEntry> {
        let id = self.id;
        let offer_active = self.endpoints.is_some();
        let sub = self.eventgroups.entry(eventgroup).or_default();

        // A fresh subscriber assumes NotSubscribed; only a live state is
        // worth reporting on join.
        if sub.state != SubscriptionState::NotSubscribed {
            notify_one(&id, &subscriber, sub.state);
        }
        sub.subscribers.push(subscriber);

        if offer_active && sub.state == SubscriptionState::NotSubscribed {
            sub.state = SubscriptionState::SubscriptionPending;
            notify_all(&id, sub, SubscriptionState::SubscriptionPending);
            return Some(subscribe_entry(&id, machine, eventgroup, self.subscribe_ttl));
        }
        None
    }

    /// Deregister a subscriber. Returns the StopSubscribe entry to
    /// schedule when the last subscriber of a live subscription left.
    pub fn unsubscribe(
        &mut self,
        machine: &MachineConfig,
        eventgroup: EventgroupId,
        conn: ConnectionId,
        client: ClientId,
        event: EventId,
    ) -> Option<SubscribeEntry> {
        let id = self.id;
        let subscribe_ttl = self.subscribe_ttl;
        let sub = self.eventgroups.get_mut(&eventgroup)?;
        sub.subscribers
            .retain(|s| !(s.conn == conn && s.client == client && s.event == event));
        if sub.subscribers.is_empty() && sub.state != SubscriptionState::NotSubscribed {
            sub.state = SubscriptionState::NotSubscribed;
            let mut stop = subscribe_entry(&id, machine, eventgroup, subscribe_ttl);
            stop.ttl = Ttl::ZERO;
            return Some(stop);
        }
        None
    }

    /// Drop every subscriber belonging to a disconnected application.
    /// Returns the StopSubscribe entries owed for emptied eventgroups.
    pub fn remove_connection(
        &mut self,
        machine: &MachineConfig,
        conn: ConnectionId,
    ) -> Vec<SubscribeEntry> {
        let id = self.id;
        let subscribe_ttl = self.subscribe_ttl;
        let mut stops = Vec::new();
        for (&eventgroup, sub) in &mut self.eventgroups {
            let before = sub.subscribers.len();
            sub.subscribers.retain(|s| s.conn != conn);
            if before > 0
                && sub.subscribers.is_empty()
                && sub.state != SubscriptionState::NotSubscribed
            {
                sub.state = SubscriptionState::NotSubscribed;
                let mut stop = subscribe_entry(&id, machine, eventgroup, subscribe_ttl);
                stop.ttl = Ttl::ZERO;
                stops.push(stop);
            }
        }
        stops
    }

    /// Ack from the peer: the eventgroup is subscribed.
    pub fn on_subscribe_ack(&mut self, eventgroup: EventgroupId, multicast: Option<SocketAddrV4>) {
        trace!(id = %self.id, %eventgroup, ?multicast, "subscription acknowledged");
        if let Some(sub) = self.eventgroups.get_mut(&eventgroup) {
            if sub.state != SubscriptionState::Subscribed {
                sub.state = SubscriptionState::Subscribed;
                notify_all(&self.id, sub, SubscriptionState::Subscribed);
            }
        }
    }

    /// Nack from the peer: the subscription was rejected.
    pub fn on_subscribe_nack(&mut self, eventgroup: EventgroupId) {
        debug!(id = %self.id, %eventgroup, "subscription rejected by peer");
        if let Some(sub) = self.eventgroups.get_mut(&eventgroup) {
            if sub.state != SubscriptionState::NotSubscribed {
                sub.state = SubscriptionState::NotSubscribed;
                notify_all(&self.id, sub, SubscriptionState::NotSubscribed);
            }
        }
    }

    // — user traffic —

    /// Send a method request toward the remote instance.
    pub fn send_method_request(&self, packet: Arc<[u8]>) -> Result<(), ValidationError> {
        let endpoints = self.endpoints.ok_or(ValidationError::ServiceNotOffered)?;
        let udp = endpoints.udp.ok_or(ValidationError::ConnectionNotAvailable)?;
        self.transport.send(TransportProto::Udp, SocketAddr::V4(udp), packet);
        Ok(())
    }
}

fn subscribe_entry(
    id: &ServiceInstanceId,
    machine: &MachineConfig,
    eventgroup: EventgroupId,
    ttl: Ttl,
) -> SubscribeEntry {
    SubscribeEntry {
        key: id.instance_key(),
        eventgroup,
        counter: 0,
        ttl,
        endpoints: EntryEndpoints {
            udp: Some(SocketAddrV4::new(machine.unicast_address, machine.user_udp_port)),
            tcp: None,
        },
    }
}

fn notify_all(id: &ServiceInstanceId, sub: &EventgroupSub, state: SubscriptionState) {
    for subscriber in &sub.subscribers {
        notify_one(id, subscriber, state);
    }
}

fn notify_one(id: &ServiceInstanceId, subscriber: &LocalSubscriber, state: SubscriptionState) {
    // A failed enqueue means the application is gone; its cleanup drops
    // the subscriber shortly.
    let _ = subscriber.router.on_subscription_state_change(id, subscriber.event, state);
}

#[cfg(test)]
#[path = "remote_tests.rs"]
mod tests;
