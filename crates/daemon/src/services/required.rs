// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! One required service instance: SD client, remote-server proxies, and
//! client-id allocation.
//!
//! The runtime feeds SD entries and timers in; this layer resolves them
//! against the owned SD client (specific or wildcard), keeps one remote
//! server per discovered instance, and reports which instances went up or
//! down so the runtime can notify watching applications.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use thiserror::Error;
use tracing::debug;

use sipd_core::config::{MachineConfig, RequiredInstance};
use sipd_core::{ClientId, InstanceId, InstanceKey, ServiceInstanceId};

use crate::sd::client::{OfferIntake, SdClient};
use crate::sd::client_all::{AllOfferIntake, SdClientAll};
use crate::sd::entries::OfferEntry;
use crate::sd::scheduler::{SdCtx, SdScheduler};
use crate::services::client_ids::{ClientIdError, ClientIdGenerator};
use crate::services::remote::{LocalSubscriber, RemoteServer};
use crate::services::transport::NetTransport;

/// Zero-delay window for client-side subscribe scheduling; pacing comes
/// from the batch tick.
const SUBSCRIBE_WINDOW: (std::time::Duration, std::time::Duration) =
    (std::time::Duration::ZERO, std::time::Duration::ZERO);

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum RequestServiceError {
    #[error("client id space exhausted")]
    ClientIdsOverflow,

    #[error("no remote server for the requested instance")]
    RemoteServerNotFound,
}

impl From<ClientIdError> for RequestServiceError {
    fn from(_: ClientIdError) -> Self {
        RequestServiceError::ClientIdsOverflow
    }
}

/// Result of feeding an OfferService entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OfferOutcome {
    /// A new offer became active for this instance.
    Up(ServiceInstanceId),
    /// Renewal of the already active offer.
    Renewed(InstanceId),
    Ignored,
}

enum SdClientKind {
    Specific(SdClient),
    All(SdClientAll),
}

/// See the module docs.
pub struct RequiredServiceInstance {
    config: RequiredInstance,
    client_ids: ClientIdGenerator,
    sd_client: SdClientKind,
    remotes: HashMap<InstanceId, RemoteServer>,
    /// Live LocalClients plus applications with service discovery armed.
    demand: usize,
    transport: Arc<dyn NetTransport>,
}

impl RequiredServiceInstance {
    pub fn new(config: RequiredInstance, transport: Arc<dyn NetTransport>) -> Self {
        let sd_client = if config.instance.is_all() {
            SdClientKind::All(SdClientAll::new(config.clone()))
        } else {
            SdClientKind::Specific(SdClient::new(config.clone()))
        };
        Self {
            config,
            client_ids: ClientIdGenerator::new(),
            sd_client,
            remotes: HashMap::new(),
            demand: 0,
            transport,
        }
    }

    pub fn config(&self) -> &RequiredInstance {
        &self.config
    }

    pub fn key(&self) -> InstanceKey {
        self.config.instance_key()
    }

    /// Whether this RSI covers `(service, instance)`.
    pub fn covers(&self, service: sipd_core::ServiceId, instance: InstanceId) -> bool {
        self.config.service == service
            && (self.config.instance == instance || self.config.instance.is_all())
    }

    /// Whether a timer key belongs to this RSI (same service and major).
    pub fn owns_key(&self, key: InstanceKey) -> bool {
        key.service == self.config.service && key.major == self.config.major
    }

    pub fn remote(&self, instance: InstanceId) -> Option<&RemoteServer> {
        self.remotes.get(&instance)
    }

    pub fn remote_mut(&mut self, instance: InstanceId) -> Option<&mut RemoteServer> {
        self.remotes.get_mut(&instance)
    }

    // — application-facing operations —

    /// Allocate a client id for a requester of `instance`.
    ///
    /// For a specific-instance RSI the id is granted before any offer is
    /// seen (the find sequence runs in parallel). Under a wildcard RSI the
    /// instance must already be discovered.
    pub fn request_service(
        &mut self,
        instance: InstanceId,
        sd: &mut SdScheduler,
        ctx: &mut SdCtx<'_>,
    ) -> Result<ClientId, RequestServiceError> {
        match &self.sd_client {
            SdClientKind::Specific(_) => {}
            SdClientKind::All(all) => {
                if all.child(instance).is_none() {
                    return Err(RequestServiceError::RemoteServerNotFound);
                }
            }
        }
        let id = self.client_ids.allocate()?;
        self.raise_demand(sd, ctx);
        debug!(key = %self.key(), client = %id, "client id allocated");
        Ok(id)
    }

    /// Release a client id. Returns false when the id was not live.
    pub fn release_service(
        &mut self,
        client: ClientId,
        sd: &mut SdScheduler,
        ctx: &mut SdCtx<'_>,
    ) -> bool {
        if !self.client_ids.release(client) {
            return false;
        }
        self.lower_demand(sd, ctx);
        true
    }

    /// An application armed service discovery for this instance.
    pub fn start_discovery(&mut self, sd: &mut SdScheduler, ctx: &mut SdCtx<'_>) {
        self.raise_demand(sd, ctx);
    }

    pub fn stop_discovery(&mut self, sd: &mut SdScheduler, ctx: &mut SdCtx<'_>) {
        self.lower_demand(sd, ctx);
    }

    /// Currently active offers, with the offered minor version.
    pub fn offered_services(&self) -> Vec<ServiceInstanceId> {
        match &self.sd_client {
            SdClientKind::Specific(client) => {
                client.active_offer().map(|active| active.entry.id).into_iter().collect()
            }
            SdClientKind::All(all) => {
                let mut offered: Vec<ServiceInstanceId> = all
                    .children()
                    .filter_map(|(_, child)| child.active_offer())
                    .map(|active| active.entry.id)
                    .collect();
                offered.sort();
                offered
            }
        }
    }

    // — network and timers —

    pub fn on_network_up(&mut self, sd: &mut SdScheduler, ctx: &mut SdCtx<'_>) {
        match &mut self.sd_client {
            SdClientKind::Specific(client) => client.on_network_up(sd, ctx),
            SdClientKind::All(all) => all.on_network_up(sd, ctx),
        }
    }

    pub fn on_network_down(
        &mut self,
        sd: &mut SdScheduler,
        ctx: &mut SdCtx<'_>,
    ) -> Vec<ServiceInstanceId> {
        let lost: Vec<InstanceId> = match &mut self.sd_client {
            SdClientKind::Specific(client) => {
                if client.on_network_down(sd, ctx) {
                    vec![self.config.instance]
                } else {
                    Vec::new()
                }
            }
            SdClientKind::All(all) => all.on_network_down(sd, ctx),
        };
        self.take_down(lost)
    }

    pub fn on_phase_timer(
        &mut self,
        key: InstanceKey,
        sd: &mut SdScheduler,
        ctx: &mut SdCtx<'_>,
    ) {
        match &mut self.sd_client {
            SdClientKind::Specific(client) => client.on_phase_timer(sd, ctx),
            SdClientKind::All(all) => all.on_phase_timer(key, sd, ctx),
        }
    }

    pub fn on_ttl_expired(
        &mut self,
        key: InstanceKey,
        sd: &mut SdScheduler,
        ctx: &mut SdCtx<'_>,
    ) -> Vec<ServiceInstanceId> {
        let lost: Vec<InstanceId> = match &mut self.sd_client {
            SdClientKind::Specific(client) => {
                if client.on_ttl_expired(sd, ctx) {
                    vec![self.config.instance]
                } else {
                    Vec::new()
                }
            }
            SdClientKind::All(all) => {
                let lost: Vec<InstanceId> =
                    all.on_ttl_expired(key, sd, ctx).into_iter().collect();
                for &instance in &lost {
                    all.mark_child_stopped(instance, sd, ctx);
                }
                lost
            }
        };
        self.take_down(lost)
    }

    // — SD entry intake —

    /// Feed an OfferService entry. On first acceptance the remote server
    /// is created/refreshed and owed SubscribeEventgroup entries are
    /// scheduled.
    pub fn on_offer_entry(
        &mut self,
        machine: &MachineConfig,
        from: SocketAddr,
        entry: OfferEntry,
        multicast: bool,
        sd: &mut SdScheduler,
        ctx: &mut SdCtx<'_>,
    ) -> OfferOutcome {
        let intake = match &mut self.sd_client {
            SdClientKind::Specific(client) => {
                let intake = client.on_offer_entry(machine, from, entry, multicast, sd, ctx);
                match intake {
                    OfferIntake::Accepted => Some((entry.id.instance, true)),
                    OfferIntake::Renewed { .. } => Some((entry.id.instance, false)),
                    OfferIntake::Ignored(_) => None,
                }
            }
            SdClientKind::All(all) => {
                match all.on_offer_entry(machine, from, entry, multicast, sd, ctx) {
                    AllOfferIntake::NewInstance(instance) => Some((instance, true)),
                    AllOfferIntake::Child(instance, OfferIntake::Accepted) => {
                        Some((instance, true))
                    }
                    AllOfferIntake::Child(instance, OfferIntake::Renewed { .. }) => {
                        Some((instance, false))
                    }
                    _ => None,
                }
            }
        };

        match intake {
            None => OfferOutcome::Ignored,
            Some((instance, first)) => {
                let subscribe_ttl = self.config.sd.subscribe_ttl;
                let transport = Arc::clone(&self.transport);
                let id = ServiceInstanceId::new(
                    self.config.service,
                    self.config.major,
                    entry.id.minor,
                    instance,
                );
                let remote = self
                    .remotes
                    .entry(instance)
                    .or_insert_with(|| RemoteServer::new(id, subscribe_ttl, transport));
                if first {
                    let subscribes = remote.on_offer_activated(machine, from, &entry);
                    for subscribe in subscribes {
                        sd.schedule_subscribe(from, subscribe, SUBSCRIBE_WINDOW, ctx);
                    }
                    OfferOutcome::Up(remote.id())
                } else {
                    remote.on_offer_renewed(multicast, &entry);
                    OfferOutcome::Renewed(instance)
                }
            }
        }
    }

    /// Feed a StopOffer entry.
    pub fn on_stop_offer_entry(
        &mut self,
        from: SocketAddr,
        entry: &OfferEntry,
        sd: &mut SdScheduler,
        ctx: &mut SdCtx<'_>,
    ) -> Vec<ServiceInstanceId> {
        let lost: Vec<InstanceId> = match &mut self.sd_client {
            SdClientKind::Specific(client) => {
                if client.on_stop_offer_entry(from, entry, sd, ctx) {
                    vec![self.config.instance]
                } else {
                    Vec::new()
                }
            }
            SdClientKind::All(all) => {
                let lost: Vec<InstanceId> =
                    all.on_stop_offer_entry(from, entry, sd, ctx).into_iter().collect();
                for &instance in &lost {
                    all.mark_child_stopped(instance, sd, ctx);
                }
                lost
            }
        };
        self.take_down(lost)
    }

    /// A peer rebooted; drop everything derived from it.
    pub fn on_reboot_detected(
        &mut self,
        from: SocketAddr,
        sd: &mut SdScheduler,
        ctx: &mut SdCtx<'_>,
    ) -> Vec<ServiceInstanceId> {
        let lost: Vec<InstanceId> = match &mut self.sd_client {
            SdClientKind::Specific(client) => {
                if client.on_reboot_detected(from, sd, ctx) {
                    vec![self.config.instance]
                } else {
                    Vec::new()
                }
            }
            SdClientKind::All(all) => {
                let lost = all.on_reboot_detected(from, sd, ctx);
                for &instance in &lost {
                    all.mark_child_stopped(instance, sd, ctx);
                }
                lost
            }
        };
        self.take_down(lost)
    }

    /// Route an Ack to the remote server of the matching instance.
    pub fn on_subscribe_ack(
        &mut self,
        instance: InstanceId,
        eventgroup: sipd_core::EventgroupId,
        multicast: Option<std::net::SocketAddrV4>,
    ) {
        if let Some(remote) = self.remotes.get_mut(&instance) {
            remote.on_subscribe_ack(eventgroup, multicast);
        }
    }

    pub fn on_subscribe_nack(
        &mut self,
        instance: InstanceId,
        eventgroup: sipd_core::EventgroupId,
    ) {
        if let Some(remote) = self.remotes.get_mut(&instance) {
            remote.on_subscribe_nack(eventgroup);
        }
    }

    // — subscriptions —

    /// Subscribe a local client to an eventgroup of `instance`.
    pub fn subscribe(
        &mut self,
        machine: &MachineConfig,
        instance: InstanceId,
        eventgroup: sipd_core::EventgroupId,
        subscriber: LocalSubscriber,
        sd: &mut SdScheduler,
        ctx: &mut SdCtx<'_>,
    ) {
        let subscribe_ttl = self.config.sd.subscribe_ttl;
        let transport = Arc::clone(&self.transport);
        let id = ServiceInstanceId::new(
            self.config.service,
            self.config.major,
            self.config.minor,
            instance,
        );
        let remote = self
            .remotes
            .entry(instance)
            .or_insert_with(|| RemoteServer::new(id, subscribe_ttl, transport));
        let entry = remote.subscribe(machine, eventgroup, subscriber);
        if let (Some(entry), Some(peer)) = (entry, remote.sd_peer()) {
            sd.schedule_subscribe(peer, entry, SUBSCRIBE_WINDOW, ctx);
        }
    }

    /// Remove one subscriber; a StopSubscribe goes out when it was the
    /// last one.
    #[allow(clippy::too_many_arguments)]
    pub fn unsubscribe(
        &mut self,
        machine: &MachineConfig,
        instance: InstanceId,
        eventgroup: sipd_core::EventgroupId,
        conn: crate::app::connection::ConnectionId,
        client: ClientId,
        event: sipd_core::EventId,
        sd: &mut SdScheduler,
        ctx: &mut SdCtx<'_>,
    ) {
        if let Some(remote) = self.remotes.get_mut(&instance) {
            let stop = remote.unsubscribe(machine, eventgroup, conn, client, event);
            if let (Some(stop), Some(peer)) = (stop, remote.sd_peer()) {
                sd.schedule_stop_subscribe(peer, stop, ctx);
            }
        }
    }

    /// Drop everything belonging to a disconnected application.
    pub fn remove_connection(
        &mut self,
        machine: &MachineConfig,
        conn: crate::app::connection::ConnectionId,
        sd: &mut SdScheduler,
        ctx: &mut SdCtx<'_>,
    ) {
        for remote in self.remotes.values_mut() {
            let stops = remote.remove_connection(machine, conn);
            if let Some(peer) = remote.sd_peer() {
                for stop in stops {
                    sd.schedule_stop_subscribe(peer, stop, ctx);
                }
            }
        }
    }

    /// Reap wildcard children whose service stopped and that nobody
    /// requested again (software event). `still_required` reports whether
    /// any application holds a live client for the instance.
    pub fn reap_stopped_children(&mut self, still_required: impl Fn(InstanceId) -> bool) {
        if let SdClientKind::All(all) = &mut self.sd_client {
            all.reap_stopped_children(still_required);
        }
    }

    /// True when this RSI needs a software reap pass after losses.
    pub fn is_wildcard(&self) -> bool {
        matches!(self.sd_client, SdClientKind::All(_))
    }

    pub fn shutdown(&mut self, sd: &mut SdScheduler, ctx: &mut SdCtx<'_>) {
        match &mut self.sd_client {
            SdClientKind::Specific(client) => client.stop(sd, ctx),
            SdClientKind::All(all) => all.stop(sd, ctx),
        }
    }

    fn raise_demand(&mut self, sd: &mut SdScheduler, ctx: &mut SdCtx<'_>) {
        self.demand += 1;
        if self.demand == 1 {
            match &mut self.sd_client {
                SdClientKind::Specific(client) => client.on_service_requested(sd, ctx),
                SdClientKind::All(all) => all.on_service_requested(sd, ctx),
            }
        }
    }

    fn lower_demand(&mut self, sd: &mut SdScheduler, ctx: &mut SdCtx<'_>) {
        self.demand = self.demand.saturating_sub(1);
        if self.demand == 0 {
            match &mut self.sd_client {
                SdClientKind::Specific(client) => client.on_service_released(sd, ctx),
                SdClientKind::All(all) => all.on_service_released(sd, ctx),
            }
        }
    }

    /// Offers went away: tear down the affected remote servers and report
    /// the instances (with the last offered minor) for app notification.
    fn take_down(&mut self, lost: Vec<InstanceId>) -> Vec<ServiceInstanceId> {
        let mut down = Vec::new();
        for instance in lost {
            if let Some(remote) = self.remotes.get_mut(&instance) {
                down.push(remote.id());
                remote.on_offer_lost();
            } else {
                down.push(ServiceInstanceId::new(
                    self.config.service,
                    self.config.major,
                    self.config.minor,
                    instance,
                ));
            }
        }
        down
    }
}

#[cfg(test)]
#[path = "required_tests.rs"]
mod tests;
