// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! SD client for a required instance configured with the wildcard
//! instance id.
//!
//! A finder machine sends `FindService(instance = ALL)`; every acceptable
//! offer lazily constructs a child [`SdClient`] for the concrete instance,
//! which then owns that instance's offer lifecycle. Children whose service
//! stopped are reclaimed by a software event, never inside the call that
//! stopped them; the reap re-checks that no application re-requested the
//! instance in between.

use std::collections::HashMap;
use std::net::SocketAddr;

use tracing::debug;

use sipd_core::config::{MachineConfig, RequiredInstance};
use sipd_core::{InstanceId, InstanceKey};

use crate::sd::client::{OfferIntake, SdClient};
use crate::sd::entries::OfferEntry;
use crate::sd::scheduler::{SdCtx, SdScheduler};

/// Outcome of feeding an offer to the wildcard client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllOfferIntake {
    /// A new child was created and accepted the offer.
    NewInstance(InstanceId),
    /// An existing child took the entry.
    Child(InstanceId, OfferIntake),
    /// The entry failed the wildcard-level criteria.
    Ignored,
}

/// See the module docs.
pub struct SdClientAll {
    finder: SdClient,
    children: HashMap<InstanceId, SdClient>,
    network_up: bool,
    requested: bool,
}

impl SdClientAll {
    pub fn new(required: RequiredInstance) -> Self {
        debug_assert!(required.instance.is_all());
        Self {
            finder: SdClient::new(required),
            children: HashMap::new(),
            network_up: false,
            requested: false,
        }
    }

    pub fn key(&self) -> InstanceKey {
        self.finder.key()
    }

    pub fn child(&self, instance: InstanceId) -> Option<&SdClient> {
        self.children.get(&instance)
    }

    pub fn child_mut(&mut self, instance: InstanceId) -> Option<&mut SdClient> {
        self.children.get_mut(&instance)
    }

    pub fn children(&self) -> impl Iterator<Item = (&InstanceId, &SdClient)> {
        self.children.iter()
    }

    // — condition inputs, fanned out to the finder and all children —

    pub fn on_network_up(&mut self, sd: &mut SdScheduler, ctx: &mut SdCtx<'_>) {
        self.network_up = true;
        self.finder.on_network_up(sd, ctx);
        for child in self.children.values_mut() {
            child.on_network_up(sd, ctx);
        }
    }

    /// Returns the children whose active offer was dropped with the
    /// network.
    pub fn on_network_down(
        &mut self,
        sd: &mut SdScheduler,
        ctx: &mut SdCtx<'_>,
    ) -> Vec<InstanceId> {
        self.network_up = false;
        self.finder.on_network_down(sd, ctx);
        let mut lost = Vec::new();
        for (&instance, child) in &mut self.children {
            if child.on_network_down(sd, ctx) {
                lost.push(instance);
            }
        }
        lost
    }

    pub fn on_service_requested(&mut self, sd: &mut SdScheduler, ctx: &mut SdCtx<'_>) {
        self.requested = true;
        self.finder.on_service_requested(sd, ctx);
        for child in self.children.values_mut() {
            child.on_service_requested(sd, ctx);
        }
    }

    pub fn on_service_released(&mut self, sd: &mut SdScheduler, ctx: &mut SdCtx<'_>) {
        self.requested = false;
        self.finder.on_service_released(sd, ctx);
        for child in self.children.values_mut() {
            child.on_service_released(sd, ctx);
        }
    }

    pub fn stop(&mut self, sd: &mut SdScheduler, ctx: &mut SdCtx<'_>) {
        self.finder.stop(sd, ctx);
        for child in self.children.values_mut() {
            child.stop(sd, ctx);
        }
    }

    // — timer inputs —

    /// Route a fired phase timer: the wildcard key drives the finder, a
    /// concrete key drives that child.
    pub fn on_phase_timer(
        &mut self,
        key: InstanceKey,
        sd: &mut SdScheduler,
        ctx: &mut SdCtx<'_>,
    ) {
        if key.instance.is_all() {
            self.finder.on_phase_timer(sd, ctx);
        } else if let Some(child) = self.children.get_mut(&key.instance) {
            child.on_phase_timer(sd, ctx);
        }
    }

    /// Route a fired TTL timer to the owning child. Returns the instance
    /// whose offer expired.
    pub fn on_ttl_expired(
        &mut self,
        key: InstanceKey,
        sd: &mut SdScheduler,
        ctx: &mut SdCtx<'_>,
    ) -> Option<InstanceId> {
        let child = self.children.get_mut(&key.instance)?;
        child.on_ttl_expired(sd, ctx).then_some(key.instance)
    }

    // — SD entry inputs —

    /// Feed an OfferService entry for any instance of the service.
    pub fn on_offer_entry(
        &mut self,
        machine_cfg: &MachineConfig,
        from: SocketAddr,
        entry: OfferEntry,
        multicast: bool,
        sd: &mut SdScheduler,
        ctx: &mut SdCtx<'_>,
    ) -> AllOfferIntake {
        let parent = self.finder.required();
        if !parent.version_policy.minor_matches(parent.minor, entry.id.minor) {
            return AllOfferIntake::Ignored;
        }
        let instance = entry.id.instance;
        if instance.is_all() {
            // An offer must name a concrete instance.
            return AllOfferIntake::Ignored;
        }

        if let Some(child) = self.children.get_mut(&instance) {
            let intake = child.on_offer_entry(machine_cfg, from, entry, multicast, sd, ctx);
            return AllOfferIntake::Child(instance, intake);
        }

        let mut child = self.spawn_child(instance, sd, ctx);
        match child.on_offer_entry(machine_cfg, from, entry, multicast, sd, ctx) {
            OfferIntake::Accepted => {
                debug!(key = %child.key(), "wildcard child created for discovered instance");
                self.children.insert(instance, child);
                AllOfferIntake::NewInstance(instance)
            }
            // The offer failed child-level checks; do not keep the child.
            other => {
                child.stop(sd, ctx);
                AllOfferIntake::Child(instance, other)
            }
        }
    }

    /// Feed a StopOffer entry; returns the instance whose offer it
    /// withdrew.
    pub fn on_stop_offer_entry(
        &mut self,
        from: SocketAddr,
        entry: &OfferEntry,
        sd: &mut SdScheduler,
        ctx: &mut SdCtx<'_>,
    ) -> Option<InstanceId> {
        let instance = entry.id.instance;
        let child = self.children.get_mut(&instance)?;
        child.on_stop_offer_entry(from, entry, sd, ctx).then_some(instance)
    }

    /// A peer rebooted; returns every instance whose offer was dropped.
    pub fn on_reboot_detected(
        &mut self,
        from: SocketAddr,
        sd: &mut SdScheduler,
        ctx: &mut SdCtx<'_>,
    ) -> Vec<InstanceId> {
        let mut lost = Vec::new();
        for (&instance, child) in &mut self.children {
            if child.on_reboot_detected(from, sd, ctx) {
                lost.push(instance);
            }
        }
        lost
    }

    // — child reclamation —

    /// Mark a child stopped so a later reap can reclaim it.
    pub fn mark_child_stopped(
        &mut self,
        instance: InstanceId,
        sd: &mut SdScheduler,
        ctx: &mut SdCtx<'_>,
    ) {
        if let Some(child) = self.children.get_mut(&instance) {
            child.stop(sd, ctx);
        }
    }

    /// Reap every stopped child that is no longer required. A child that
    /// was re-requested between the mark and the reap is replaced by a
    /// fresh one instead of being removed. Runs from a software event,
    /// never from inside a child's own callback.
    pub fn reap_stopped_children(&mut self, still_required: impl Fn(InstanceId) -> bool) {
        let mut respawn = Vec::new();
        self.children.retain(|&instance, child| {
            if !child.is_stopped() {
                return true;
            }
            if still_required(instance) {
                respawn.push(instance);
            } else {
                debug!(key = %child.key(), "reaping stopped wildcard child");
            }
            false
        });
        for instance in respawn {
            let mut required = self.finder.required().clone();
            required.instance = instance;
            // The fresh child waits for offers; the finder keeps searching.
            self.children.insert(instance, SdClient::new(required));
        }
    }

    /// Instances currently holding an active offer.
    pub fn offered_instances(&self) -> Vec<InstanceId> {
        let mut offered: Vec<InstanceId> = self
            .children
            .iter()
            .filter(|(_, child)| child.active_offer().is_some())
            .map(|(&instance, _)| instance)
            .collect();
        offered.sort();
        offered
    }

    /// A child mirrors the wildcard's conditions; it never runs its own
    /// find sequence because the offer that spawns it moves it straight
    /// into main phase.
    fn spawn_child(
        &self,
        instance: InstanceId,
        sd: &mut SdScheduler,
        ctx: &mut SdCtx<'_>,
    ) -> SdClient {
        let mut required = self.finder.required().clone();
        required.instance = instance;
        let mut child = SdClient::new(required);
        if self.network_up {
            child.on_network_up(sd, ctx);
        }
        if self.requested {
            child.on_service_requested(sd, ctx);
        }
        child
    }
}

#[cfg(test)]
#[path = "client_all_tests.rs"]
mod tests;
