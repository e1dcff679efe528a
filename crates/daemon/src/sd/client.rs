// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! SD client for one required service instance.
//!
//! Owns the find-service phase machine, the single active offer, and its
//! TTL timer. Notifications about offer availability are returned to the
//! caller (the required-service-instance layer) rather than delivered
//! through callbacks, so the listener and remote-server sides stay free of
//! reference cycles.

use std::net::SocketAddr;

use tracing::{debug, trace};

use sipd_core::config::{MachineConfig, RequiredInstance};
use sipd_core::{InstanceKey, TimerKey};

use crate::sd::client_sm::{ClientStateMachine, FindPhase, SmAction};
use crate::sd::entries::{FindEntry, OfferEntry};
use crate::sd::offer_check::{check_offer_endpoints, OfferCheckError};
use crate::sd::scheduler::{SdCtx, SdScheduler};

/// The offer currently accepted by this client. At most one exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActiveOffer {
    /// SD endpoint the offer arrived from.
    pub from: SocketAddr,
    pub entry: OfferEntry,
    /// Whether the accepting entry arrived by multicast.
    pub multicast: bool,
}

/// Result of feeding an OfferService entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OfferIntake {
    /// First acceptance: the listener and the remote server must be told.
    Accepted,
    /// Matching renewal of the active offer: only the remote server is
    /// told, with the multicast flag.
    Renewed { multicast: bool },
    /// Entry not usable for this client.
    Ignored(IgnoreReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    /// Instance or version criteria not met.
    NoMatch,
    /// Required endpoints missing or outside the subnet.
    BadEndpoints(OfferCheckError),
    /// A different offer is already active; no preemption.
    OtherOfferActive,
}

/// See the module docs.
pub struct SdClient {
    required: RequiredInstance,
    key: InstanceKey,
    machine: ClientStateMachine,
    active: Option<ActiveOffer>,
}

impl SdClient {
    /// `required.instance` must be concrete; the wildcard client in
    /// `client_all` constructs one child per discovered instance.
    pub fn new(required: RequiredInstance) -> Self {
        let key = required.instance_key();
        let machine = ClientStateMachine::new(required.sd.repetitions_max);
        Self { required, key, machine, active: None }
    }

    pub fn key(&self) -> InstanceKey {
        self.key
    }

    pub fn phase(&self) -> FindPhase {
        self.machine.phase()
    }

    pub fn active_offer(&self) -> Option<&ActiveOffer> {
        self.active.as_ref()
    }

    // — condition inputs —

    pub fn on_network_up(&mut self, sd: &mut SdScheduler, ctx: &mut SdCtx<'_>) {
        let actions = self.machine.on_network_up();
        self.run(actions, sd, ctx);
    }

    /// Network loss clears the active offer; the caller receives `true`
    /// when listeners must be told the service went away.
    pub fn on_network_down(
        &mut self,
        sd: &mut SdScheduler,
        ctx: &mut SdCtx<'_>,
    ) -> bool {
        let actions = self.machine.on_network_down();
        self.run(actions, sd, ctx);
        self.clear_active(ctx)
    }

    pub fn on_service_requested(&mut self, sd: &mut SdScheduler, ctx: &mut SdCtx<'_>) {
        let actions = self.machine.on_service_requested();
        self.run(actions, sd, ctx);
    }

    /// The last requester released the service. The active offer stays;
    /// its TTL keeps running and a later request is served from it.
    pub fn on_service_released(&mut self, sd: &mut SdScheduler, ctx: &mut SdCtx<'_>) {
        let actions = self.machine.on_service_released();
        self.run(actions, sd, ctx);
        sd.unschedule_find(self.key, ctx);
    }

    /// Terminal shutdown (daemon stop or wildcard-child reap).
    pub fn stop(&mut self, sd: &mut SdScheduler, ctx: &mut SdCtx<'_>) {
        let actions = self.machine.stop();
        self.run(actions, sd, ctx);
        sd.unschedule_find(self.key, ctx);
        ctx.timers.cancel_timer(&TimerKey::OfferTtl(self.key));
        self.active = None;
    }

    pub fn is_stopped(&self) -> bool {
        self.phase() == FindPhase::Stopped
    }

    // — timer inputs —

    /// The phase timer fired.
    pub fn on_phase_timer(&mut self, sd: &mut SdScheduler, ctx: &mut SdCtx<'_>) {
        let actions = self.machine.on_timeout();
        self.run(actions, sd, ctx);
    }

    /// The TTL timer fired: the active offer expired without renewal.
    /// Returns true when the offer was cleared (listeners must be told).
    pub fn on_ttl_expired(&mut self, sd: &mut SdScheduler, ctx: &mut SdCtx<'_>) -> bool {
        if self.active.is_none() {
            return false;
        }
        debug!(key = %self.key, "active offer TTL expired");
        self.active = None;
        let actions = self.machine.on_offer_gone();
        self.run(actions, sd, ctx);
        true
    }

    // — SD entry inputs —

    /// Feed an OfferService entry addressed to this client's key.
    pub fn on_offer_entry(
        &mut self,
        machine_cfg: &MachineConfig,
        from: SocketAddr,
        entry: OfferEntry,
        multicast: bool,
        sd: &mut SdScheduler,
        ctx: &mut SdCtx<'_>,
    ) -> OfferIntake {
        if entry.id.instance != self.required.instance
            || !self.required.version_policy.minor_matches(self.required.minor, entry.id.minor)
        {
            trace!(key = %self.key, offered = %entry.id, "offer does not match criteria");
            return OfferIntake::Ignored(IgnoreReason::NoMatch);
        }
        if let Err(err) = check_offer_endpoints(machine_cfg, &self.required, &entry.endpoints) {
            debug!(key = %self.key, error = %err, "offer endpoints rejected");
            return OfferIntake::Ignored(IgnoreReason::BadEndpoints(err));
        }

        match &self.active {
            None => {
                self.active = Some(ActiveOffer { from, entry, multicast });
                self.arm_ttl(&entry, ctx);
                let actions = self.machine.on_offer_service();
                self.run(actions, sd, ctx);
                debug!(key = %self.key, offer = %entry.id, %from, "offer accepted");
                OfferIntake::Accepted
            }
            Some(active) if active.from == from && active.entry.id == entry.id => {
                // Renewal: re-arm the TTL, do not re-notify the listener.
                self.arm_ttl(&entry, ctx);
                if let Some(active) = &mut self.active {
                    active.entry = entry;
                }
                OfferIntake::Renewed { multicast }
            }
            Some(_) => OfferIntake::Ignored(IgnoreReason::OtherOfferActive),
        }
    }

    /// Feed a StopOffer entry. Returns true when it withdrew the active
    /// offer.
    pub fn on_stop_offer_entry(
        &mut self,
        from: SocketAddr,
        entry: &OfferEntry,
        sd: &mut SdScheduler,
        ctx: &mut SdCtx<'_>,
    ) -> bool {
        let matches = self
            .active
            .as_ref()
            .is_some_and(|active| active.from == from && active.entry.id == entry.id);
        if !matches {
            return false;
        }
        debug!(key = %self.key, %from, "active offer withdrawn");
        self.clear_active_and_research(sd, ctx)
    }

    /// The peer at `from` rebooted. Returns true when the active offer was
    /// dropped because it came from that peer.
    pub fn on_reboot_detected(
        &mut self,
        from: SocketAddr,
        sd: &mut SdScheduler,
        ctx: &mut SdCtx<'_>,
    ) -> bool {
        let matches = self.active.as_ref().is_some_and(|active| active.from == from);
        if !matches {
            return false;
        }
        debug!(key = %self.key, %from, "active offer dropped after peer reboot");
        self.clear_active_and_research(sd, ctx)
    }

    /// The FindService entry this client sends while searching.
    pub fn find_entry(&self) -> FindEntry {
        FindEntry {
            service: self.required.service,
            instance: self.required.instance,
            major: self.required.major,
            minor: self.required.version_policy.find_service_minor(self.required.minor),
            ttl: self.required.sd.find_ttl,
        }
    }

    pub fn required(&self) -> &RequiredInstance {
        &self.required
    }

    fn arm_ttl(&self, entry: &OfferEntry, ctx: &mut SdCtx<'_>) {
        match entry.ttl.lifetime() {
            Some(lifetime) => {
                ctx.timers.set_timer(TimerKey::OfferTtl(self.key), lifetime, ctx.now)
            }
            None => ctx.timers.cancel_timer(&TimerKey::OfferTtl(self.key)),
        }
    }

    /// Drop the active offer and cancel its TTL. Returns true when an
    /// offer was actually dropped.
    fn clear_active(&mut self, ctx: &mut SdCtx<'_>) -> bool {
        ctx.timers.cancel_timer(&TimerKey::OfferTtl(self.key));
        self.active.take().is_some()
    }

    fn clear_active_and_research(
        &mut self,
        sd: &mut SdScheduler,
        ctx: &mut SdCtx<'_>,
    ) -> bool {
        let cleared = self.clear_active(ctx);
        if cleared {
            let actions = self.machine.on_offer_gone();
            self.run(actions, sd, ctx);
        }
        cleared
    }

    fn run(&mut self, actions: Vec<SmAction>, sd: &mut SdScheduler, ctx: &mut SdCtx<'_>) {
        for action in actions {
            match action {
                SmAction::ArmInitialDelay => {
                    let delay = ctx.jitter.delay_in(self.required.sd.initial_delay_window());
                    ctx.timers.set_timer(TimerKey::ClientPhase(self.key), delay, ctx.now);
                }
                SmAction::ArmRepetitionDelay(step) => {
                    let delay = self.required.sd.repetition_delay(step);
                    ctx.timers.set_timer(TimerKey::ClientPhase(self.key), delay, ctx.now);
                }
                SmAction::CancelPhaseTimer => {
                    ctx.timers.cancel_timer(&TimerKey::ClientPhase(self.key));
                }
                SmAction::SendFind => {
                    let entry = self.find_entry();
                    trace!(key = %self.key, "find service scheduled");
                    sd.schedule_find(
                        entry,
                        (std::time::Duration::ZERO, std::time::Duration::ZERO),
                        ctx,
                    );
                }
            }
        }
    }
}

#[cfg(test)]
#[path = "client_tests.rs"]
mod tests;
