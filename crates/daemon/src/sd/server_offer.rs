// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Offer lifecycle of one provided service instance.
//!
//! When an application takes ownership and offers an instance, the
//! announcement runs through an initial jittered wait, an exponential
//! repetition run, and finally cyclic multicast offers. FindService
//! entries arriving in main phase are answered with a jittered unicast
//! offer.

use std::net::{SocketAddr, SocketAddrV4};

use tracing::debug;

use sipd_core::config::{MachineConfig, ProvidedInstance};
use sipd_core::{InstanceKey, ServiceInstanceId, TimerKey, Ttl};

use crate::sd::entries::{EntryEndpoints, OfferEntry};
use crate::sd::scheduler::{PostSendAction, SdCtx, SdScheduler};

/// Announcement phase of a provided instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OfferPhase {
    /// Not announcing: network down or not offered.
    Down,
    /// Jittered delay before the first multicast offer.
    InitialWait,
    /// Exponential repetition run (owned by the SD scheduler).
    Repetition,
    /// Cyclic announcements.
    Main,
}

/// See the module docs.
pub struct ServerOffer {
    provided: ProvidedInstance,
    key: InstanceKey,
    phase: OfferPhase,
    network_up: bool,
    offered: bool,
}

impl ServerOffer {
    pub fn new(provided: ProvidedInstance) -> Self {
        let key = provided.instance_key();
        Self { provided, key, phase: OfferPhase::Down, network_up: false, offered: false }
    }

    pub fn key(&self) -> InstanceKey {
        self.key
    }

    pub fn phase(&self) -> OfferPhase {
        self.phase
    }

    pub fn is_offered(&self) -> bool {
        self.offered
    }

    /// The OfferService entry announced for this instance.
    pub fn offer_entry(&self, machine: &MachineConfig) -> OfferEntry {
        OfferEntry {
            id: ServiceInstanceId::new(
                self.provided.service,
                self.provided.major,
                self.provided.minor,
                self.provided.instance,
            ),
            ttl: self.provided.sd.offer_ttl,
            endpoints: EntryEndpoints {
                udp: self
                    .provided
                    .udp_port
                    .map(|port| SocketAddrV4::new(machine.unicast_address, port)),
                tcp: self
                    .provided
                    .tcp_port
                    .map(|port| SocketAddrV4::new(machine.unicast_address, port)),
            },
        }
    }

    // — inputs —

    pub fn on_offer_requested(&mut self, ctx: &mut SdCtx<'_>) {
        self.offered = true;
        self.try_start(ctx);
    }

    /// Withdraw the announcement: immediate StopOffer, everything else
    /// unscheduled.
    pub fn on_stop_offer(
        &mut self,
        machine: &MachineConfig,
        sd: &mut SdScheduler,
        ctx: &mut SdCtx<'_>,
    ) {
        let was_announcing = self.phase != OfferPhase::Down;
        self.offered = false;
        self.enter_down(sd, ctx);
        if was_announcing {
            let stop = OfferEntry { ttl: Ttl::ZERO, ..self.offer_entry(machine) };
            sd.schedule_stop_offer(stop, ctx);
        }
    }

    pub fn on_network_up(&mut self, ctx: &mut SdCtx<'_>) {
        self.network_up = true;
        self.try_start(ctx);
    }

    /// Network loss silently stops announcing; no StopOffer can be sent.
    pub fn on_network_down(&mut self, sd: &mut SdScheduler, ctx: &mut SdCtx<'_>) {
        self.network_up = false;
        self.enter_down(sd, ctx);
    }

    /// The initial-wait timer fired: first offer goes out, the repetition
    /// run begins.
    pub fn on_phase_timer(
        &mut self,
        machine: &MachineConfig,
        sd: &mut SdScheduler,
        ctx: &mut SdCtx<'_>,
    ) {
        if self.phase != OfferPhase::InitialWait {
            return;
        }
        let entry = self.offer_entry(machine);
        sd.schedule_offer_multicast_now(entry, ctx);
        self.phase = OfferPhase::Repetition;
        let post = sd.start_offer_repetition(
            entry,
            std::time::Duration::from_millis(self.provided.sd.repetitions_base_delay_ms),
            self.provided.sd.repetitions_max,
            ctx,
        );
        if let Some(PostSendAction::EnterMainPhase(_)) = post {
            self.enter_main(machine, sd, ctx);
        }
    }

    /// The repetition run finished (post-send action).
    pub fn on_enter_main_phase(
        &mut self,
        machine: &MachineConfig,
        sd: &mut SdScheduler,
        ctx: &mut SdCtx<'_>,
    ) {
        if self.phase == OfferPhase::Repetition {
            self.enter_main(machine, sd, ctx);
        }
    }

    /// A FindService for this instance arrived; in main phase it is
    /// answered with a jittered unicast offer.
    pub fn on_find_received(
        &mut self,
        machine: &MachineConfig,
        from: SocketAddr,
        sd: &mut SdScheduler,
        ctx: &mut SdCtx<'_>,
    ) {
        if self.phase != OfferPhase::Main {
            return;
        }
        debug!(key = %self.key, %from, "answering find with unicast offer");
        let entry = self.offer_entry(machine);
        sd.schedule_offer(from, entry, self.provided.sd.request_response_window(), ctx);
    }

    fn try_start(&mut self, ctx: &mut SdCtx<'_>) {
        if self.phase == OfferPhase::Down && self.network_up && self.offered {
            self.phase = OfferPhase::InitialWait;
            let delay = ctx.jitter.delay_in(self.provided.sd.initial_delay_window());
            ctx.timers.set_timer(TimerKey::ServerPhase(self.key), delay, ctx.now);
        }
    }

    fn enter_main(
        &mut self,
        machine: &MachineConfig,
        sd: &mut SdScheduler,
        ctx: &mut SdCtx<'_>,
    ) {
        self.phase = OfferPhase::Main;
        sd.schedule_cyclic_offer(
            self.offer_entry(machine),
            self.provided.sd.cyclic_offer_delay(),
            ctx,
        );
    }

    fn enter_down(&mut self, sd: &mut SdScheduler, ctx: &mut SdCtx<'_>) {
        ctx.timers.cancel_timer(&TimerKey::ServerPhase(self.key));
        sd.unschedule_offer(self.key, ctx);
        self.phase = OfferPhase::Down;
    }
}

#[cfg(test)]
#[path = "server_offer_tests.rs"]
mod tests;
