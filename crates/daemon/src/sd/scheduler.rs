// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Outgoing SD entry scheduler.
//!
//! Four scheduling families share this component: jittered one-shots
//! (FindService, SubscribeEventgroup, Ack), immediates (StopOffer,
//! StopSubscribe, Nack), cyclic multicast offers, and the exponential
//! repetition run of a freshly offered instance.
//!
//! Scheduling is idempotent per `(entry key, target)`: a second schedule
//! replaces the first. Entries that become due in the same tick for the
//! same target are batched into one SD message in schedule order.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use sipd_core::{EventgroupId, InstanceKey, Scheduler, SdTarget, TimerKey};
use tracing::trace;

use crate::sd::entries::{AckEntry, FindEntry, OfferEntry, SubscribeEntry};
use crate::sd::jitter::JitterSource;

/// Identity of a scheduled entry for replacement purposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryKey {
    Find(InstanceKey),
    Offer(InstanceKey),
    Subscribe(InstanceKey, EventgroupId),
    StopSubscribe(InstanceKey, EventgroupId),
    Ack(InstanceKey, EventgroupId, u8),
    Nack(InstanceKey, EventgroupId, u8),
}

/// A sendable entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SdJob {
    Find(FindEntry),
    Offer(OfferEntry),
    Subscribe(SubscribeEntry),
    Ack(AckEntry),
}

/// Work the runtime performs after an entry actually left the daemon.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PostSendAction {
    /// Final repetition offer went out; the server machine enters main
    /// phase.
    EnterMainPhase(InstanceKey),
    /// An Ack was transmitted; deliver initial field values to the new
    /// subscriber.
    SubscribeAcked { key: InstanceKey, eventgroup: EventgroupId, subscriber: SocketAddr },
}

/// One composed transmission toward one target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transmission {
    pub target: SdTarget,
    pub jobs: Vec<SdJob>,
}

/// Timing context threaded into every scheduling call.
pub struct SdCtx<'a> {
    pub now: Instant,
    pub timers: &'a mut Scheduler,
    pub jitter: &'a mut dyn JitterSource,
}

#[derive(Debug)]
struct Pending {
    job: SdJob,
    due: Instant,
    seq: u64,
    post: Option<PostSendAction>,
}

#[derive(Debug)]
struct RepetitionRun {
    entry: OfferEntry,
    base: Duration,
    max: u32,
    step: u32,
}

/// See the module docs.
#[derive(Default)]
pub struct SdScheduler {
    pending: HashMap<(EntryKey, SdTarget), Pending>,
    cyclic: HashMap<InstanceKey, (OfferEntry, Duration)>,
    repetition: HashMap<InstanceKey, RepetitionRun>,
    next_seq: u64,
}

impl SdScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    // — one-shot family (jittered window) —

    /// Schedule a FindService toward the multicast group.
    pub fn schedule_find(
        &mut self,
        entry: FindEntry,
        window: (Duration, Duration),
        ctx: &mut SdCtx<'_>,
    ) {
        let key = EntryKey::Find(InstanceKey::new(entry.service, entry.major, entry.instance));
        let delay = ctx.jitter.delay_in(window);
        self.insert(key, SdTarget::Multicast, SdJob::Find(entry), delay, None, ctx);
    }

    /// Schedule a unicast offer answering a FindService.
    pub fn schedule_offer(
        &mut self,
        to: SocketAddr,
        entry: OfferEntry,
        window: (Duration, Duration),
        ctx: &mut SdCtx<'_>,
    ) {
        let delay = ctx.jitter.delay_in(window);
        self.insert(
            EntryKey::Offer(entry.key()),
            SdTarget::Unicast(to),
            SdJob::Offer(entry),
            delay,
            None,
            ctx,
        );
    }

    /// Schedule a SubscribeEventgroup toward the offering peer.
    pub fn schedule_subscribe(
        &mut self,
        to: SocketAddr,
        entry: SubscribeEntry,
        window: (Duration, Duration),
        ctx: &mut SdCtx<'_>,
    ) {
        let delay = ctx.jitter.delay_in(window);
        self.insert(
            EntryKey::Subscribe(entry.key, entry.eventgroup),
            SdTarget::Unicast(to),
            SdJob::Subscribe(entry),
            delay,
            None,
            ctx,
        );
    }

    /// Schedule a SubscribeEventgroupAck.
    pub fn schedule_ack(
        &mut self,
        to: SocketAddr,
        entry: AckEntry,
        window: (Duration, Duration),
        post: Option<PostSendAction>,
        ctx: &mut SdCtx<'_>,
    ) {
        let delay = ctx.jitter.delay_in(window);
        self.insert(
            EntryKey::Ack(entry.key, entry.eventgroup, entry.counter),
            SdTarget::Unicast(to),
            SdJob::Ack(entry),
            delay,
            post,
            ctx,
        );
    }

    /// Send an offer to the multicast group on the next tick (the first
    /// announcement after a server's initial wait).
    pub fn schedule_offer_multicast_now(&mut self, entry: OfferEntry, ctx: &mut SdCtx<'_>) {
        self.insert(
            EntryKey::Offer(entry.key()),
            SdTarget::Multicast,
            SdJob::Offer(entry),
            Duration::ZERO,
            None,
            ctx,
        );
    }

    // — immediate family —

    /// Send a StopOffer on the next tick and drop every other schedule of
    /// this entry.
    pub fn schedule_stop_offer(&mut self, entry: OfferEntry, ctx: &mut SdCtx<'_>) {
        let key = entry.key();
        self.unschedule_offer(key, ctx);
        self.insert(
            EntryKey::Offer(key),
            SdTarget::Multicast,
            SdJob::Offer(entry),
            Duration::ZERO,
            None,
            ctx,
        );
    }

    /// Send a StopSubscribe on the next tick; a pending Subscribe for the
    /// same eventgroup is dropped rather than sent stale.
    pub fn schedule_stop_subscribe(
        &mut self,
        to: SocketAddr,
        entry: SubscribeEntry,
        ctx: &mut SdCtx<'_>,
    ) {
        self.remove_pending(
            EntryKey::Subscribe(entry.key, entry.eventgroup),
            SdTarget::Unicast(to),
            ctx,
        );
        self.insert(
            EntryKey::StopSubscribe(entry.key, entry.eventgroup),
            SdTarget::Unicast(to),
            SdJob::Subscribe(entry),
            Duration::ZERO,
            None,
            ctx,
        );
    }

    /// Send a SubscribeEventgroupNack on the next tick.
    pub fn schedule_nack(&mut self, to: SocketAddr, entry: AckEntry, ctx: &mut SdCtx<'_>) {
        self.insert(
            EntryKey::Nack(entry.key, entry.eventgroup, entry.counter),
            SdTarget::Unicast(to),
            SdJob::Ack(entry),
            Duration::ZERO,
            None,
            ctx,
        );
    }

    // — cyclic family —

    /// Announce `entry` every `period` until unscheduled. Replaces any
    /// previous cyclic schedule for the same entry.
    pub fn schedule_cyclic_offer(
        &mut self,
        entry: OfferEntry,
        period: Duration,
        ctx: &mut SdCtx<'_>,
    ) {
        trace!(key = %entry.key(), ?period, "cyclic offer armed");
        self.cyclic.insert(entry.key(), (entry, period));
        ctx.timers.set_timer(TimerKey::CyclicOffer(entry.key()), period, ctx.now);
    }

    // — repetition family —

    /// Run the exponential repetition sequence for a fresh offer: the
    /// entry is sent after `base × 2^k` for `k = 0..max`. The post action
    /// is reported after the final transmission. With `max == 0` there is
    /// nothing to send and the action is returned immediately.
    pub fn start_offer_repetition(
        &mut self,
        entry: OfferEntry,
        base: Duration,
        max: u32,
        ctx: &mut SdCtx<'_>,
    ) -> Option<PostSendAction> {
        let key = entry.key();
        if max == 0 {
            return Some(PostSendAction::EnterMainPhase(key));
        }
        self.repetition.insert(key, RepetitionRun { entry, base, max, step: 0 });
        ctx.timers.set_timer(TimerKey::OfferRepetition(key), base, ctx.now);
        None
    }

    /// Cancel every schedule of the given offer entry: pending unicast and
    /// multicast one-shots, the cyclic announcement, and a running
    /// repetition sequence.
    pub fn unschedule_offer(&mut self, key: InstanceKey, ctx: &mut SdCtx<'_>) {
        let stale: Vec<(EntryKey, SdTarget)> = self
            .pending
            .keys()
            .filter(|(entry_key, _)| *entry_key == EntryKey::Offer(key))
            .copied()
            .collect();
        for (entry_key, target) in stale {
            self.remove_pending(entry_key, target, ctx);
        }
        if self.cyclic.remove(&key).is_some() {
            ctx.timers.cancel_timer(&TimerKey::CyclicOffer(key));
        }
        if self.repetition.remove(&key).is_some() {
            ctx.timers.cancel_timer(&TimerKey::OfferRepetition(key));
        }
    }

    /// Drop a pending one-shot find for the given instance (service
    /// released before the find fired).
    pub fn unschedule_find(&mut self, key: InstanceKey, ctx: &mut SdCtx<'_>) {
        self.remove_pending(EntryKey::Find(key), SdTarget::Multicast, ctx);
    }

    /// Drop a pending subscribe without sending anything.
    pub fn unschedule_subscribe(
        &mut self,
        to: SocketAddr,
        key: InstanceKey,
        eventgroup: EventgroupId,
        ctx: &mut SdCtx<'_>,
    ) {
        self.remove_pending(EntryKey::Subscribe(key, eventgroup), SdTarget::Unicast(to), ctx);
    }

    // — timer dispatch —

    /// Handle a fired timer owned by this scheduler. Returns the
    /// transmissions to put on the wire (in schedule order per target) and
    /// any post-send actions. Timers not owned here yield nothing.
    pub fn on_timer(
        &mut self,
        timer: TimerKey,
        ctx: &mut SdCtx<'_>,
    ) -> (Vec<Transmission>, Vec<PostSendAction>) {
        match timer {
            TimerKey::SdFlush(target) => self.flush(target, ctx),
            TimerKey::CyclicOffer(key) => (self.cyclic_fire(key, ctx), Vec::new()),
            TimerKey::OfferRepetition(key) => self.repetition_fire(key, ctx),
            _ => (Vec::new(), Vec::new()),
        }
    }

    /// Number of pending one-shot entries (tests and diagnostics).
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    fn insert(
        &mut self,
        key: EntryKey,
        target: SdTarget,
        job: SdJob,
        delay: Duration,
        post: Option<PostSendAction>,
        ctx: &mut SdCtx<'_>,
    ) {
        let seq = self.next_seq;
        self.next_seq += 1;
        let due = ctx.now + delay;
        trace!(?key, %target, ?delay, "sd entry scheduled");
        self.pending.insert((key, target), Pending { job, due, seq, post });
        self.rearm_flush(target, ctx);
    }

    fn remove_pending(&mut self, key: EntryKey, target: SdTarget, ctx: &mut SdCtx<'_>) {
        if self.pending.remove(&(key, target)).is_some() {
            self.rearm_flush(target, ctx);
        }
    }

    /// Keep the flush timer for `target` armed at the earliest pending due
    /// time, or cancelled when nothing is pending.
    fn rearm_flush(&mut self, target: SdTarget, ctx: &mut SdCtx<'_>) {
        let earliest = self
            .pending
            .iter()
            .filter(|((_, t), _)| *t == target)
            .map(|(_, p)| p.due)
            .min();
        match earliest {
            Some(due) => ctx.timers.set_deadline(TimerKey::SdFlush(target), due),
            None => ctx.timers.cancel_timer(&TimerKey::SdFlush(target)),
        }
    }

    fn flush(
        &mut self,
        target: SdTarget,
        ctx: &mut SdCtx<'_>,
    ) -> (Vec<Transmission>, Vec<PostSendAction>) {
        let mut due: Vec<(EntryKey, Pending)> = Vec::new();
        let keys: Vec<(EntryKey, SdTarget)> = self
            .pending
            .iter()
            .filter(|((_, t), p)| *t == target && p.due <= ctx.now)
            .map(|(k, _)| *k)
            .collect();
        for k in keys {
            if let Some(pending) = self.pending.remove(&k) {
                due.push((k.0, pending));
            }
        }
        self.rearm_flush(target, ctx);

        if due.is_empty() {
            return (Vec::new(), Vec::new());
        }
        // One composed message per tick and target, in schedule order.
        due.sort_by_key(|(_, p)| p.seq);
        let mut posts = Vec::new();
        let jobs = due
            .into_iter()
            .map(|(_, p)| {
                if let Some(post) = p.post {
                    posts.push(post);
                }
                p.job
            })
            .collect();
        (vec![Transmission { target, jobs }], posts)
    }

    fn cyclic_fire(&mut self, key: InstanceKey, ctx: &mut SdCtx<'_>) -> Vec<Transmission> {
        let Some(&(entry, period)) = self.cyclic.get(&key) else {
            return Vec::new();
        };
        ctx.timers.set_timer(TimerKey::CyclicOffer(key), period, ctx.now);
        vec![Transmission { target: SdTarget::Multicast, jobs: vec![SdJob::Offer(entry)] }]
    }

    fn repetition_fire(
        &mut self,
        key: InstanceKey,
        ctx: &mut SdCtx<'_>,
    ) -> (Vec<Transmission>, Vec<PostSendAction>) {
        let Some(run) = self.repetition.get_mut(&key) else {
            return (Vec::new(), Vec::new());
        };
        let transmission =
            Transmission { target: SdTarget::Multicast, jobs: vec![SdJob::Offer(run.entry)] };
        run.step += 1;
        if run.step < run.max {
            let delay = run.base * (1u32 << run.step.min(31));
            ctx.timers.set_timer(TimerKey::OfferRepetition(key), delay, ctx.now);
            (vec![transmission], Vec::new())
        } else {
            self.repetition.remove(&key);
            (vec![transmission], vec![PostSendAction::EnterMainPhase(key)])
        }
    }
}

#[cfg(test)]
#[path = "scheduler_tests.rs"]
mod tests;
