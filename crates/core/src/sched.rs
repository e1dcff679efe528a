// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Deadline scheduler for the runtime loop.
//!
//! A plain deadline map: the loop asks for [`Scheduler::next_deadline`],
//! sleeps until it, then collects [`Scheduler::fired_timers`]. Insertion
//! order breaks ties between equal deadlines so timers fire in the order
//! they were armed.

use std::collections::{BTreeMap, HashMap};
use std::time::{Duration, Instant};

use crate::timer::TimerKey;

/// Keyed single-shot deadlines.
///
/// Periodic behavior is built by the owner re-arming the key from its own
/// fire handler.
#[derive(Default)]
pub struct Scheduler {
    queue: BTreeMap<(Instant, u64), TimerKey>,
    active: HashMap<TimerKey, (Instant, u64)>,
    next_seq: u64,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm `key` to fire `delay` after `now`, replacing any previous deadline.
    pub fn set_timer(&mut self, key: TimerKey, delay: Duration, now: Instant) {
        self.set_deadline(key, now + delay);
    }

    /// Arm `key` to fire at `at`, replacing any previous deadline.
    pub fn set_deadline(&mut self, key: TimerKey, at: Instant) {
        self.cancel_timer(&key);
        let seq = self.next_seq;
        self.next_seq += 1;
        self.queue.insert((at, seq), key);
        self.active.insert(key, (at, seq));
    }

    /// Disarm `key`. No-op when the key is not armed.
    pub fn cancel_timer(&mut self, key: &TimerKey) {
        if let Some(slot) = self.active.remove(key) {
            self.queue.remove(&slot);
        }
    }

    /// Collect every timer whose deadline has been reached, in arm order
    /// within equal deadlines.
    pub fn fired_timers(&mut self, now: Instant) -> Vec<TimerKey> {
        let mut fired = Vec::new();
        while let Some((&(at, seq), &key)) = self.queue.iter().next() {
            if at > now {
                break;
            }
            self.queue.remove(&(at, seq));
            self.active.remove(&key);
            fired.push(key);
        }
        fired
    }

    /// Earliest armed deadline, if any.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.queue.keys().next().map(|&(at, _)| at)
    }

    /// Deadline currently armed for `key`.
    pub fn deadline_of(&self, key: &TimerKey) -> Option<Instant> {
        self.active.get(key).map(|&(at, _)| at)
    }

    pub fn has_timers(&self) -> bool {
        !self.queue.is_empty()
    }
}

#[cfg(test)]
#[path = "sched_tests.rs"]
mod tests;
