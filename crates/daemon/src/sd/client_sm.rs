// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Find-service phase machine of an SD client.
//!
//! Pure state logic: inputs are condition changes and timer fires, outputs
//! are actions for the owner to execute (arm/cancel the phase timer, send
//! a FindService). The owner holds the timers and the SD scheduler; this
//! type holds only the phase and the three conditions that drive it.

/// Find-service lifecycle phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FindPhase {
    /// Not searching: network down, service not requested, or offer held
    /// while nothing is requested.
    Down,
    /// Jittered delay before the first FindService.
    InitialWait,
    /// Exponential-backoff FindService repetitions; the payload is the
    /// current step `k`.
    Repetition(u32),
    /// Searching finished: offer received or repetitions exhausted.
    Main,
    /// Shut down, terminal.
    Stopped,
}

/// Actions the owner executes after feeding an input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SmAction {
    /// Arm the phase timer with the jittered initial-wait window.
    ArmInitialDelay,
    /// Arm the phase timer with `base × 2^k` for repetition step `k`.
    ArmRepetitionDelay(u32),
    CancelPhaseTimer,
    SendFind,
}

/// See the module docs.
#[derive(Debug)]
pub struct ClientStateMachine {
    phase: FindPhase,
    network_up: bool,
    requested: bool,
    available: bool,
    repetitions_max: u32,
}

impl ClientStateMachine {
    pub fn new(repetitions_max: u32) -> Self {
        Self {
            phase: FindPhase::Down,
            network_up: false,
            requested: false,
            available: false,
            repetitions_max,
        }
    }

    pub fn phase(&self) -> FindPhase {
        self.phase
    }

    pub fn is_searching(&self) -> bool {
        matches!(self.phase, FindPhase::InitialWait | FindPhase::Repetition(_))
    }

    pub fn on_network_up(&mut self) -> Vec<SmAction> {
        self.network_up = true;
        self.try_start_search()
    }

    pub fn on_network_down(&mut self) -> Vec<SmAction> {
        self.network_up = false;
        self.available = false;
        self.enter_down()
    }

    pub fn on_service_requested(&mut self) -> Vec<SmAction> {
        self.requested = true;
        self.try_start_search()
    }

    pub fn on_service_released(&mut self) -> Vec<SmAction> {
        self.requested = false;
        self.enter_down()
    }

    /// An acceptable offer became active.
    pub fn on_offer_service(&mut self) -> Vec<SmAction> {
        self.available = true;
        match self.phase {
            FindPhase::InitialWait | FindPhase::Repetition(_) => {
                self.phase = FindPhase::Main;
                vec![SmAction::CancelPhaseTimer]
            }
            _ => Vec::new(),
        }
    }

    /// The active offer went away (TTL expiry, stop offer, peer reboot).
    pub fn on_offer_gone(&mut self) -> Vec<SmAction> {
        self.available = false;
        if self.phase == FindPhase::Main {
            if self.network_up && self.requested {
                self.phase = FindPhase::InitialWait;
                return vec![SmAction::ArmInitialDelay];
            }
            self.phase = FindPhase::Down;
        }
        Vec::new()
    }

    /// The phase timer fired.
    pub fn on_timeout(&mut self) -> Vec<SmAction> {
        match self.phase {
            FindPhase::InitialWait => {
                if self.repetitions_max == 0 {
                    self.phase = FindPhase::Main;
                    vec![SmAction::SendFind]
                } else {
                    self.phase = FindPhase::Repetition(0);
                    vec![SmAction::SendFind, SmAction::ArmRepetitionDelay(0)]
                }
            }
            FindPhase::Repetition(step) => {
                let next = step + 1;
                if next >= self.repetitions_max {
                    self.phase = FindPhase::Main;
                    vec![SmAction::SendFind]
                } else {
                    self.phase = FindPhase::Repetition(next);
                    vec![SmAction::SendFind, SmAction::ArmRepetitionDelay(next)]
                }
            }
            // Stale timer after a phase change; nothing to do.
            _ => Vec::new(),
        }
    }

    /// Terminal shutdown.
    pub fn stop(&mut self) -> Vec<SmAction> {
        let cancel = self.is_searching();
        self.phase = FindPhase::Stopped;
        if cancel {
            vec![SmAction::CancelPhaseTimer]
        } else {
            Vec::new()
        }
    }

    fn try_start_search(&mut self) -> Vec<SmAction> {
        if self.phase == FindPhase::Down
            && self.network_up
            && self.requested
            && !self.available
        {
            self.phase = FindPhase::InitialWait;
            return vec![SmAction::ArmInitialDelay];
        }
        // Requesting while an acceptable offer is already held needs no
        // search; the owner serves it from the active offer.
        if self.phase == FindPhase::Down && self.network_up && self.requested && self.available
        {
            self.phase = FindPhase::Main;
        }
        Vec::new()
    }

    fn enter_down(&mut self) -> Vec<SmAction> {
        if self.phase == FindPhase::Stopped {
            return Vec::new();
        }
        let cancel = self.is_searching();
        self.phase = FindPhase::Down;
        if cancel {
            vec![SmAction::CancelPhaseTimer]
        } else {
            Vec::new()
        }
    }
}

#[cfg(test)]
#[path = "client_sm_tests.rs"]
mod tests;
