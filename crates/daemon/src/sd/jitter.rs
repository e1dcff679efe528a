// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Randomized delay selection for SD timing windows.
//!
//! Every jittered delay in the daemon flows through this seam so tests can
//! pin the choice and assert exact deadlines.

use std::time::Duration;

use rand::Rng;

/// Picks a delay inside an inclusive `[min, max]` window.
pub trait JitterSource: Send + 'static {
    fn delay_in(&mut self, window: (Duration, Duration)) -> Duration;
}

/// Uniformly random delays from the thread RNG.
#[derive(Debug, Default)]
pub struct UniformJitter;

impl JitterSource for UniformJitter {
    fn delay_in(&mut self, (min, max): (Duration, Duration)) -> Duration {
        if max <= min {
            return min;
        }
        rand::thread_rng().gen_range(min..=max)
    }
}

/// Deterministic jitter for tests: always the window minimum.
#[cfg(any(test, feature = "test-support"))]
#[derive(Debug, Default)]
pub struct MinJitter;

#[cfg(any(test, feature = "test-support"))]
impl JitterSource for MinJitter {
    fn delay_in(&mut self, (min, _max): (Duration, Duration)) -> Duration {
        min
    }
}
