// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Peer restart detection from SD session counters.
//!
//! Each SD sender keeps a session counter and a reboot flag per channel;
//! the flag stays set until the counter wraps for the first time. A
//! receiver therefore sees a restart as either the flag clearing 1→0 or
//! a flagged message whose session did not progress past the stored one.

use std::collections::HashMap;
use std::net::SocketAddr;

use sipd_core::SessionId;

#[derive(Debug, Clone, Copy)]
struct ChannelState {
    session: SessionId,
    reboot: bool,
}

/// Per-peer unicast/multicast counter pairs.
#[derive(Debug, Clone, Copy, Default)]
struct PeerState {
    unicast: Option<ChannelState>,
    multicast: Option<ChannelState>,
}

/// Tracks SD session counters per `(address, port)` peer.
#[derive(Debug, Default)]
pub struct RebootDetector {
    peers: HashMap<SocketAddr, PeerState>,
}

impl RebootDetector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one incoming SD message's counters.
    ///
    /// Returns true when the peer has rebooted since its last message on
    /// this channel. On detection the peer's stored state is cleared, so
    /// the current message is treated as the first observation of the new
    /// incarnation.
    pub fn observe(
        &mut self,
        from: SocketAddr,
        multicast: bool,
        session: SessionId,
        reboot_flag: bool,
    ) -> bool {
        let peer = self.peers.entry(from).or_default();
        let stored = if multicast { peer.multicast } else { peer.unicast };

        let rebooted = match stored {
            None => false,
            Some(stored) => {
                (stored.reboot && !reboot_flag) || (reboot_flag && session <= stored.session)
            }
        };

        if rebooted {
            *peer = PeerState::default();
        }
        let channel = if multicast { &mut peer.multicast } else { &mut peer.unicast };
        *channel = Some(ChannelState { session, reboot: reboot_flag });
        rebooted
    }

    pub fn tracked_peers(&self) -> usize {
        self.peers.len()
    }
}

#[cfg(test)]
#[path = "reboot_tests.rs"]
mod tests;
