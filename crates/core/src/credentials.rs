// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Peer process identity.

use serde::{Deserialize, Serialize};

/// Credentials of a connected application process, as reported by the
/// operating system for its IPC socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Credentials {
    pub uid: u32,
    pub gid: u32,
}

impl Credentials {
    /// Placeholder identity used when IAM is disabled.
    pub const UNCHECKED: Credentials = Credentials { uid: u32::MAX, gid: u32::MAX };
}

impl std::fmt::Display for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "uid={} gid={}", self.uid, self.gid)
    }
}
