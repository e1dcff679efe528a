// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Service instance identity.
//!
//! A [`ServiceInstanceId`] is the full four-part identity of one deployed
//! service instance. Once communication is established the minor version is
//! only a compatibility criterion, so lookups use the dummy-minor form
//! returned by [`ServiceInstanceId::lookup_key`]. The three-part
//! [`InstanceKey`] (no minor at all) keys SD observer maps and timers.

use serde::{Deserialize, Serialize};

use crate::ids::{InstanceId, MajorVersion, MinorVersion, ServiceId};

/// Full identity of one service instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ServiceInstanceId {
    pub service: ServiceId,
    pub major: MajorVersion,
    pub minor: MinorVersion,
    pub instance: InstanceId,
}

impl ServiceInstanceId {
    pub fn new(
        service: ServiceId,
        major: MajorVersion,
        minor: MinorVersion,
        instance: InstanceId,
    ) -> Self {
        Self { service, major, minor, instance }
    }

    /// The dummy-minor-version form used as a map key after discovery.
    pub fn lookup_key(&self) -> ServiceInstanceId {
        ServiceInstanceId { minor: MinorVersion(0), ..*self }
    }

    /// The three-part key used by SD observer maps and timers.
    pub fn instance_key(&self) -> InstanceKey {
        InstanceKey { service: self.service, major: self.major, instance: self.instance }
    }

    /// Same instance modulo minor version.
    pub fn same_identity(&self, other: &ServiceInstanceId) -> bool {
        self.lookup_key() == other.lookup_key()
    }
}

impl std::fmt::Display for ServiceInstanceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}:{} v{}.{}",
            self.service, self.instance, self.major, self.minor
        )
    }
}

/// `(service, major, instance)` — the demultiplexing key for SD entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct InstanceKey {
    pub service: ServiceId,
    pub major: MajorVersion,
    pub instance: InstanceId,
}

impl InstanceKey {
    pub fn new(service: ServiceId, major: MajorVersion, instance: InstanceId) -> Self {
        Self { service, major, instance }
    }

    /// The same key with a concrete instance substituted for the wildcard.
    pub fn with_instance(self, instance: InstanceId) -> InstanceKey {
        InstanceKey { instance, ..self }
    }
}

impl std::fmt::Display for InstanceKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{} v{}", self.service, self.instance, self.major)
    }
}

#[cfg(test)]
#[path = "instance_tests.rs"]
mod tests;
