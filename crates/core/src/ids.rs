// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Fixed-width protocol identifiers.
//!
//! Every identifier on the SOME/IP wire is a fixed-width integer. Each gets
//! its own newtype so a `ClientId` can never be passed where an `EventId` is
//! expected; all serialize as their raw integer value.

crate::define_wire_id! {
    /// SOME/IP service interface identifier.
    pub struct ServiceId(u16);
}

crate::define_wire_id! {
    /// Identifier of one deployed instance of a service interface.
    pub struct InstanceId(u16);
}

crate::define_wire_id! {
    /// Method identifier within a service interface.
    pub struct MethodId(u16);
}

crate::define_wire_id! {
    /// Event identifier within a service interface.
    ///
    /// Events occupy the method-id space with the high bit set.
    pub struct EventId(u16);
}

crate::define_wire_id! {
    /// Eventgroup identifier used by SOME/IP-SD subscriptions.
    pub struct EventgroupId(u16);
}

crate::define_wire_id! {
    /// Client identifier allocated by the daemon per required instance.
    pub struct ClientId(u16);
}

crate::define_wire_id! {
    /// SOME/IP-SD session counter.
    pub struct SessionId(u16);
}

/// Major interface version (compatibility-breaking).
#[derive(
    Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
#[serde(transparent)]
pub struct MajorVersion(pub u8);

/// Minor interface version (compatible extension).
#[derive(
    Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
#[serde(transparent)]
pub struct MinorVersion(pub u32);

impl ServiceId {
    /// Wildcard matching any service (FindService only).
    pub const ALL: ServiceId = ServiceId(0xFFFF);
}

impl InstanceId {
    /// Wildcard matching any instance of a service.
    pub const ALL: InstanceId = InstanceId(0xFFFF);

    pub fn is_all(self) -> bool {
        self == Self::ALL
    }
}

impl MajorVersion {
    /// Wildcard matching any major version (FindService only).
    pub const ANY: MajorVersion = MajorVersion(0xFF);

    pub const fn get(self) -> u8 {
        self.0
    }
}

impl MinorVersion {
    /// Wildcard matching any minor version.
    pub const ANY: MinorVersion = MinorVersion(0xFFFF_FFFF);

    pub const fn get(self) -> u32 {
        self.0
    }

    pub fn is_any(self) -> bool {
        self == Self::ANY
    }
}

impl std::fmt::Display for MajorVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::fmt::Debug for MajorVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "MajorVersion({})", self.0)
    }
}

impl std::fmt::Display for MinorVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::fmt::Debug for MinorVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "MinorVersion({})", self.0)
    }
}

/// SOME/IP-SD lifetime field, in seconds. 24 bits on the wire.
#[derive(
    Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
#[serde(transparent)]
pub struct Ttl(pub u32);

impl Ttl {
    /// All-ones TTL: the entry never expires.
    pub const INFINITE: Ttl = Ttl(0x00FF_FFFF);
    /// Zero TTL: the entry revokes its subject (StopOffer, StopSubscribe, Nack).
    pub const ZERO: Ttl = Ttl(0);

    pub fn is_infinite(self) -> bool {
        self >= Self::INFINITE
    }

    pub fn is_zero(self) -> bool {
        self.0 == 0
    }

    /// Finite lifetime as a duration; `None` for the infinite TTL.
    pub fn lifetime(self) -> Option<std::time::Duration> {
        if self.is_infinite() {
            None
        } else {
            Some(std::time::Duration::from_secs(u64::from(self.0)))
        }
    }
}

impl std::fmt::Display for Ttl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_infinite() {
            f.write_str("infinite")
        } else {
            write!(f, "{}s", self.0)
        }
    }
}

impl std::fmt::Debug for Ttl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Ttl({self})")
    }
}

impl SessionId {
    /// Initial session value of a fresh SD channel. Session 0 is reserved.
    pub const INITIAL: SessionId = SessionId(1);

    /// Advance to the next session value, wrapping 0xFFFF back to 1.
    ///
    /// Returns the successor and whether a wrap occurred (the wrap clears
    /// the reboot flag on the sending channel).
    pub fn next(self) -> (SessionId, bool) {
        if self.0 == 0xFFFF {
            (SessionId(1), true)
        } else {
            (SessionId(self.0 + 1), false)
        }
    }
}

#[cfg(test)]
#[path = "ids_tests.rs"]
mod tests;
