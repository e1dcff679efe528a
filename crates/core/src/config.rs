// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Deployment configuration model.
//!
//! The launcher loads one JSON document describing the machine network
//! settings, the service interface catalog, and the provided/required
//! instances. The daemon treats the loaded [`Config`] as immutable for its
//! whole lifetime; there is no reload path.

use std::net::Ipv4Addr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ids::{
    EventId, EventgroupId, InstanceId, MajorVersion, MethodId, MinorVersion, ServiceId, Ttl,
};
use crate::instance::InstanceKey;
use crate::version::VersionPolicy;

/// Errors produced by [`Config::validate`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("required instance {0} references unknown service {1}")]
    UnknownRequiredService(InstanceId, ServiceId),

    #[error("provided instance {0} references unknown service {1}")]
    UnknownProvidedService(InstanceId, ServiceId),

    #[error("duplicate required instance {0}:{1}")]
    DuplicateRequiredInstance(ServiceId, InstanceId),

    #[error("duplicate provided instance {0}:{1}")]
    DuplicateProvidedInstance(ServiceId, InstanceId),

    #[error("provided instance {0}:{1} must not use the wildcard instance id")]
    WildcardProvidedInstance(ServiceId, InstanceId),

    #[error("instance {0}:{1} has an empty jitter window (min {2}ms > max {3}ms)")]
    EmptyJitterWindow(ServiceId, InstanceId, u64, u64),
}

/// Top-level deployment configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub machine: MachineConfig,
    pub services: Vec<ServiceInterface>,
    #[serde(default)]
    pub required: Vec<RequiredInstance>,
    #[serde(default)]
    pub provided: Vec<ProvidedInstance>,
    /// When false, peer credentials are not checked and every IAM query
    /// is answered with "granted".
    #[serde(default)]
    pub iam_enabled: bool,
}

/// Local machine network settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MachineConfig {
    pub unicast_address: Ipv4Addr,
    /// Prefix length of the local subnet; offered endpoints outside it are
    /// rejected.
    pub subnet_prefix_len: u8,
    pub sd_multicast_address: Ipv4Addr,
    pub sd_port: u16,
    /// Local port announced in SubscribeEventgroup entries for event
    /// delivery.
    #[serde(default = "default_user_udp_port")]
    pub user_udp_port: u16,
}

fn default_user_udp_port() -> u16 {
    30600
}

/// One service interface: its versions and its method/event catalog.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceInterface {
    pub service: ServiceId,
    pub major: MajorVersion,
    pub minor: MinorVersion,
    #[serde(default)]
    pub methods: Vec<MethodId>,
    #[serde(default)]
    pub events: Vec<EventConfig>,
}

/// One event (or field notifier) and the eventgroup that carries it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventConfig {
    pub event: EventId,
    pub eventgroup: EventgroupId,
    /// Field notifiers replay their latest value to new subscribers.
    #[serde(default)]
    pub field: bool,
}

/// A service instance this machine wants to consume.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequiredInstance {
    pub service: ServiceId,
    /// May be [`InstanceId::ALL`] to require every discoverable instance.
    pub instance: InstanceId,
    pub major: MajorVersion,
    pub minor: MinorVersion,
    pub version_policy: VersionPolicy,
    #[serde(default)]
    pub requires_udp: bool,
    #[serde(default)]
    pub requires_tcp: bool,
    #[serde(default)]
    pub eventgroups: Vec<EventgroupId>,
    pub sd: SdClientTimers,
}

/// A service instance this machine offers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvidedInstance {
    pub service: ServiceId,
    pub instance: InstanceId,
    pub major: MajorVersion,
    pub minor: MinorVersion,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub udp_port: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tcp_port: Option<u16>,
    pub sd: SdServerTimers,
}

/// SD timing block of a required instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SdClientTimers {
    pub initial_delay_min_ms: u64,
    pub initial_delay_max_ms: u64,
    pub repetitions_base_delay_ms: u64,
    pub repetitions_max: u32,
    pub find_ttl: Ttl,
    pub subscribe_ttl: Ttl,
}

/// SD timing block of a provided instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SdServerTimers {
    pub initial_delay_min_ms: u64,
    pub initial_delay_max_ms: u64,
    pub repetitions_base_delay_ms: u64,
    pub repetitions_max: u32,
    pub cyclic_offer_delay_ms: u64,
    pub offer_ttl: Ttl,
    /// Jitter window for offers answering a multicast FindService.
    pub request_response_delay_min_ms: u64,
    pub request_response_delay_max_ms: u64,
}

impl Config {
    /// Structural validation beyond what serde enforces.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut seen = std::collections::HashSet::new();
        for required in &self.required {
            if self.service(required.service, required.major).is_none() {
                return Err(ConfigError::UnknownRequiredService(
                    required.instance,
                    required.service,
                ));
            }
            if !seen.insert((required.service, required.instance)) {
                return Err(ConfigError::DuplicateRequiredInstance(
                    required.service,
                    required.instance,
                ));
            }
            if required.sd.initial_delay_min_ms > required.sd.initial_delay_max_ms {
                return Err(ConfigError::EmptyJitterWindow(
                    required.service,
                    required.instance,
                    required.sd.initial_delay_min_ms,
                    required.sd.initial_delay_max_ms,
                ));
            }
        }

        let mut seen = std::collections::HashSet::new();
        for provided in &self.provided {
            if provided.instance.is_all() {
                return Err(ConfigError::WildcardProvidedInstance(
                    provided.service,
                    provided.instance,
                ));
            }
            if self.service(provided.service, provided.major).is_none() {
                return Err(ConfigError::UnknownProvidedService(
                    provided.instance,
                    provided.service,
                ));
            }
            if !seen.insert((provided.service, provided.instance)) {
                return Err(ConfigError::DuplicateProvidedInstance(
                    provided.service,
                    provided.instance,
                ));
            }
        }
        Ok(())
    }

    /// Look up a service interface by id and major version.
    pub fn service(&self, service: ServiceId, major: MajorVersion) -> Option<&ServiceInterface> {
        self.services.iter().find(|s| s.service == service && s.major == major)
    }

    /// Look up the required-instance entry covering `(service, instance)`.
    ///
    /// A wildcard requirement covers every concrete instance of its service.
    pub fn required_covering(
        &self,
        service: ServiceId,
        instance: InstanceId,
    ) -> Option<&RequiredInstance> {
        self.required.iter().find(|r| {
            r.service == service && (r.instance == instance || r.instance.is_all())
        })
    }

    pub fn provided_instance(
        &self,
        service: ServiceId,
        instance: InstanceId,
    ) -> Option<&ProvidedInstance> {
        self.provided.iter().find(|p| p.service == service && p.instance == instance)
    }
}

impl ServiceInterface {
    pub fn has_method(&self, method: MethodId) -> bool {
        self.methods.contains(&method)
    }

    pub fn event(&self, event: EventId) -> Option<&EventConfig> {
        self.events.iter().find(|e| e.event == event)
    }

    /// The eventgroup that carries `event`, if the event is configured.
    pub fn eventgroup_of(&self, event: EventId) -> Option<EventgroupId> {
        self.event(event).map(|e| e.eventgroup)
    }
}

impl RequiredInstance {
    pub fn instance_key(&self) -> InstanceKey {
        InstanceKey::new(self.service, self.major, self.instance)
    }
}

impl ProvidedInstance {
    pub fn instance_key(&self) -> InstanceKey {
        InstanceKey::new(self.service, self.major, self.instance)
    }
}

impl SdClientTimers {
    pub fn initial_delay_window(&self) -> (Duration, Duration) {
        (
            Duration::from_millis(self.initial_delay_min_ms),
            Duration::from_millis(self.initial_delay_max_ms),
        )
    }

    /// Delay before repetition step `k`: `base × 2^k`.
    pub fn repetition_delay(&self, step: u32) -> Duration {
        let factor = 1u64 << step.min(31);
        Duration::from_millis(self.repetitions_base_delay_ms.saturating_mul(factor))
    }
}

impl SdServerTimers {
    pub fn initial_delay_window(&self) -> (Duration, Duration) {
        (
            Duration::from_millis(self.initial_delay_min_ms),
            Duration::from_millis(self.initial_delay_max_ms),
        )
    }

    pub fn repetition_delay(&self, step: u32) -> Duration {
        let factor = 1u64 << step.min(31);
        Duration::from_millis(self.repetitions_base_delay_ms.saturating_mul(factor))
    }

    pub fn cyclic_offer_delay(&self) -> Duration {
        Duration::from_millis(self.cyclic_offer_delay_ms)
    }

    pub fn request_response_window(&self) -> (Duration, Duration) {
        (
            Duration::from_millis(self.request_response_delay_min_ms),
            Duration::from_millis(self.request_response_delay_max_ms),
        )
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
