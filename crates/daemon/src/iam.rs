// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Identity-and-access policy seam.
//!
//! The policy language itself lives outside the daemon; the core only asks
//! yes/no questions. When IAM is disabled in the configuration every
//! question is answered with "granted" and peer credentials are not read.

use sipd_core::{Credentials, EventgroupId, ServiceInstanceId};

/// Access decisions consulted by the packet validator, the command
/// controller, and the application acceptor.
pub trait IamPolicy: Send + Sync + 'static {
    /// May this process connect to the daemon at all?
    fn allow_connect(&self, credentials: Credentials) -> bool;

    /// May this process consume the given required instance?
    fn allow_request_service(&self, credentials: Credentials, id: ServiceInstanceId) -> bool;

    /// May this process provide the given instance?
    fn allow_offer_service(&self, credentials: Credentials, id: ServiceInstanceId) -> bool;

    /// May this process subscribe to the given eventgroup?
    fn allow_subscribe(
        &self,
        credentials: Credentials,
        id: ServiceInstanceId,
        eventgroup: EventgroupId,
    ) -> bool;

    /// May this process send a message addressed to `method_or_event`?
    fn allow_message(
        &self,
        credentials: Credentials,
        id: ServiceInstanceId,
        method_or_event: u16,
    ) -> bool;
}

/// Policy used when IAM is disabled: everything is granted.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

impl IamPolicy for AllowAll {
    fn allow_connect(&self, _credentials: Credentials) -> bool {
        true
    }

    fn allow_request_service(&self, _credentials: Credentials, _id: ServiceInstanceId) -> bool {
        true
    }

    fn allow_offer_service(&self, _credentials: Credentials, _id: ServiceInstanceId) -> bool {
        true
    }

    fn allow_subscribe(
        &self,
        _credentials: Credentials,
        _id: ServiceInstanceId,
        _eventgroup: EventgroupId,
    ) -> bool {
        true
    }

    fn allow_message(
        &self,
        _credentials: Credentials,
        _id: ServiceInstanceId,
        _method_or_event: u16,
    ) -> bool {
        true
    }
}

/// Deny-list policy for tests: everything is granted except the recorded
/// denials.
#[cfg(any(test, feature = "test-support"))]
#[derive(Debug, Default)]
pub struct StaticPolicy {
    denied_connects: Vec<Credentials>,
    denied_request_service: Vec<ServiceInstanceId>,
    denied_offer_service: Vec<ServiceInstanceId>,
    denied_subscribe: Vec<(ServiceInstanceId, EventgroupId)>,
    denied_messages: Vec<(ServiceInstanceId, u16)>,
}

#[cfg(any(test, feature = "test-support"))]
impl StaticPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn deny_connect(mut self, credentials: Credentials) -> Self {
        self.denied_connects.push(credentials);
        self
    }

    pub fn deny_request_service(mut self, id: ServiceInstanceId) -> Self {
        self.denied_request_service.push(id);
        self
    }

    pub fn deny_offer_service(mut self, id: ServiceInstanceId) -> Self {
        self.denied_offer_service.push(id);
        self
    }

    pub fn deny_subscribe(mut self, id: ServiceInstanceId, eventgroup: EventgroupId) -> Self {
        self.denied_subscribe.push((id, eventgroup));
        self
    }

    pub fn deny_message(mut self, id: ServiceInstanceId, method_or_event: u16) -> Self {
        self.denied_messages.push((id, method_or_event));
        self
    }
}

#[cfg(any(test, feature = "test-support"))]
impl IamPolicy for StaticPolicy {
    fn allow_connect(&self, credentials: Credentials) -> bool {
        !self.denied_connects.contains(&credentials)
    }

    fn allow_request_service(&self, _credentials: Credentials, id: ServiceInstanceId) -> bool {
        !self.denied_request_service.iter().any(|d| d.same_identity(&id))
    }

    fn allow_offer_service(&self, _credentials: Credentials, id: ServiceInstanceId) -> bool {
        !self.denied_offer_service.iter().any(|d| d.same_identity(&id))
    }

    fn allow_subscribe(
        &self,
        _credentials: Credentials,
        id: ServiceInstanceId,
        eventgroup: EventgroupId,
    ) -> bool {
        !self
            .denied_subscribe
            .iter()
            .any(|(d, eg)| d.same_identity(&id) && *eg == eventgroup)
    }

    fn allow_message(
        &self,
        _credentials: Credentials,
        id: ServiceInstanceId,
        method_or_event: u16,
    ) -> bool {
        !self
            .denied_messages
            .iter()
            .any(|(d, m)| d.same_identity(&id) && *m == method_or_event)
    }
}
