// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Validation gate for SOME/IP messages entering the daemon from a local
//! application.
//!
//! Three checks run in a fixed order — header well-formedness, then
//! configuration lookup, then IAM — and the first failure wins. The
//! receive router translates the result into a SOME/IP return code when a
//! failed request needs an error response; no other component sees return
//! codes.

use std::sync::Arc;

use thiserror::Error;

use sipd_core::config::Config;
use sipd_core::{Credentials, InstanceId, MajorVersion, MinorVersion, ServiceInstanceId};
use sipd_wire::{SomeIpHeader, SomeIpReturnCode, SOMEIP_PROTOCOL_VERSION};

use crate::iam::IamPolicy;

/// Rejection reasons for a locally received SOME/IP or PDU message.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ValidationError {
    #[error("wrong protocol version")]
    WrongProtocolVersion,

    #[error("wrong message type")]
    WrongMessageType,

    #[error("unknown method")]
    UnknownMethod,

    #[error("wrong interface version")]
    WrongInterfaceVersion,

    #[error("unknown service")]
    UnknownService,

    #[error("denied by access policy")]
    SecurityDenied,

    #[error("transmission on remote connection failed")]
    ConnectionTransmissionFailed,

    #[error("remote connection not available")]
    ConnectionNotAvailable,

    #[error("service not offered")]
    ServiceNotOffered,
}

impl From<ValidationError> for SomeIpReturnCode {
    fn from(err: ValidationError) -> SomeIpReturnCode {
        match err {
            ValidationError::WrongProtocolVersion => SomeIpReturnCode::WrongProtocolVersion,
            ValidationError::WrongMessageType => SomeIpReturnCode::WrongMessageType,
            ValidationError::UnknownMethod => SomeIpReturnCode::UnknownMethod,
            ValidationError::WrongInterfaceVersion => SomeIpReturnCode::WrongInterfaceVersion,
            ValidationError::UnknownService => SomeIpReturnCode::UnknownService,
            ValidationError::SecurityDenied => SomeIpReturnCode::NotOk,
            ValidationError::ConnectionTransmissionFailed => SomeIpReturnCode::NotReachable,
            ValidationError::ConnectionNotAvailable => SomeIpReturnCode::NotReachable,
            ValidationError::ServiceNotOffered => SomeIpReturnCode::NotReady,
        }
    }
}

/// Accept-or-reject gate applied to every local routing message.
pub struct PacketValidator {
    config: Arc<Config>,
    iam: Arc<dyn IamPolicy>,
}

impl PacketValidator {
    pub fn new(config: Arc<Config>, iam: Arc<dyn IamPolicy>) -> Self {
        Self { config, iam }
    }

    /// Run the three checks in order; the first failure short-circuits.
    pub fn validate(
        &self,
        credentials: Credentials,
        header: &SomeIpHeader,
        instance: InstanceId,
    ) -> Result<(), ValidationError> {
        self.check_header(header)?;
        self.check_config(header)?;
        self.check_iam(credentials, header, instance)
    }

    fn check_header(&self, header: &SomeIpHeader) -> Result<(), ValidationError> {
        if header.protocol_version != SOMEIP_PROTOCOL_VERSION {
            return Err(ValidationError::WrongProtocolVersion);
        }
        if header.typed_message_type().is_err() {
            return Err(ValidationError::WrongMessageType);
        }
        Ok(())
    }

    fn check_config(&self, header: &SomeIpHeader) -> Result<(), ValidationError> {
        let known_service =
            self.config.services.iter().any(|s| s.service == header.service);
        if !known_service {
            return Err(ValidationError::UnknownService);
        }
        let service = self
            .config
            .service(header.service, MajorVersion(header.interface_version))
            .ok_or(ValidationError::WrongInterfaceVersion)?;

        // Events occupy the method-id space with the high bit set.
        let id = header.method.get();
        let known = if id & 0x8000 != 0 {
            service.event(sipd_core::EventId(id)).is_some()
        } else {
            service.has_method(header.method)
        };
        if !known {
            return Err(ValidationError::UnknownMethod);
        }
        Ok(())
    }

    fn check_iam(
        &self,
        credentials: Credentials,
        header: &SomeIpHeader,
        instance: InstanceId,
    ) -> Result<(), ValidationError> {
        let id = ServiceInstanceId::new(
            header.service,
            MajorVersion(header.interface_version),
            MinorVersion(0),
            instance,
        );
        if !self.iam.allow_message(credentials, id, header.method.get()) {
            return Err(ValidationError::SecurityDenied);
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "validator_tests.rs"]
mod tests;
