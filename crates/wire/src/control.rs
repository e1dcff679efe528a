// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Control command payloads and return codes.
//!
//! Every decode is size-bounded: short and overlong buffers are both
//! rejected, so a malformed command can never alias a well-formed one.

use sipd_core::{
    ClientId, EventId, InstanceId, MajorVersion, MinorVersion, ServiceId, ServiceInstanceId,
};

use crate::bytes::{ByteReader, ByteWriter, WireError};

/// Return code carried in control response specific headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum ControlReturnCode {
    Ok = 0,
    NotOk = 1,
    MalformedMessage = 2,
    UnknownMessageType = 3,
    UnsupportedVersion = 4,
    InvalidParam = 5,
    TimeOut = 6,
    Disconnected = 7,
    NotConnected = 8,
    LocalServerNotAvailable = 9,
    OfferServiceAccessDenied = 10,
    RequestServiceAccessDenied = 11,
    RequestServiceClientIdsOverflow = 12,
    RequestServiceRemoteServerNotFound = 13,
    RequestServiceRequiredServiceInstanceNotFound = 14,
}

impl ControlReturnCode {
    pub fn to_wire(self) -> u32 {
        self as u32
    }

    pub fn from_wire(raw: u32) -> Result<Self, WireError> {
        Ok(match raw {
            0 => Self::Ok,
            1 => Self::NotOk,
            2 => Self::MalformedMessage,
            3 => Self::UnknownMessageType,
            4 => Self::UnsupportedVersion,
            5 => Self::InvalidParam,
            6 => Self::TimeOut,
            7 => Self::Disconnected,
            8 => Self::NotConnected,
            9 => Self::LocalServerNotAvailable,
            10 => Self::OfferServiceAccessDenied,
            11 => Self::RequestServiceAccessDenied,
            12 => Self::RequestServiceClientIdsOverflow,
            13 => Self::RequestServiceRemoteServerNotFound,
            14 => Self::RequestServiceRequiredServiceInstanceNotFound,
            other => {
                return Err(WireError::InvalidValue {
                    context: "control return code",
                    value: u64::from(other),
                })
            }
        })
    }

    pub fn is_ok(self) -> bool {
        self == ControlReturnCode::Ok
    }
}

/// Service-instance quadruple carried by most control commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServiceInstancePayload {
    pub service: ServiceId,
    pub instance: InstanceId,
    pub major: MajorVersion,
    pub minor: MinorVersion,
}

impl ServiceInstancePayload {
    pub const WIRE_LEN: usize = 9;

    pub fn from_id(id: ServiceInstanceId) -> Self {
        Self { service: id.service, instance: id.instance, major: id.major, minor: id.minor }
    }

    pub fn id(&self) -> ServiceInstanceId {
        ServiceInstanceId::new(self.service, self.major, self.minor, self.instance)
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut w = ByteWriter::with_capacity(Self::WIRE_LEN);
        self.write(&mut w);
        w.into_vec()
    }

    pub fn write(&self, w: &mut ByteWriter) {
        w.u16_ne(self.service.get());
        w.u16_ne(self.instance.get());
        w.u8(self.major.get());
        w.u32_ne(self.minor.get());
    }

    pub fn decode(buf: &[u8]) -> Result<Self, WireError> {
        let mut r = ByteReader::new(buf);
        let payload = Self::read(&mut r)?;
        r.finish("service instance payload")?;
        Ok(payload)
    }

    fn read(r: &mut ByteReader<'_>) -> Result<Self, WireError> {
        Ok(Self {
            service: ServiceId(r.u16_ne()?),
            instance: InstanceId(r.u16_ne()?),
            major: MajorVersion(r.u8()?),
            minor: MinorVersion(r.u32_ne()?),
        })
    }
}

/// `ReleaseService` payload: the instance plus the client being released.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReleaseServicePayload {
    pub target: ServiceInstancePayload,
    pub client: ClientId,
}

impl ReleaseServicePayload {
    pub const WIRE_LEN: usize = ServiceInstancePayload::WIRE_LEN + 2;

    pub fn encode(&self) -> Vec<u8> {
        let mut w = ByteWriter::with_capacity(Self::WIRE_LEN);
        self.target.write(&mut w);
        w.u16_ne(self.client.get());
        w.into_vec()
    }

    pub fn decode(buf: &[u8]) -> Result<Self, WireError> {
        let mut r = ByteReader::new(buf);
        let target = ServiceInstancePayload::read(&mut r)?;
        let client = ClientId(r.u16_ne()?);
        r.finish("release service payload")?;
        Ok(Self { target, client })
    }
}

/// `SubscribeEvent` / `UnsubscribeEvent` payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscribeEventPayload {
    pub target: ServiceInstancePayload,
    pub event: EventId,
    pub client: ClientId,
}

impl SubscribeEventPayload {
    pub const WIRE_LEN: usize = ServiceInstancePayload::WIRE_LEN + 4;

    pub fn encode(&self) -> Vec<u8> {
        let mut w = ByteWriter::with_capacity(Self::WIRE_LEN);
        self.target.write(&mut w);
        w.u16_ne(self.event.get());
        w.u16_ne(self.client.get());
        w.into_vec()
    }

    pub fn decode(buf: &[u8]) -> Result<Self, WireError> {
        let mut r = ByteReader::new(buf);
        let target = ServiceInstancePayload::read(&mut r)?;
        let event = EventId(r.u16_ne()?);
        let client = ClientId(r.u16_ne()?);
        r.finish("subscribe event payload")?;
        Ok(Self { target, event, client })
    }
}

/// Positive `RequestService` response payload: the allocated client id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestServiceResponsePayload {
    pub client: ClientId,
}

impl RequestServiceResponsePayload {
    pub const WIRE_LEN: usize = 2;

    pub fn encode(&self) -> Vec<u8> {
        let mut w = ByteWriter::with_capacity(Self::WIRE_LEN);
        w.u16_ne(self.client.get());
        w.into_vec()
    }

    pub fn decode(buf: &[u8]) -> Result<Self, WireError> {
        let mut r = ByteReader::new(buf);
        let client = ClientId(r.u16_ne()?);
        r.finish("request service response payload")?;
        Ok(Self { client })
    }
}

#[cfg(test)]
#[path = "control_tests.rs"]
mod tests;
