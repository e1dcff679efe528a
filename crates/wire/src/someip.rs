// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! SOME/IP message header codec.
//!
//! The daemon routes SOME/IP payloads opaquely; only the 16-byte header is
//! decoded, validated, and (for synthesized error responses) rewritten.

use sipd_core::{ClientId, MethodId, ServiceId, SessionId};

use crate::bytes::{ByteReader, ByteWriter, WireError};

/// SOME/IP wire protocol version.
pub const SOMEIP_PROTOCOL_VERSION: u8 = 0x01;

/// Header length on the wire.
pub const SOMEIP_HEADER_LEN: usize = 16;

/// Value of the length field for an empty payload: request id through
/// return code.
pub const SOMEIP_LENGTH_BASE: u32 = 8;

/// SOME/IP message types the daemon routes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum SomeIpMessageType {
    Request = 0x00,
    RequestNoReturn = 0x01,
    Notification = 0x02,
    Response = 0x80,
    Error = 0x81,
}

impl SomeIpMessageType {
    pub fn from_wire(raw: u8) -> Result<Self, WireError> {
        Ok(match raw {
            0x00 => Self::Request,
            0x01 => Self::RequestNoReturn,
            0x02 => Self::Notification,
            0x80 => Self::Response,
            0x81 => Self::Error,
            other => {
                return Err(WireError::InvalidValue {
                    context: "someip message type",
                    value: u64::from(other),
                })
            }
        })
    }

    pub fn to_wire(self) -> u8 {
        self as u8
    }

    /// Requests expect a response routed back to the caller.
    pub fn expects_response(self) -> bool {
        self == Self::Request
    }
}

/// SOME/IP return codes used at the daemon boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SomeIpReturnCode {
    Ok = 0x00,
    NotOk = 0x01,
    UnknownService = 0x02,
    UnknownMethod = 0x03,
    NotReady = 0x04,
    NotReachable = 0x05,
    Timeout = 0x06,
    WrongProtocolVersion = 0x07,
    WrongInterfaceVersion = 0x08,
    MalformedMessage = 0x09,
    WrongMessageType = 0x0A,
}

impl SomeIpReturnCode {
    pub fn to_wire(self) -> u8 {
        self as u8
    }
}

/// The 16-byte SOME/IP header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SomeIpHeader {
    pub service: ServiceId,
    pub method: MethodId,
    /// Length of everything after the length field: 8 + payload length.
    pub length: u32,
    pub client: ClientId,
    pub session: SessionId,
    pub protocol_version: u8,
    pub interface_version: u8,
    pub message_type: u8,
    pub return_code: u8,
}

impl SomeIpHeader {
    /// Decode the header from the front of `buf`; the payload follows.
    pub fn decode(buf: &[u8]) -> Result<SomeIpHeader, WireError> {
        let mut r = ByteReader::new(buf);
        Ok(SomeIpHeader {
            service: ServiceId(r.u16_be()?),
            method: MethodId(r.u16_be()?),
            length: r.u32_be()?,
            client: ClientId(r.u16_be()?),
            session: SessionId(r.u16_be()?),
            protocol_version: r.u8()?,
            interface_version: r.u8()?,
            message_type: r.u8()?,
            return_code: r.u8()?,
        })
    }

    pub fn encode(&self, w: &mut ByteWriter) {
        w.u16_be(self.service.get());
        w.u16_be(self.method.get());
        w.u32_be(self.length);
        w.u16_be(self.client.get());
        w.u16_be(self.session.get());
        w.u8(self.protocol_version);
        w.u8(self.interface_version);
        w.u8(self.message_type);
        w.u8(self.return_code);
    }

    /// Typed view of the message-type byte.
    pub fn typed_message_type(&self) -> Result<SomeIpMessageType, WireError> {
        SomeIpMessageType::from_wire(self.message_type)
    }

    /// Expected payload length according to the length field.
    pub fn payload_len(&self) -> usize {
        (self.length.saturating_sub(SOMEIP_LENGTH_BASE)) as usize
    }

    /// Build the header of an error response to a failed request.
    ///
    /// Mirrors service/method/client/session so the caller can correlate;
    /// the length is set for an empty payload.
    pub fn to_error_response(&self, return_code: SomeIpReturnCode) -> SomeIpHeader {
        SomeIpHeader {
            length: SOMEIP_LENGTH_BASE,
            message_type: SomeIpMessageType::Error.to_wire(),
            return_code: return_code.to_wire(),
            ..*self
        }
    }
}

/// Encode a standalone header-only message (used for error responses).
pub fn encode_header_only(header: &SomeIpHeader) -> Vec<u8> {
    let mut w = ByteWriter::with_capacity(SOMEIP_HEADER_LEN);
    header.encode(&mut w);
    w.into_vec()
}

#[cfg(test)]
#[path = "someip_tests.rs"]
mod tests;
