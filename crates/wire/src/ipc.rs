// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! IPC protocol between the daemon and local applications.
//!
//! Wire format: 8-byte generic header (native endian), a message-type
//! specific header, then the body. The body is an embedded SOME/IP or PDU
//! message for routing types and a fixed-layout payload for control types.

use std::time::Duration;

use thiserror::Error;

use sipd_core::{ClientId, EventId, InstanceId, MajorVersion, MinorVersion, ServiceId};

use crate::bytes::{ByteReader, ByteWriter, WireError};

/// Version of the daemon↔application IPC protocol.
pub const IPC_PROTOCOL_VERSION: u8 = 1;

/// Generic header length on the wire.
pub const GENERIC_HEADER_LEN: usize = 8;

/// Maximum accepted body length (specific header + payload).
pub const MAX_BODY_LEN: usize = 16 * 1024 * 1024;

/// Minimum receive allocation; small bodies share this floor so the hot
/// path reuses one bucket size of the pool allocator.
pub const MIN_RX_ALLOCATION: usize = 64;

/// Offset added to a request's message type for its positive response.
const POSITIVE_RESPONSE_OFFSET: u8 = 0x40;
/// Offset added to a request's message type for its negative response.
const NEGATIVE_RESPONSE_OFFSET: u8 = 0x80;

/// Protocol errors on an IPC connection.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("codec error: {0}")]
    Codec(#[from] WireError),

    #[error("unsupported IPC protocol version {0}")]
    UnsupportedVersion(u8),

    #[error("unknown message type {0:#04x}")]
    UnknownMessageType(u8),

    #[error("message too large: {size} bytes (max {max})")]
    MessageTooLarge { size: usize, max: usize },

    #[error("connection closed")]
    ConnectionClosed,

    #[error("timeout")]
    Timeout,
}

/// Discriminates every message on an IPC connection.
///
/// Control requests occupy `0x01..=0x0A`; their response types are derived
/// by fixed offsets (`+0x40` positive, `+0x80` negative), so the pairing in
/// the command controller is arithmetic rather than a table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageType {
    // — control requests —
    RequestService = 0x01,
    ReleaseService = 0x02,
    RequestLocalServer = 0x03,
    ReleaseLocalServer = 0x04,
    OfferService = 0x05,
    StopOfferService = 0x06,
    SubscribeEvent = 0x07,
    UnsubscribeEvent = 0x08,
    StartServiceDiscovery = 0x09,
    StopServiceDiscovery = 0x0A,

    // — control responses (derived values) —
    RequestServiceAck = 0x41,
    RequestLocalServerAck = 0x43,
    RequestServiceNack = 0x81,
    RequestLocalServerNack = 0x83,

    // — routing —
    RoutingSomeIp = 0x20,
    RoutingPdu = 0x21,
    InitialFieldNotification = 0x22,

    // — service discovery updates —
    ServiceInstanceUp = 0x30,
    ServiceInstanceDown = 0x31,
    EventSubscriptionState = 0x32,
}

impl MessageType {
    pub fn from_wire(raw: u8) -> Result<Self, ProtocolError> {
        use MessageType::*;
        Ok(match raw {
            0x01 => RequestService,
            0x02 => ReleaseService,
            0x03 => RequestLocalServer,
            0x04 => ReleaseLocalServer,
            0x05 => OfferService,
            0x06 => StopOfferService,
            0x07 => SubscribeEvent,
            0x08 => UnsubscribeEvent,
            0x09 => StartServiceDiscovery,
            0x0A => StopServiceDiscovery,
            0x41 => RequestServiceAck,
            0x43 => RequestLocalServerAck,
            0x81 => RequestServiceNack,
            0x83 => RequestLocalServerNack,
            0x20 => RoutingSomeIp,
            0x21 => RoutingPdu,
            0x22 => InitialFieldNotification,
            0x30 => ServiceInstanceUp,
            0x31 => ServiceInstanceDown,
            0x32 => EventSubscriptionState,
            other => return Err(ProtocolError::UnknownMessageType(other)),
        })
    }

    pub fn to_wire(self) -> u8 {
        self as u8
    }

    pub fn is_control_request(self) -> bool {
        (self as u8) >= 0x01 && (self as u8) <= 0x0A
    }

    /// Commands that complete without a response message.
    pub fn is_fire_and_forget(self) -> bool {
        self.is_control_request()
            && !matches!(self, MessageType::RequestService | MessageType::RequestLocalServer)
    }

    /// The response type for this request, positive or negative variant.
    ///
    /// Only meaningful for fire-and-wait control requests.
    pub fn response_type(self, positive: bool) -> Result<MessageType, ProtocolError> {
        let offset =
            if positive { POSITIVE_RESPONSE_OFFSET } else { NEGATIVE_RESPONSE_OFFSET };
        MessageType::from_wire((self as u8).wrapping_add(offset))
    }
}

/// Generic header present on every IPC message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GenericHeader {
    pub protocol_version: u8,
    pub message_type: u8,
    pub body_length: u32,
}

impl GenericHeader {
    pub fn encode(&self, w: &mut ByteWriter) {
        w.u8(self.protocol_version);
        w.u8(self.message_type);
        w.u8(0); // reserved
        w.u8(0); // reserved
        w.u32_ne(self.body_length);
    }

    pub fn decode(buf: &[u8]) -> Result<Self, ProtocolError> {
        let mut r = ByteReader::new(buf);
        let protocol_version = r.u8()?;
        let message_type = r.u8()?;
        let _ = r.u8()?;
        let _ = r.u8()?;
        let body_length = r.u32_ne()?;
        if protocol_version != IPC_PROTOCOL_VERSION {
            return Err(ProtocolError::UnsupportedVersion(protocol_version));
        }
        Ok(Self { protocol_version, message_type, body_length })
    }
}

/// Message-type specific header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpecificHeader {
    /// Routing SOME/IP and routing PDU messages.
    Routing { instance: InstanceId },
    /// Initial field notification: the client the notification is for.
    Notification { instance: InstanceId, client: ClientId },
    /// Control request/response.
    Control { return_code: u32 },
    /// SD service instance up/down.
    ServiceInstance {
        service: ServiceId,
        instance: InstanceId,
        major: MajorVersion,
        minor: MinorVersion,
    },
    /// SD event subscription state.
    SubscriptionState {
        service: ServiceId,
        instance: InstanceId,
        major: MajorVersion,
        minor: MinorVersion,
        event: EventId,
        state: u32,
    },
}

impl SpecificHeader {
    pub fn encode(&self, w: &mut ByteWriter) {
        match *self {
            SpecificHeader::Routing { instance } => {
                w.u16_ne(instance.get());
                w.u16_ne(0); // reserved
            }
            SpecificHeader::Notification { instance, client } => {
                w.u16_ne(instance.get());
                w.u16_ne(client.get());
            }
            SpecificHeader::Control { return_code } => {
                w.u32_ne(return_code);
            }
            SpecificHeader::ServiceInstance { service, instance, major, minor } => {
                w.u16_ne(service.get());
                w.u16_ne(instance.get());
                w.u8(major.get());
                w.u32_ne(minor.get());
            }
            SpecificHeader::SubscriptionState {
                service,
                instance,
                major,
                minor,
                event,
                state,
            } => {
                w.u16_ne(service.get());
                w.u16_ne(instance.get());
                w.u8(major.get());
                w.u32_ne(minor.get());
                w.u16_ne(event.get());
                w.u32_ne(state);
            }
        }
    }

    /// Parse the specific header for `message_type`, returning the header
    /// and the remaining payload.
    pub fn decode(
        message_type: MessageType,
        body: &[u8],
    ) -> Result<(SpecificHeader, &[u8]), ProtocolError> {
        let mut r = ByteReader::new(body);
        let header = match message_type {
            MessageType::RoutingSomeIp | MessageType::RoutingPdu => {
                let instance = InstanceId(r.u16_ne()?);
                let _ = r.u16_ne()?;
                SpecificHeader::Routing { instance }
            }
            MessageType::InitialFieldNotification => {
                let instance = InstanceId(r.u16_ne()?);
                let client = ClientId(r.u16_ne()?);
                SpecificHeader::Notification { instance, client }
            }
            MessageType::ServiceInstanceUp | MessageType::ServiceInstanceDown => {
                SpecificHeader::ServiceInstance {
                    service: ServiceId(r.u16_ne()?),
                    instance: InstanceId(r.u16_ne()?),
                    major: MajorVersion(r.u8()?),
                    minor: MinorVersion(r.u32_ne()?),
                }
            }
            MessageType::EventSubscriptionState => SpecificHeader::SubscriptionState {
                service: ServiceId(r.u16_ne()?),
                instance: InstanceId(r.u16_ne()?),
                major: MajorVersion(r.u8()?),
                minor: MinorVersion(r.u32_ne()?),
                event: EventId(r.u16_ne()?),
                state: r.u32_ne()?,
            },
            // Every control request and response carries a return code.
            _ => SpecificHeader::Control { return_code: r.u32_ne()? },
        };
        Ok((header, r.rest()))
    }
}

/// A fully framed message ready for the wire.
pub fn encode_message(
    message_type: MessageType,
    specific: &SpecificHeader,
    payload: &[u8],
) -> Vec<u8> {
    let mut body = ByteWriter::with_capacity(GENERIC_HEADER_LEN + 16 + payload.len());
    // Placeholder generic header, patched after the body length is known.
    GenericHeader {
        protocol_version: IPC_PROTOCOL_VERSION,
        message_type: message_type.to_wire(),
        body_length: 0,
    }
    .encode(&mut body);
    specific.encode(&mut body);
    body.bytes(payload);

    let mut buf = body.into_vec();
    let body_len = (buf.len() - GENERIC_HEADER_LEN) as u32;
    buf[4..8].copy_from_slice(&body_len.to_ne_bytes());
    buf
}

/// A received frame: raw message type plus the undecoded body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFrame {
    pub message_type: u8,
    pub body: Vec<u8>,
}

impl RawFrame {
    /// Decode the message type and specific header, yielding the payload.
    pub fn decode(&self) -> Result<(MessageType, SpecificHeader, &[u8]), ProtocolError> {
        let message_type = MessageType::from_wire(self.message_type)?;
        let (header, payload) = SpecificHeader::decode(message_type, &self.body)?;
        Ok((message_type, header, payload))
    }
}

/// Read one length-framed message from an async reader.
pub async fn read_frame<R: tokio::io::AsyncReadExt + Unpin>(
    reader: &mut R,
) -> Result<RawFrame, ProtocolError> {
    let mut head = [0u8; GENERIC_HEADER_LEN];
    match reader.read_exact(&mut head).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            return Err(ProtocolError::ConnectionClosed);
        }
        Err(e) => return Err(ProtocolError::Io(e)),
    }
    let header = GenericHeader::decode(&head)?;
    let len = header.body_length as usize;
    if len > MAX_BODY_LEN {
        return Err(ProtocolError::MessageTooLarge { size: len, max: MAX_BODY_LEN });
    }

    let mut body = Vec::with_capacity(len.max(MIN_RX_ALLOCATION));
    body.resize(len, 0);
    reader.read_exact(&mut body).await?;
    Ok(RawFrame { message_type: header.message_type, body })
}

/// Write one already-encoded message to an async writer.
pub async fn write_frame<W: tokio::io::AsyncWriteExt + Unpin>(
    writer: &mut W,
    frame: &[u8],
) -> Result<(), ProtocolError> {
    writer.write_all(frame).await?;
    writer.flush().await?;
    Ok(())
}

/// Read a frame with a timeout.
pub async fn read_frame_timeout<R: tokio::io::AsyncReadExt + Unpin>(
    reader: &mut R,
    timeout: Duration,
) -> Result<RawFrame, ProtocolError> {
    tokio::time::timeout(timeout, read_frame(reader))
        .await
        .map_err(|_| ProtocolError::Timeout)?
}

#[cfg(test)]
#[path = "ipc_tests.rs"]
mod tests;
