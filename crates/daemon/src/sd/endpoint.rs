// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! SD socket endpoint: datagram codec, per-channel session stamping, and
//! the UDP receive tasks.
//!
//! An SD datagram is a SOME/IP message addressed to the reserved SD
//! service whose payload is the entries/options block. Outgoing messages
//! are stamped with a per-channel session counter whose reboot flag
//! clears after the first wrap.

use std::collections::HashMap;
use std::io;
use std::net::{SocketAddr, SocketAddrV4};
use std::sync::Arc;

use tokio::net::UdpSocket;
use tracing::{debug, error, info};

use sipd_core::config::MachineConfig;
use sipd_core::{ClientId, SdTarget, SessionId};
use sipd_wire::{
    ByteWriter, SdMessage, SomeIpHeader, SomeIpMessageType, WireError, SD_METHOD, SD_SERVICE,
    SOMEIP_HEADER_LEN, SOMEIP_LENGTH_BASE, SOMEIP_PROTOCOL_VERSION,
};

use crate::event::{Event, EventSender};

/// Encode a full SD datagram (SOME/IP header + SD payload).
pub fn encode_datagram(message: &SdMessage) -> Vec<u8> {
    let payload = message.encode_payload();
    let header = SomeIpHeader {
        service: SD_SERVICE,
        method: SD_METHOD,
        length: SOMEIP_LENGTH_BASE + payload.len() as u32,
        client: ClientId(0),
        session: message.session,
        protocol_version: SOMEIP_PROTOCOL_VERSION,
        interface_version: 1,
        message_type: SomeIpMessageType::Notification.to_wire(),
        return_code: 0,
    };
    let mut w = ByteWriter::with_capacity(SOMEIP_HEADER_LEN + payload.len());
    header.encode(&mut w);
    w.bytes(&payload);
    w.into_vec()
}

/// Decode and validate a full SD datagram.
pub fn decode_datagram(datagram: &[u8]) -> Result<SdMessage, WireError> {
    let header = SomeIpHeader::decode(datagram)?;
    if header.service != SD_SERVICE || header.method != SD_METHOD {
        return Err(WireError::InvalidValue {
            context: "sd datagram message id",
            value: u64::from(header.service.get()) << 16 | u64::from(header.method.get()),
        });
    }
    if header.protocol_version != SOMEIP_PROTOCOL_VERSION {
        return Err(WireError::InvalidValue {
            context: "sd datagram protocol version",
            value: u64::from(header.protocol_version),
        });
    }
    if header.message_type != SomeIpMessageType::Notification.to_wire() {
        return Err(WireError::InvalidValue {
            context: "sd datagram message type",
            value: u64::from(header.message_type),
        });
    }
    let payload = datagram
        .get(SOMEIP_HEADER_LEN..SOMEIP_HEADER_LEN + header.payload_len())
        .ok_or(WireError::ShortBuffer {
            at: SOMEIP_HEADER_LEN,
            needed: header.payload_len(),
        })?;
    SdMessage::decode_payload(header.session, payload)
}

#[derive(Debug, Clone, Copy)]
struct ChannelState {
    session: SessionId,
    reboot: bool,
}

/// Per-channel session counters for outgoing SD messages.
#[derive(Debug, Default)]
pub struct SessionPool {
    channels: HashMap<SdTarget, ChannelState>,
}

impl SessionPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// The session id and reboot flag to stamp on the next message toward
    /// `target`.
    pub fn next(&mut self, target: SdTarget) -> (SessionId, bool) {
        let state = self
            .channels
            .entry(target)
            .or_insert(ChannelState { session: SessionId::INITIAL, reboot: true });
        let stamped = (state.session, state.reboot);
        let (next, wrapped) = state.session.next();
        state.session = next;
        if wrapped {
            state.reboot = false;
        }
        stamped
    }
}

/// The daemon's SD socket pair.
///
/// Two sockets keep unicast and multicast reception distinguishable
/// without per-packet ancillary data: one bound to the unicast address,
/// one bound to the multicast group.
pub struct SdEndpoint {
    unicast: Arc<UdpSocket>,
    multicast_target: SocketAddr,
}

impl SdEndpoint {
    /// Bind the socket pair. Returns the endpoint (which owns the unicast
    /// socket for sending) plus receive handles for both sockets; pass
    /// those to [`spawn_receiver`] once the event bus exists.
    pub async fn bind(
        machine: &MachineConfig,
    ) -> io::Result<(SdEndpoint, Arc<UdpSocket>, Arc<UdpSocket>)> {
        let unicast = Arc::new(
            UdpSocket::bind(SocketAddrV4::new(machine.unicast_address, machine.sd_port))
                .await?,
        );
        let multicast = Arc::new(
            UdpSocket::bind(SocketAddrV4::new(machine.sd_multicast_address, machine.sd_port))
                .await?,
        );
        multicast.join_multicast_v4(machine.sd_multicast_address, machine.unicast_address)?;
        info!(
            unicast = %machine.unicast_address,
            multicast = %machine.sd_multicast_address,
            port = machine.sd_port,
            "sd endpoint bound"
        );
        let receive_handle = Arc::clone(&unicast);
        Ok((
            SdEndpoint {
                unicast,
                multicast_target: SocketAddr::V4(SocketAddrV4::new(
                    machine.sd_multicast_address,
                    machine.sd_port,
                )),
            },
            receive_handle,
            multicast,
        ))
    }
}

/// Spawn a receive task posting datagrams onto the event bus.
pub fn spawn_receiver(socket: Arc<UdpSocket>, multicast: bool, events: EventSender) {
    tokio::spawn(receive_loop(socket, multicast, events));
}

/// Outbound SD transmission seam; the runtime talks to this so tests can
/// capture datagrams instead of opening sockets.
pub trait SdSender: Send + Sync + 'static {
    fn send(&self, to: SocketAddr, datagram: Vec<u8>);

    /// The concrete address of the multicast channel.
    fn multicast_target(&self) -> SocketAddr;
}

impl SdSender for SdEndpoint {
    fn send(&self, to: SocketAddr, datagram: Vec<u8>) {
        // Fire-and-forget; UDP send failures are logged and dropped.
        let socket = Arc::clone(&self.unicast);
        tokio::spawn(async move {
            if let Err(err) = socket.send_to(&datagram, to).await {
                error!(%to, error = %err, "sd send failed");
            }
        });
    }

    fn multicast_target(&self) -> SocketAddr {
        self.multicast_target
    }
}

/// Captures outgoing SD datagrams for assertions.
#[cfg(any(test, feature = "test-support"))]
#[derive(Debug, Default)]
pub struct RecordingSdSender {
    sent: parking_lot::Mutex<Vec<(SocketAddr, Vec<u8>)>>,
}

#[cfg(any(test, feature = "test-support"))]
impl RecordingSdSender {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<(SocketAddr, Vec<u8>)> {
        self.sent.lock().clone()
    }

    pub fn take(&self) -> Vec<(SocketAddr, Vec<u8>)> {
        std::mem::take(&mut self.sent.lock())
    }
}

#[cfg(any(test, feature = "test-support"))]
impl SdSender for RecordingSdSender {
    fn send(&self, to: SocketAddr, datagram: Vec<u8>) {
        self.sent.lock().push((to, datagram));
    }

    fn multicast_target(&self) -> SocketAddr {
        SocketAddr::V4(SocketAddrV4::new(std::net::Ipv4Addr::new(224, 244, 224, 245), 30490))
    }
}

async fn receive_loop(socket: Arc<UdpSocket>, multicast: bool, events: EventSender) {
    let mut buf = vec![0u8; 4096];
    loop {
        match socket.recv_from(&mut buf).await {
            Ok((len, from)) => {
                let posted = events.emit(Event::SdDatagram {
                    from,
                    multicast,
                    datagram: buf[..len].to_vec(),
                });
                if !posted {
                    break;
                }
            }
            Err(err) => {
                debug!(error = %err, multicast, "sd receive failed");
            }
        }
    }
}

#[cfg(test)]
#[path = "endpoint_tests.rs"]
mod tests;
