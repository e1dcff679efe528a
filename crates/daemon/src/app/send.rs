// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Outbound routing to one application.
//!
//! The send router serializes the specific header for each outgoing
//! message family and hands the framed buffer to the connection's transmit
//! queue. It is shared: the owning application holds it, and so do the
//! remote servers and local servers that push events, responses, and SD
//! state toward this application.

use std::sync::Arc;
use std::time::Instant;

use tracing::trace;

use sipd_core::{ClientId, EventId, InstanceId, ServiceInstanceId};
use sipd_wire::{encode_message, MessageType, SpecificHeader};

use crate::app::connection::{Connection, TxEntry, TxError};
use crate::services::subscription::SubscriptionState;

/// Serializes daemon→application messages onto one connection.
#[derive(Clone)]
pub struct SendRouter {
    conn: Connection,
}

impl SendRouter {
    pub fn new(conn: Connection) -> Self {
        Self { conn }
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    fn instance_header(id: &ServiceInstanceId) -> SpecificHeader {
        SpecificHeader::ServiceInstance {
            service: id.service,
            instance: id.instance,
            major: id.major,
            minor: id.minor,
        }
    }

    // — SD state toward the application —

    /// An offer for a required instance became active.
    pub fn on_service_instance_up(&self, id: &ServiceInstanceId) -> Result<(), TxError> {
        trace!(instance = %id, "service instance up");
        let frame =
            encode_message(MessageType::ServiceInstanceUp, &Self::instance_header(id), &[]);
        self.conn.enqueue(TxEntry::Owned { buffer: frame })
    }

    /// The active offer for a required instance was withdrawn or expired.
    pub fn on_service_instance_down(&self, id: &ServiceInstanceId) -> Result<(), TxError> {
        trace!(instance = %id, "service instance down");
        let frame =
            encode_message(MessageType::ServiceInstanceDown, &Self::instance_header(id), &[]);
        self.conn.enqueue(TxEntry::Owned { buffer: frame })
    }

    /// A subscription changed state (SOME/IP events and PDU events share
    /// the wire shape).
    pub fn on_subscription_state_change(
        &self,
        id: &ServiceInstanceId,
        event: EventId,
        state: SubscriptionState,
    ) -> Result<(), TxError> {
        trace!(instance = %id, %event, %state, "subscription state change");
        let header = SpecificHeader::SubscriptionState {
            service: id.service,
            instance: id.instance,
            major: id.major,
            minor: id.minor,
            event,
            state: state.to_wire(),
        };
        let frame = encode_message(MessageType::EventSubscriptionState, &header, &[]);
        self.conn.enqueue(TxEntry::Owned { buffer: frame })
    }

    // — events and responses toward the application —

    /// Forward a SOME/IP event notification.
    pub fn on_someip_event(
        &self,
        instance: InstanceId,
        packet: Arc<[u8]>,
        received_at: Option<Instant>,
    ) -> Result<(), TxError> {
        trace!(%instance, len = packet.len(), "someip event to app");
        self.enqueue_routing(MessageType::RoutingSomeIp, instance, packet, received_at)
    }

    /// Forward a PDU event.
    pub fn on_pdu_event(
        &self,
        instance: InstanceId,
        packet: Arc<[u8]>,
        received_at: Option<Instant>,
    ) -> Result<(), TxError> {
        trace!(%instance, len = packet.len(), "pdu event to app");
        self.enqueue_routing(MessageType::RoutingPdu, instance, packet, received_at)
    }

    /// Forward the initial value of a field to one freshly subscribed
    /// client. The client id in the specific header lets the application
    /// route the notification to the subscribing proxy alone.
    pub fn on_initial_field_notification(
        &self,
        instance: InstanceId,
        client: ClientId,
        packet: Arc<[u8]>,
    ) -> Result<(), TxError> {
        trace!(%instance, %client, "initial field notification to app");
        let mut frame = encode_message(
            MessageType::InitialFieldNotification,
            &SpecificHeader::Notification { instance, client },
            &[],
        );
        frame.extend_from_slice(&packet);
        patch_body_length(&mut frame);
        self.conn.enqueue(TxEntry::Owned { buffer: frame })
    }

    /// Forward a method response to the requesting client.
    pub fn on_method_response(
        &self,
        instance: InstanceId,
        packet: Arc<[u8]>,
    ) -> Result<(), TxError> {
        trace!(%instance, len = packet.len(), "method response to app");
        self.enqueue_routing(MessageType::RoutingSomeIp, instance, packet, None)
    }

    // — requests toward the providing application —

    /// Deliver a method request to the application providing the instance.
    pub fn handle_method_request(
        &self,
        instance: InstanceId,
        packet: Arc<[u8]>,
        received_at: Option<Instant>,
    ) -> Result<(), TxError> {
        trace!(%instance, len = packet.len(), "method request to app");
        self.enqueue_routing(MessageType::RoutingSomeIp, instance, packet, received_at)
    }

    /// Deliver a fire-and-forget method request.
    pub fn handle_method_request_no_return(
        &self,
        instance: InstanceId,
        packet: Arc<[u8]>,
        received_at: Option<Instant>,
    ) -> Result<(), TxError> {
        trace!(%instance, len = packet.len(), "fire-and-forget request to app");
        self.enqueue_routing(MessageType::RoutingSomeIp, instance, packet, received_at)
    }

    // — control responses —

    /// Send a control response frame built by the command controller.
    pub fn send_control_response(&self, frame: Vec<u8>) -> Result<(), TxError> {
        self.conn.enqueue(TxEntry::Owned { buffer: frame })
    }

    fn enqueue_routing(
        &self,
        message_type: MessageType,
        instance: InstanceId,
        packet: Arc<[u8]>,
        received_at: Option<Instant>,
    ) -> Result<(), TxError> {
        // The routing frame is header + the shared packet; the header is
        // tiny, so the composed frame is built once and the packet shared
        // where the caller fans out to several applications.
        let mut frame = encode_message(
            message_type,
            &SpecificHeader::Routing { instance },
            &[],
        );
        frame.extend_from_slice(&packet);
        patch_body_length(&mut frame);
        self.conn.enqueue(TxEntry::Shared { packet: frame.into(), received_at })
    }
}

/// Fix up the generic-header body length after appending a payload.
fn patch_body_length(frame: &mut [u8]) {
    let body_len = (frame.len() - sipd_wire::ipc::GENERIC_HEADER_LEN) as u32;
    frame[4..8].copy_from_slice(&body_len.to_ne_bytes());
}

#[cfg(test)]
#[path = "send_tests.rs"]
mod tests;
