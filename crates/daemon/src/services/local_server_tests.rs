// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use sipd_core::config::EventConfig;
use sipd_core::{InstanceId, MajorVersion, MinorVersion, ServiceId};
use sipd_wire::{MessageType, SpecificHeader, SOMEIP_LENGTH_BASE};

use super::*;
use crate::app::connection::Connection;
use crate::event::event_bus;
use crate::services::transport::RecordingTransport;

type AppSide =
    (tokio::io::ReadHalf<tokio::io::DuplexStream>, tokio::io::WriteHalf<tokio::io::DuplexStream>);

fn app(conn_id: u32) -> (SendRouter, AppSide) {
    let (events, _rx) = event_bus();
    let (app_side, daemon_side) = tokio::io::duplex(1 << 16);
    let (read_half, write_half) = tokio::io::split(daemon_side);
    let conn = Connection::spawn(ConnectionId(conn_id), read_half, write_half, 100, events);
    (SendRouter::new(conn), tokio::io::split(app_side))
}

fn instance_id() -> ServiceInstanceId {
    ServiceInstanceId::new(ServiceId(0x5678), MajorVersion(1), MinorVersion(0), InstanceId(3))
}

fn service() -> ServiceInterface {
    ServiceInterface {
        service: ServiceId(0x5678),
        major: MajorVersion(1),
        minor: MinorVersion(0),
        methods: vec![sipd_core::MethodId(0x0001)],
        events: vec![
            EventConfig { event: EventId(0x8001), eventgroup: EventgroupId(1), field: false },
            EventConfig { event: EventId(0x8002), eventgroup: EventgroupId(1), field: true },
        ],
    }
}

fn request_header(client: u16, session: u16) -> SomeIpHeader {
    SomeIpHeader {
        service: ServiceId(0x5678),
        method: sipd_core::MethodId(0x0001),
        length: SOMEIP_LENGTH_BASE,
        client: ClientId(client),
        session: SessionId(session),
        protocol_version: 1,
        interface_version: 1,
        message_type: 0x00,
        return_code: 0,
    }
}

#[test]
fn ownership_is_exclusive_per_instance() {
    let mut manager = LocalServerManager::new();
    assert!(manager.try_acquire(instance_id(), ConnectionId(1)));
    assert!(!manager.try_acquire(instance_id(), ConnectionId(2)));
    // Re-acquisition by the owner is fine.
    assert!(manager.try_acquire(instance_id(), ConnectionId(1)));

    assert!(!manager.release(instance_id(), ConnectionId(2)));
    assert!(manager.release(instance_id(), ConnectionId(1)));
    assert!(manager.try_acquire(instance_id(), ConnectionId(2)));
}

#[test]
fn minor_version_does_not_split_ownership() {
    let mut manager = LocalServerManager::new();
    assert!(manager.try_acquire(instance_id(), ConnectionId(1)));
    let mut other_minor = instance_id();
    other_minor.minor = MinorVersion(9);
    assert!(!manager.try_acquire(other_minor, ConnectionId(2)));
}

#[test]
fn disconnect_releases_every_owned_instance() {
    let mut manager = LocalServerManager::new();
    manager.try_acquire(instance_id(), ConnectionId(1));
    let mut second = instance_id();
    second.instance = InstanceId(4);
    manager.try_acquire(second, ConnectionId(1));

    let released = manager.release_connection(ConnectionId(1));
    assert_eq!(released.len(), 2);
    assert!(manager.owner_of(instance_id()).is_none());
}

#[tokio::test]
async fn responses_route_back_to_the_pending_requester() {
    let transport = Arc::new(RecordingTransport::new());
    let (provider_router, (mut provider_read, _pw)) = app(1);
    let (client_router, (mut client_read, _cw)) = app(2);
    let mut server =
        LocalServer::new(instance_id(), ConnectionId(1), provider_router, transport);

    let header = request_header(7, 42);
    server.send_method_request(
        &header,
        Arc::from(&b"request"[..]),
        Requester::Local { router: client_router },
        true,
    );

    // Provider received the request.
    let raw = sipd_wire::read_frame(&mut provider_read).await.unwrap();
    let (message_type, _, payload) = raw.decode().unwrap();
    assert_eq!(message_type, MessageType::RoutingSomeIp);
    assert_eq!(payload, b"request");

    // Response flows back to the requesting client.
    server.send_method_response(&header, Arc::from(&b"response"[..]));
    let raw = sipd_wire::read_frame(&mut client_read).await.unwrap();
    let (_, header, payload) = raw.decode().unwrap();
    assert_eq!(header, SpecificHeader::Routing { instance: InstanceId(3) });
    assert_eq!(payload, b"response");

    // The pending entry is consumed.
    server.send_method_response(&request_header(7, 42), Arc::from(&b"dup"[..]));
    assert!(
        sipd_wire::ipc::read_frame_timeout(
            &mut client_read,
            std::time::Duration::from_millis(50)
        )
        .await
        .is_err(),
        "a duplicate response must not be routed"
    );
}

#[tokio::test]
async fn fire_and_forget_requests_leave_no_pending_entry() {
    let transport = Arc::new(RecordingTransport::new());
    let (provider_router, (_pr, _pw)) = app(1);
    let (client_router, (mut client_read, _cw)) = app(2);
    let mut server =
        LocalServer::new(instance_id(), ConnectionId(1), provider_router, transport);

    let header = request_header(7, 43);
    server.send_method_request(
        &header,
        Arc::from(&b"oneway"[..]),
        Requester::Local { router: client_router },
        false,
    );
    server.send_method_response(&header, Arc::from(&b"spurious"[..]));
    assert!(
        sipd_wire::ipc::read_frame_timeout(
            &mut client_read,
            std::time::Duration::from_millis(50)
        )
        .await
        .is_err()
    );
}

#[tokio::test]
async fn events_fan_out_to_local_and_remote_subscribers() {
    let transport = Arc::new(RecordingTransport::new());
    let (provider_router, (_pr, _pw)) = app(1);
    let (sub_router, (mut sub_read, _sw)) = app(2);
    let mut server = LocalServer::new(
        instance_id(),
        ConnectionId(1),
        provider_router,
        Arc::clone(&transport) as Arc<dyn NetTransport>,
    );

    server.subscribe_local(
        &service(),
        EventgroupId(1),
        ServedSubscriber { conn: ConnectionId(2), client: ClientId(9), router: sub_router },
    );
    server.subscribe_remote(EventgroupId(1), "10.0.0.7:40000".parse().unwrap());

    server.send_event(&service(), EventId(0x8001), Arc::from(&b"event"[..]));

    let raw = sipd_wire::read_frame(&mut sub_read).await.unwrap();
    let (message_type, _, payload) = raw.decode().unwrap();
    assert_eq!(message_type, MessageType::RoutingSomeIp);
    assert_eq!(payload, b"event");

    assert_eq!(transport.sent_count(), 1);
}

#[tokio::test]
async fn field_values_are_cached_and_replayed_to_new_subscribers() {
    let transport = Arc::new(RecordingTransport::new());
    let (provider_router, (_pr, _pw)) = app(1);
    let mut server = LocalServer::new(
        instance_id(),
        ConnectionId(1),
        provider_router,
        Arc::clone(&transport) as Arc<dyn NetTransport>,
    );

    // Field event published before anyone subscribes.
    server.send_event(&service(), EventId(0x8002), Arc::from(&b"field-v1"[..]));

    let (sub_router, (mut sub_read, _sw)) = app(2);
    server.subscribe_local(
        &service(),
        EventgroupId(1),
        ServedSubscriber { conn: ConnectionId(2), client: ClientId(9), router: sub_router },
    );

    // The cached value arrives as an initial field notification for the
    // subscribing client.
    let raw = sipd_wire::read_frame(&mut sub_read).await.unwrap();
    let (message_type, header, payload) = raw.decode().unwrap();
    assert_eq!(message_type, MessageType::InitialFieldNotification);
    assert_eq!(
        header,
        SpecificHeader::Notification { instance: InstanceId(3), client: ClientId(9) }
    );
    assert_eq!(payload, b"field-v1");

    assert_eq!(server.cached_fields(&service(), EventgroupId(1)).len(), 1);
}

#[tokio::test]
async fn remote_responses_use_the_transport() {
    let transport = Arc::new(RecordingTransport::new());
    let (provider_router, (_pr, _pw)) = app(1);
    let mut server = LocalServer::new(
        instance_id(),
        ConnectionId(1),
        provider_router,
        Arc::clone(&transport) as Arc<dyn NetTransport>,
    );

    let header = request_header(3, 9);
    server.send_method_request(
        &header,
        Arc::from(&b"request"[..]),
        Requester::Remote { to: "10.0.0.7:40000".parse().unwrap(), proto: TransportProto::Udp },
        true,
    );
    server.send_method_response(&header, Arc::from(&b"response"[..]));

    let sent = transport.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].1, "10.0.0.7:40000".parse::<SocketAddr>().unwrap());
}
