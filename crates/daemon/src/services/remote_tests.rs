// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use sipd_core::{InstanceId, MajorVersion, MinorVersion, ServiceId};
use sipd_wire::{MessageType, RawFrame, SpecificHeader};

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

fn machine() -> MachineConfig {
    MachineConfig {
        unicast_address: "10.0.0.1".parse().unwrap(),
        subnet_prefix_len: 24,
        sd_multicast_address: "224.244.224.245".parse().unwrap(),
        sd_port: 30490,
        user_udp_port: 30600,
    }
}

fn instance_id() -> ServiceInstanceId {
    ServiceInstanceId::new(ServiceId(0x1234), MajorVersion(1), MinorVersion(0), InstanceId(5))
}

fn offer() -> OfferEntry {
    OfferEntry {
        id: instance_id(),
        ttl: sipd_core::Ttl(30),
        endpoints: EntryEndpoints {
            udp: Some("10.0.0.2:30500".parse().unwrap()),
            tcp: None,
        },
    }
}

fn subscriber(conn: u32, client: u16, router: &SendRouter) -> LocalSubscriber {
    LocalSubscriber {
        conn: ConnectionId(conn),
        client: ClientId(client),
        event: EventId(0x8001),
        router: router.clone(),
    }
}

fn server(transport: Arc<RecordingTransport>) -> RemoteServer {
    RemoteServer::new(instance_id(), sipd_core::Ttl(300), transport)
}

async fn next_state_change(app_read: &mut tokio::io::ReadHalf<tokio::io::DuplexStream>) -> u32 {
    loop {
        let raw: RawFrame = sipd_wire::read_frame(app_read).await.unwrap();
        let (message_type, header, _) = raw.decode().unwrap();
        if message_type == MessageType::EventSubscriptionState {
            if let SpecificHeader::SubscriptionState { state, .. } = header {
                return state;
            }
        }
    }
}

#[tokio::test]
async fn subscribe_before_offer_stays_not_subscribed() {
    let transport = Arc::new(RecordingTransport::new());
    let mut server = server(Arc::clone(&transport));
    let (router, (mut app_read, _w)) = app(1);

    let entry = server.subscribe(&machine(), EventgroupId(1), subscriber(1, 1, &router));
    assert!(entry.is_none(), "no SD traffic without an active offer");
    assert_eq!(server.subscription_state(EventgroupId(1)), SubscriptionState::NotSubscribed);

    // No state message either; a fresh subscriber assumes NotSubscribed.
    let silent = sipd_wire::ipc::read_frame_timeout(
        &mut app_read,
        std::time::Duration::from_millis(50),
    )
    .await;
    assert!(silent.is_err());
}

#[tokio::test]
async fn offer_activation_subscribes_waiting_eventgroups() {
    let transport = Arc::new(RecordingTransport::new());
    let mut server = server(Arc::clone(&transport));
    let (router, (mut app_read, _w)) = app(1);
    server.subscribe(&machine(), EventgroupId(1), subscriber(1, 1, &router));

    let entries =
        server.on_offer_activated(&machine(), "10.0.0.2:30490".parse().unwrap(), &offer());
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].eventgroup, EventgroupId(1));
    assert_eq!(entries[0].ttl, sipd_core::Ttl(300));
    assert_eq!(
        entries[0].endpoints.udp,
        Some("10.0.0.1:30600".parse().unwrap()),
        "subscribe announces the local user-traffic endpoint"
    );
    assert_eq!(
        server.subscription_state(EventgroupId(1)),
        SubscriptionState::SubscriptionPending
    );

    assert_eq!(next_state_change(&mut app_read).await, 1);
}

#[tokio::test]
async fn ack_flips_to_subscribed_and_notifies() {
    let transport = Arc::new(RecordingTransport::new());
    let mut server = server(Arc::clone(&transport));
    let (router, (mut app_read, _w)) = app(1);
    server.subscribe(&machine(), EventgroupId(1), subscriber(1, 1, &router));
    server.on_offer_activated(&machine(), "10.0.0.2:30490".parse().unwrap(), &offer());

    server.on_subscribe_ack(EventgroupId(1), None);
    assert_eq!(server.subscription_state(EventgroupId(1)), SubscriptionState::Subscribed);

    assert_eq!(next_state_change(&mut app_read).await, 1);
    assert_eq!(next_state_change(&mut app_read).await, 2);
}

#[tokio::test]
async fn nack_flips_back_to_not_subscribed() {
    let transport = Arc::new(RecordingTransport::new());
    let mut server = server(Arc::clone(&transport));
    let (router, (mut app_read, _w)) = app(1);
    server.subscribe(&machine(), EventgroupId(1), subscriber(1, 1, &router));
    server.on_offer_activated(&machine(), "10.0.0.2:30490".parse().unwrap(), &offer());
    server.on_subscribe_nack(EventgroupId(1));
    assert_eq!(server.subscription_state(EventgroupId(1)), SubscriptionState::NotSubscribed);
    let _ = app_read;
}

#[tokio::test]
async fn offer_loss_tears_down_subscriptions() {
    let transport = Arc::new(RecordingTransport::new());
    let mut server = server(Arc::clone(&transport));
    let (router, (mut app_read, _w)) = app(1);
    server.subscribe(&machine(), EventgroupId(1), subscriber(1, 1, &router));
    server.on_offer_activated(&machine(), "10.0.0.2:30490".parse().unwrap(), &offer());
    server.on_subscribe_ack(EventgroupId(1), None);

    server.on_offer_lost();
    assert!(!server.is_available());
    assert_eq!(server.subscription_state(EventgroupId(1)), SubscriptionState::NotSubscribed);

    // Pending, subscribed, then torn down.
    for expected in [1, 2, 0] {
        assert_eq!(next_state_change(&mut app_read).await, expected);
    }
}

#[tokio::test]
async fn last_unsubscribe_stops_the_subscription() {
    let transport = Arc::new(RecordingTransport::new());
    let mut server = server(Arc::clone(&transport));
    let (router, (_r, _w)) = app(1);
    server.subscribe(&machine(), EventgroupId(1), subscriber(1, 1, &router));
    server.subscribe(&machine(), EventgroupId(1), subscriber(1, 2, &router));
    server.on_offer_activated(&machine(), "10.0.0.2:30490".parse().unwrap(), &offer());
    server.on_subscribe_ack(EventgroupId(1), None);

    let stop = server.unsubscribe(&machine(), EventgroupId(1), ConnectionId(1), ClientId(1), EventId(0x8001));
    assert!(stop.is_none(), "another subscriber remains");

    let stop = server.unsubscribe(&machine(), EventgroupId(1), ConnectionId(1), ClientId(2), EventId(0x8001));
    let stop = stop.expect("last subscriber leaving must stop the subscription");
    assert!(stop.is_stop());
}

#[tokio::test]
async fn disconnect_drops_all_subscribers_of_the_connection() {
    let transport = Arc::new(RecordingTransport::new());
    let mut server = server(Arc::clone(&transport));
    let (router1, (_r1, _w1)) = app(1);
    let (router2, (_r2, _w2)) = app(2);
    server.subscribe(&machine(), EventgroupId(1), subscriber(1, 1, &router1));
    server.subscribe(&machine(), EventgroupId(2), subscriber(2, 1, &router2));
    server.on_offer_activated(&machine(), "10.0.0.2:30490".parse().unwrap(), &offer());

    let stops = server.remove_connection(&machine(), ConnectionId(1));
    assert_eq!(stops.len(), 1);
    assert_eq!(stops[0].eventgroup, EventgroupId(1));
    // Connection 2's subscription is untouched.
    assert_eq!(
        server.subscription_state(EventgroupId(2)),
        SubscriptionState::SubscriptionPending
    );
}

#[tokio::test]
async fn method_requests_go_to_the_offered_udp_endpoint() {
    let transport = Arc::new(RecordingTransport::new());
    let mut server = server(Arc::clone(&transport));

    let packet: Arc<[u8]> = Arc::from(&b"request"[..]);
    assert_eq!(
        server.send_method_request(Arc::clone(&packet)),
        Err(ValidationError::ServiceNotOffered)
    );

    server.on_offer_activated(&machine(), "10.0.0.2:30490".parse().unwrap(), &offer());
    assert_eq!(server.send_method_request(packet), Ok(()));

    let sent = transport.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].0, TransportProto::Udp);
    assert_eq!(sent[0].1, "10.0.0.2:30500".parse::<SocketAddr>().unwrap());
}

#[tokio::test]
async fn late_joiner_is_told_the_live_state() {
    let transport = Arc::new(RecordingTransport::new());
    let mut server = server(Arc::clone(&transport));
    let (router1, (_r1, _w1)) = app(1);
    server.subscribe(&machine(), EventgroupId(1), subscriber(1, 1, &router1));
    server.on_offer_activated(&machine(), "10.0.0.2:30490".parse().unwrap(), &offer());
    server.on_subscribe_ack(EventgroupId(1), None);

    // A second client joining an already subscribed eventgroup hears
    // Subscribed immediately and produces no further SD traffic.
    let (router2, (mut r2, _w2)) = app(2);
    let entry = server.subscribe(&machine(), EventgroupId(1), subscriber(2, 1, &router2));
    assert!(entry.is_none());
    assert_eq!(next_state_change(&mut r2).await, 2);
}
