// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Service discovery specs: find/offer lifecycle, TTL, reboot, wildcard.

use super::prelude::*;

// =============================================================================
// Scenario 1: Find / Offer / Request / Release
// =============================================================================

#[tokio::test]
async fn find_offer_request_release() {
    let mut sim = Sim::new(base_config(InstanceId(5)));
    let mut app = sim.connect();

    // App requests the service and receives the first client id.
    let (code, client) = app.request_service(&mut sim, target_id(5)).await;
    assert_eq!(code, ControlReturnCode::Ok);
    assert_eq!(client, Some(ClientId(1)));

    app.start_discovery(&mut sim, target_id(5)).await;

    // The find sequence starts after the initial wait (window minimum).
    sim.advance_ms(10);
    sim.advance_ms(0);
    assert_eq!(sim.sent_find_count(), 1);

    // Matching offer arrives: the watching app is told exactly once.
    sim.inject_sd(SD_PEER, false, &offer_message(42, 5, 30));
    sim.settle().await;
    let (message_type, header, _) = app.recv().await;
    assert_eq!(message_type, MessageType::ServiceInstanceUp);
    assert_eq!(
        header,
        SpecificHeader::ServiceInstance {
            service: ServiceId(0x1234),
            instance: InstanceId(5),
            major: MajorVersion(1),
            minor: MinorVersion(0),
        }
    );

    // A matching renewal does not re-notify the listener.
    sim.inject_sd(SD_PEER, false, &offer_message(43, 5, 30));
    sim.settle().await;
    app.expect_silence().await;

    // Release returns the id to the pool: the next request gets it again.
    let client = client.unwrap();
    app.release_service(&mut sim, target_id(5), client).await;
    app.expect_silence().await; // fire-and-forget

    let (code, reissued) = app.request_service(&mut sim, target_id(5)).await;
    assert_eq!(code, ControlReturnCode::Ok);
    assert_eq!(reissued, Some(ClientId(1)));

    // Discovery alone moves no user traffic.
    assert_eq!(sim.transport.sent_count(), 0);
}

// =============================================================================
// Scenario 2: TTL expiry then re-find
// =============================================================================

#[tokio::test]
async fn ttl_expiry_restarts_the_find_sequence() {
    let mut sim = Sim::new(base_config(InstanceId(5)));
    let mut app = sim.connect();

    let (_, client) = app.request_service(&mut sim, target_id(5)).await;
    assert!(client.is_some());
    app.start_discovery(&mut sim, target_id(5)).await;

    // Swallow the initial find burst.
    sim.advance_ms(10);
    sim.advance_ms(0);
    let finds_before = sim.sent_find_count();

    sim.inject_sd(SD_PEER, false, &offer_message(42, 5, 2));
    sim.settle().await;
    let (message_type, _, _) = app.recv().await;
    assert_eq!(message_type, MessageType::ServiceInstanceUp);

    // 2.1s without renewal: the offer expires, the app is told once.
    sim.advance_ms(2100);
    sim.settle().await;
    let (message_type, _, _) = app.recv().await;
    assert_eq!(message_type, MessageType::ServiceInstanceDown);
    app.expect_silence().await;

    // The client re-enters initial wait and finds again.
    sim.advance_ms(10);
    sim.advance_ms(0);
    assert!(sim.sent_find_count() > finds_before, "a new find must follow TTL expiry");
}

// =============================================================================
// Scenario 3: Reboot during an active subscription
// =============================================================================

#[tokio::test]
async fn reboot_clears_offer_and_subscription() {
    let mut sim = Sim::new(base_config(InstanceId(5)));
    let mut app = sim.connect();

    let (_, client) = app.request_service(&mut sim, target_id(5)).await;
    let client = client.unwrap();
    app.start_discovery(&mut sim, target_id(5)).await;

    sim.inject_sd(SD_PEER, false, &offer_message(42, 5, 30));
    sim.settle().await;
    let (message_type, _, _) = app.recv().await;
    assert_eq!(message_type, MessageType::ServiceInstanceUp);

    // Subscribe to event 0x8001; the SubscribeEventgroup goes out and the
    // peer acknowledges.
    app.subscribe_event(&mut sim, target_id(5), EventId(0x8001), client).await;
    sim.advance_ms(0); // flush the subscribe entry

    // Pending state is reported while the ack is outstanding.
    let (message_type, header, _) = app.recv().await;
    assert_eq!(message_type, MessageType::EventSubscriptionState);
    assert_eq!(subscription_state(&header), 1);

    sim.inject_sd(SD_PEER, false, &ack_message(43, 5, 1, 300));
    sim.settle().await;
    let (message_type, header, _) = app.recv().await;
    assert_eq!(message_type, MessageType::EventSubscriptionState);
    assert_eq!(subscription_state(&header), 2);

    // The peer reboots: stored counters were (flag=1, session=43); the new
    // message carries (flag=1, session=1).
    sim.inject_sd(SD_PEER, false, &heartbeat_message(1, true));
    sim.settle().await;

    // Both the subscription teardown and the instance-down are observed.
    let mut got_down = false;
    let mut got_not_subscribed = false;
    for _ in 0..2 {
        let (message_type, header, _) = app.recv().await;
        match message_type {
            MessageType::ServiceInstanceDown => got_down = true,
            MessageType::EventSubscriptionState => {
                assert_eq!(subscription_state(&header), 0);
                got_not_subscribed = true;
            }
            other => panic!("unexpected message {other:?}"),
        }
    }
    assert!(got_down && got_not_subscribed);
}

fn subscription_state(header: &SpecificHeader) -> u32 {
    match header {
        SpecificHeader::SubscriptionState { state, .. } => *state,
        other => panic!("expected subscription state header, got {other:?}"),
    }
}

// =============================================================================
// Scenario 4: wildcard instance id
// =============================================================================

#[tokio::test]
async fn wildcard_discovers_every_instance() {
    let mut sim = Sim::new(base_config(InstanceId::ALL));
    let mut app = sim.connect();

    app.start_discovery(&mut sim, target_id(0xFFFF)).await;

    // The finder searches with the wildcard instance.
    sim.advance_ms(10);
    sim.advance_ms(0);
    let finds = sim.multicast_messages();
    let find = finds
        .iter()
        .flat_map(|m| &m.entries)
        .find(|e| e.entry_type == SdEntryType::FindService)
        .expect("wildcard find sent");
    assert_eq!(find.instance, InstanceId::ALL);
    // Exact-minor policy: the configured minor is written, not the wildcard.
    assert_eq!(find.payload, SdEntryPayload::Service { minor: MinorVersion(0) });

    // Offers for two instances from two peers create two children.
    sim.inject_sd(SD_PEER, false, &offer_message(1, 7, 30));
    sim.inject_sd(OTHER_PEER, false, &offer_message(1, 9, 30));
    sim.settle().await;

    let mut instances = Vec::new();
    for _ in 0..2 {
        let (message_type, header, _) = app.recv().await;
        assert_eq!(message_type, MessageType::ServiceInstanceUp);
        if let SpecificHeader::ServiceInstance { instance, .. } = header {
            instances.push(instance.get());
        }
    }
    instances.sort();
    assert_eq!(instances, vec![7, 9]);

    // Requesting a discovered instance succeeds; an unknown one does not.
    let (code, client) = app.request_service(&mut sim, target_id(7)).await;
    assert_eq!(code, ControlReturnCode::Ok);
    assert!(client.is_some());

    let (code, client) = app.request_service(&mut sim, target_id(11)).await;
    assert_eq!(code, ControlReturnCode::RequestServiceRemoteServerNotFound);
    assert!(client.is_none());
}

// =============================================================================
// Renewal and no-preemption details
// =============================================================================

#[tokio::test]
async fn competing_offer_does_not_preempt() {
    let mut sim = Sim::new(base_config(InstanceId(5)));
    let mut app = sim.connect();
    app.start_discovery(&mut sim, target_id(5)).await;

    sim.inject_sd(SD_PEER, false, &offer_message(1, 5, 30));
    sim.settle().await;
    let (message_type, _, _) = app.recv().await;
    assert_eq!(message_type, MessageType::ServiceInstanceUp);

    // The same instance offered by a different peer is ignored.
    sim.inject_sd(OTHER_PEER, false, &offer_message(1, 5, 30));
    sim.settle().await;
    app.expect_silence().await;
}

#[tokio::test]
async fn stop_offer_notifies_watchers() {
    let mut sim = Sim::new(base_config(InstanceId(5)));
    let mut app = sim.connect();
    app.start_discovery(&mut sim, target_id(5)).await;

    sim.inject_sd(SD_PEER, false, &offer_message(1, 5, 30));
    sim.settle().await;
    let _ = app.recv().await;

    sim.inject_sd(SD_PEER, false, &stop_offer_message(2, 5));
    sim.settle().await;
    let (message_type, _, _) = app.recv().await;
    assert_eq!(message_type, MessageType::ServiceInstanceDown);
}
