// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Control protocol specs: response pairing, fire-and-forget commands,
//! access denial, and initial-snapshot ordering.

use std::sync::Arc;

use super::prelude::*;

// =============================================================================
// Scenario 5: IAM denial on RequestService
// =============================================================================

#[tokio::test]
async fn iam_denial_returns_access_denied_and_no_client() {
    let policy = StaticPolicy::new().deny_request_service(target_id(5));
    let mut sim = Sim::with_iam(base_config(InstanceId(5)), Arc::new(policy));
    let mut app = sim.connect();

    let (code, client) = app.request_service(&mut sim, target_id(5)).await;
    assert_eq!(code, ControlReturnCode::RequestServiceAccessDenied);
    assert!(client.is_none());

    // No client was created: a release of any id is a no-op and silent.
    app.release_service(&mut sim, target_id(5), ClientId(1)).await;
    app.expect_silence().await;
}

// =============================================================================
// P6: exactly one response per fire-and-wait command
// =============================================================================

#[tokio::test]
async fn request_service_answers_exactly_once() {
    let mut sim = Sim::new(base_config(InstanceId(5)));
    let mut app = sim.connect();

    let (code, _) = app.request_service(&mut sim, target_id(5)).await;
    assert_eq!(code, ControlReturnCode::Ok);
    app.expect_silence().await;
}

#[tokio::test]
async fn unknown_requirement_nacks_with_instance_not_found() {
    let mut sim = Sim::new(base_config(InstanceId(5)));
    let mut app = sim.connect();

    let other = ServiceInstanceId::new(
        ServiceId(0x9999),
        MajorVersion(1),
        MinorVersion(0),
        InstanceId(1),
    );
    let (code, client) = app.request_service(&mut sim, other).await;
    assert_eq!(code, ControlReturnCode::RequestServiceRequiredServiceInstanceNotFound);
    assert!(client.is_none());
}

#[tokio::test]
async fn malformed_request_service_nacks_with_malformed_message() {
    let mut sim = Sim::new(base_config(InstanceId(5)));
    let mut app = sim.connect();

    let frame = encode_message(
        MessageType::RequestService,
        &SpecificHeader::Control { return_code: 0 },
        &[0x01, 0x02], // truncated payload
    );
    app.send_frame(frame).await;
    sim.settle().await;

    let (message_type, header, _) = app.recv().await;
    assert_eq!(message_type, MessageType::RequestServiceNack);
    match header {
        SpecificHeader::Control { return_code } => {
            assert_eq!(
                ControlReturnCode::from_wire(return_code).unwrap(),
                ControlReturnCode::MalformedMessage
            );
        }
        other => panic!("unexpected header {other:?}"),
    }
    // The connection stays alive: a correct retry succeeds.
    let (code, _) = app.request_service(&mut sim, target_id(5)).await;
    assert_eq!(code, ControlReturnCode::Ok);
}

// =============================================================================
// P7: fire-and-forget commands answer with nothing
// =============================================================================

#[tokio::test]
async fn fire_and_forget_commands_emit_no_response() {
    let mut sim = Sim::new(base_config(InstanceId(5)));
    let mut app = sim.connect();

    let target = ServiceInstancePayload::from_id(target_id(5)).encode();
    let subscribe = SubscribeEventPayload {
        target: ServiceInstancePayload::from_id(target_id(5)),
        event: EventId(0x8001),
        client: ClientId(1),
    }
    .encode();
    let release = ReleaseServicePayload {
        target: ServiceInstancePayload::from_id(target_id(5)),
        client: ClientId(1),
    }
    .encode();

    for (message_type, payload) in [
        (MessageType::ReleaseService, release.clone()),
        (MessageType::ReleaseLocalServer, target.clone()),
        (MessageType::OfferService, target.clone()),
        (MessageType::StopOfferService, target.clone()),
        (MessageType::SubscribeEvent, subscribe.clone()),
        (MessageType::UnsubscribeEvent, subscribe.clone()),
        (MessageType::StartServiceDiscovery, target.clone()),
        (MessageType::StopServiceDiscovery, target.clone()),
    ] {
        let frame = encode_message(
            message_type,
            &SpecificHeader::Control { return_code: 0 },
            &payload,
        );
        app.send_frame(frame).await;
        sim.settle().await;
    }
    app.expect_silence().await;
}

// =============================================================================
// Open-question decision: snapshot before any later offer
// =============================================================================

#[tokio::test]
async fn start_discovery_delivers_the_snapshot_first() {
    let mut sim = Sim::new(base_config(InstanceId(5)));
    let mut app = sim.connect();
    let mut late = sim.connect();

    app.start_discovery(&mut sim, target_id(5)).await;
    sim.inject_sd(SD_PEER, false, &offer_message(1, 5, 30));
    sim.settle().await;
    let _ = app.recv().await;

    // A second application arming discovery now receives the snapshot
    // immediately, before any further offer traffic.
    late.start_discovery(&mut sim, target_id(5)).await;
    let (message_type, header, _) = late.recv().await;
    assert_eq!(message_type, MessageType::ServiceInstanceUp);
    match header {
        SpecificHeader::ServiceInstance { instance, .. } => {
            assert_eq!(instance, InstanceId(5));
        }
        other => panic!("unexpected header {other:?}"),
    }
}

// =============================================================================
// Client id exhaustion surfaces as an overflow code
// =============================================================================

#[tokio::test]
async fn client_ids_are_not_shared_across_applications() {
    let mut sim = Sim::new(base_config(InstanceId(5)));
    let mut first = sim.connect();
    let mut second = sim.connect();

    let (_, a) = first.request_service(&mut sim, target_id(5)).await;
    let (_, b) = second.request_service(&mut sim, target_id(5)).await;

    // One generator per required instance: ids are unique across apps.
    assert_eq!(a, Some(ClientId(1)));
    assert_eq!(b, Some(ClientId(2)));
}

// =============================================================================
// P9: application cleanup is deferred to a later turn
// =============================================================================

#[tokio::test]
async fn disconnected_application_is_reaped_on_a_later_turn() {
    let mut sim = Sim::new(base_config(InstanceId(5)));
    let app = sim.connect();
    assert_eq!(sim.runtime.applications(), 1);

    // Handle the disconnect event alone: resources are released but the
    // application object survives until the software event runs.
    sim.runtime.handle_event(Event::Disconnected { conn: app.id });
    assert_eq!(sim.runtime.applications(), 1);

    // The queued ReapApplications software event performs the removal.
    sim.runtime.pump();
    assert_eq!(sim.runtime.applications(), 0);
}

#[tokio::test]
async fn disconnect_releases_clients_and_discovery() {
    let mut sim = Sim::new(base_config(InstanceId(5)));
    let mut app = sim.connect();

    let (_, client) = app.request_service(&mut sim, target_id(5)).await;
    assert_eq!(client, Some(ClientId(1)));
    app.start_discovery(&mut sim, target_id(5)).await;

    // Drop the application side entirely; the daemon notices EOF.
    drop(app);
    sim.settle().await;
    assert_eq!(sim.runtime.applications(), 0);

    // The freed client id is available to the next application.
    let mut next = sim.connect();
    let (_, client) = next.request_service(&mut sim, target_id(5)).await;
    assert_eq!(client, Some(ClientId(1)));
}
