// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Transmit-queue specs: FIFO ordering and depth behavior under a
//! non-draining application.

use std::time::Duration;

use super::prelude::*;
use sipd_daemon::app::connection::TxEntry;
use sipd_daemon::event::event_bus;

fn routing_frame(tag: u8) -> Vec<u8> {
    encode_message(
        MessageType::RoutingSomeIp,
        &SpecificHeader::Routing { instance: InstanceId(1) },
        &[tag],
    )
}

// =============================================================================
// P8: strict FIFO transmission
// =============================================================================

#[tokio::test]
async fn tx_order_is_preserved_under_load() {
    let (events, _rx) = event_bus();
    let (app_side, daemon_side) = tokio::io::duplex(1 << 20);
    let (read_half, write_half) = tokio::io::split(daemon_side);
    let conn = Connection::spawn(ConnectionId(1), read_half, write_half, 100, events);

    for tag in 0..=200u8 {
        conn.enqueue(TxEntry::Owned { buffer: routing_frame(tag) }).unwrap();
    }

    let (mut app_read, _app_write) = tokio::io::split(app_side);
    for expected in 0..=200u8 {
        let raw = sipd_wire::read_frame(&mut app_read).await.unwrap();
        let (_, _, payload) = raw.decode().unwrap();
        assert_eq!(payload, &[expected], "frames must drain strictly FIFO");
    }
}

// =============================================================================
// Scenario 6: queue growth without a draining application
// =============================================================================

#[tokio::test]
async fn queue_grows_unbounded_while_the_app_stalls() {
    let (events, _rx) = event_bus();
    // A pipe small enough that the writer task blocks almost immediately.
    let (app_side, daemon_side) = tokio::io::duplex(64);
    let (read_half, write_half) = tokio::io::split(daemon_side);
    let conn = Connection::spawn(ConnectionId(1), read_half, write_half, 100, events);

    // 150 messages with nobody reading: the queue crosses the warning
    // threshold (the monitor fires exactly once on the way up; see the
    // connection unit tests for the re-arm behavior).
    for tag in 0..150u8 {
        conn.enqueue(TxEntry::Owned { buffer: routing_frame(tag) }).unwrap();
    }
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(conn.queue_depth() > 100, "queue must keep absorbing messages");

    // Once the application drains, the queue empties and order holds.
    let (mut app_read, _app_write) = tokio::io::split(app_side);
    for expected in 0..150u8 {
        let raw = sipd_wire::read_frame(&mut app_read).await.unwrap();
        let (_, _, payload) = raw.decode().unwrap();
        assert_eq!(payload, &[expected]);
    }
    for _ in 0..200 {
        if conn.queue_depth() == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    assert_eq!(conn.queue_depth(), 0);
}
