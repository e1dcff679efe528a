// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn allocates_lowest_free_id_starting_at_one() {
    let mut generator = ClientIdGenerator::new();
    assert_eq!(generator.allocate(), Ok(ClientId(1)));
    assert_eq!(generator.allocate(), Ok(ClientId(2)));
    assert_eq!(generator.allocate(), Ok(ClientId(3)));
}

#[test]
fn released_ids_are_reused_lowest_first() {
    let mut generator = ClientIdGenerator::new();
    let a = generator.allocate().unwrap();
    let b = generator.allocate().unwrap();
    let _c = generator.allocate().unwrap();

    assert!(generator.release(a));
    assert!(generator.release(b));
    assert_eq!(generator.allocate(), Ok(ClientId(1)));
    assert_eq!(generator.allocate(), Ok(ClientId(2)));
}

#[test]
fn double_release_is_rejected() {
    let mut generator = ClientIdGenerator::new();
    let id = generator.allocate().unwrap();
    assert!(generator.release(id));
    assert!(!generator.release(id));
}

#[test]
fn exhaustion_reports_overflow() {
    let mut generator = ClientIdGenerator::new();
    for _ in 0x0001..=0xFFFE {
        generator.allocate().unwrap();
    }
    assert_eq!(generator.allocate(), Err(ClientIdError::Overflow));

    // Releasing any id makes allocation possible again.
    assert!(generator.release(ClientId(0x1234)));
    assert_eq!(generator.allocate(), Ok(ClientId(0x1234)));
}

#[test]
fn live_ids_are_always_unique() {
    let mut generator = ClientIdGenerator::new();
    let mut live = std::collections::HashSet::new();
    for round in 0..1000u32 {
        if round % 3 == 2 {
            // Release the smallest live id.
            let &small = live.iter().min().unwrap();
            assert!(generator.release(ClientId(small)));
            live.remove(&small);
        } else {
            let id = generator.allocate().unwrap();
            assert!(live.insert(id.get()), "duplicate live id {id}");
        }
    }
    assert_eq!(generator.live_count(), live.len());
}
