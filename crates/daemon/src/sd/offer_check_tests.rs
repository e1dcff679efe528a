// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use sipd_core::config::SdClientTimers;
use sipd_core::{InstanceId, MajorVersion, MinorVersion, ServiceId, Ttl, VersionPolicy};
use yare::parameterized;

use super::*;

fn machine() -> MachineConfig {
    MachineConfig {
        unicast_address: "10.0.0.1".parse().unwrap(),
        subnet_prefix_len: 24,
        sd_multicast_address: "224.244.224.245".parse().unwrap(),
        sd_port: 30490,
        user_udp_port: 30600,
    }
}

fn required(udp: bool, tcp: bool) -> RequiredInstance {
    RequiredInstance {
        service: ServiceId(0x1234),
        instance: InstanceId(5),
        major: MajorVersion(1),
        minor: MinorVersion(0),
        version_policy: VersionPolicy::ExactOrAnyMinorVersion,
        requires_udp: udp,
        requires_tcp: tcp,
        eventgroups: vec![],
        sd: SdClientTimers {
            initial_delay_min_ms: 10,
            initial_delay_max_ms: 100,
            repetitions_base_delay_ms: 200,
            repetitions_max: 3,
            find_ttl: Ttl::INFINITE,
            subscribe_ttl: Ttl(300),
        },
    }
}

#[parameterized(
    same_net        = { "10.0.0.77", true },
    other_net       = { "10.0.1.77", false },
    gateway_net     = { "192.168.0.1", false },
)]
fn subnet_membership(addr: &str, expect: bool) {
    assert_eq!(in_local_subnet(&machine(), addr.parse().unwrap()), expect);
}

#[test]
fn zero_prefix_accepts_everything() {
    let mut machine = machine();
    machine.subnet_prefix_len = 0;
    assert!(in_local_subnet(&machine, "1.2.3.4".parse().unwrap()));
}

#[test]
fn missing_required_udp_endpoint_is_rejected() {
    let endpoints =
        EntryEndpoints { udp: None, tcp: Some("10.0.0.2:30501".parse().unwrap()) };
    assert_eq!(
        check_offer_endpoints(&machine(), &required(true, true), &endpoints),
        Err(OfferCheckError::MissingEndpoint(TransportProto::Udp))
    );
}

#[test]
fn optional_transport_may_be_absent() {
    let endpoints =
        EntryEndpoints { udp: Some("10.0.0.2:30500".parse().unwrap()), tcp: None };
    assert_eq!(check_offer_endpoints(&machine(), &required(true, false), &endpoints), Ok(()));
}

#[test]
fn out_of_subnet_endpoint_is_rejected() {
    let endpoints =
        EntryEndpoints { udp: Some("10.9.9.2:30500".parse().unwrap()), tcp: None };
    assert_eq!(
        check_offer_endpoints(&machine(), &required(true, false), &endpoints),
        Err(OfferCheckError::OutsideSubnet("10.9.9.2".parse().unwrap()))
    );
}
