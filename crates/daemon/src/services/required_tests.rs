// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use sipd_core::config::{MachineConfig, SdClientTimers};
use sipd_core::{
    Clock, EventgroupId, FakeClock, MajorVersion, MinorVersion, Scheduler, ServiceId, Ttl,
    VersionPolicy,
};

use super::*;
use crate::sd::entries::EntryEndpoints;
use crate::sd::jitter::MinJitter;
use crate::services::transport::RecordingTransport;

struct Harness {
    clock: FakeClock,
    timers: Scheduler,
    jitter: MinJitter,
    sd: SdScheduler,
    machine: MachineConfig,
    rsi: RequiredServiceInstance,
}

fn required(instance: u16) -> RequiredInstance {
    RequiredInstance {
        service: ServiceId(0x1234),
        instance: InstanceId(instance),
        major: MajorVersion(1),
        minor: MinorVersion(0),
        version_policy: VersionPolicy::ExactOrAnyMinorVersion,
        requires_udp: true,
        requires_tcp: false,
        eventgroups: vec![EventgroupId(1)],
        sd: SdClientTimers {
            initial_delay_min_ms: 10,
            initial_delay_max_ms: 100,
            repetitions_base_delay_ms: 200,
            repetitions_max: 2,
            find_ttl: Ttl::INFINITE,
            subscribe_ttl: Ttl(300),
        },
    }
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

fn offer_for(instance: u16) -> OfferEntry {
    OfferEntry {
        id: ServiceInstanceId::new(
            ServiceId(0x1234),
            MajorVersion(1),
            MinorVersion(0),
            InstanceId(instance),
        ),
        ttl: Ttl(30),
        endpoints: EntryEndpoints {
            udp: Some("10.0.0.2:30500".parse().unwrap()),
            tcp: None,
        },
    }
}

impl Harness {
    fn specific() -> Self {
        Self::with_config(required(5))
    }

    fn wildcard() -> Self {
        Self::with_config(required(0xFFFF))
    }

    fn with_config(config: RequiredInstance) -> Self {
        let transport = Arc::new(RecordingTransport::new());
        let mut h = Self {
            clock: FakeClock::new(),
            timers: Scheduler::new(),
            jitter: MinJitter,
            sd: SdScheduler::new(),
            machine: machine(),
            rsi: RequiredServiceInstance::new(config, transport),
        };
        h.drive(|rsi, sd, ctx| rsi.on_network_up(sd, ctx));
        h
    }

    fn drive<R>(
        &mut self,
        f: impl FnOnce(&mut RequiredServiceInstance, &mut SdScheduler, &mut SdCtx<'_>) -> R,
    ) -> R {
        let mut ctx = SdCtx {
            now: self.clock.now(),
            timers: &mut self.timers,
            jitter: &mut self.jitter,
        };
        f(&mut self.rsi, &mut self.sd, &mut ctx)
    }

    fn offer(&mut self, instance: u16) -> OfferOutcome {
        let machine = self.machine.clone();
        let entry = offer_for(instance);
        self.drive(|rsi, sd, ctx| {
            rsi.on_offer_entry(
                &machine,
                "10.0.0.2:30490".parse().unwrap(),
                entry,
                false,
                sd,
                ctx,
            )
        })
    }
}

#[test]
fn client_ids_are_unique_and_reusable() {
    let mut h = Harness::specific();
    let a = h.drive(|rsi, sd, ctx| rsi.request_service(InstanceId(5), sd, ctx)).unwrap();
    let b = h.drive(|rsi, sd, ctx| rsi.request_service(InstanceId(5), sd, ctx)).unwrap();
    assert_eq!(a, ClientId(1));
    assert_eq!(b, ClientId(2));

    assert!(h.drive(|rsi, sd, ctx| rsi.release_service(a, sd, ctx)));
    assert!(!h.drive(|rsi, sd, ctx| rsi.release_service(a, sd, ctx)), "double release");
    let c = h.drive(|rsi, sd, ctx| rsi.request_service(InstanceId(5), sd, ctx)).unwrap();
    assert_eq!(c, ClientId(1));
}

#[test]
fn specific_request_succeeds_before_any_offer() {
    let mut h = Harness::specific();
    let id = h.drive(|rsi, sd, ctx| rsi.request_service(InstanceId(5), sd, ctx));
    assert!(id.is_ok());
    assert!(h.rsi.offered_services().is_empty());
}

#[test]
fn wildcard_request_requires_a_discovered_instance() {
    let mut h = Harness::wildcard();
    h.drive(|rsi, sd, ctx| rsi.start_discovery(sd, ctx));

    let result = h.drive(|rsi, sd, ctx| rsi.request_service(InstanceId(7), sd, ctx));
    assert_eq!(result, Err(RequestServiceError::RemoteServerNotFound));

    assert!(matches!(h.offer(7), OfferOutcome::Up(_)));
    let result = h.drive(|rsi, sd, ctx| rsi.request_service(InstanceId(7), sd, ctx));
    assert_eq!(result, Ok(ClientId(1)));
}

#[test]
fn offer_intake_creates_the_remote_server() {
    let mut h = Harness::specific();
    h.drive(|rsi, sd, ctx| rsi.start_discovery(sd, ctx));

    match h.offer(5) {
        OfferOutcome::Up(id) => assert_eq!(id.instance, InstanceId(5)),
        other => panic!("unexpected outcome {other:?}"),
    }
    assert!(h.rsi.remote(InstanceId(5)).is_some());
    assert!(h.rsi.remote(InstanceId(5)).unwrap().is_available());
    assert_eq!(h.rsi.offered_services().len(), 1);

    // A matching renewal is not a new Up.
    assert_eq!(h.offer(5), OfferOutcome::Renewed(InstanceId(5)));
}

#[test]
fn stop_offer_takes_the_remote_server_down() {
    let mut h = Harness::specific();
    h.drive(|rsi, sd, ctx| rsi.start_discovery(sd, ctx));
    h.offer(5);

    let mut stop = offer_for(5);
    stop.ttl = Ttl::ZERO;
    let down = h.drive(|rsi, sd, ctx| {
        rsi.on_stop_offer_entry("10.0.0.2:30490".parse().unwrap(), &stop, sd, ctx)
    });
    assert_eq!(down.len(), 1);
    assert_eq!(down[0].instance, InstanceId(5));
    assert!(!h.rsi.remote(InstanceId(5)).unwrap().is_available());
    assert!(h.rsi.offered_services().is_empty());
}

#[test]
fn reboot_reports_lost_instances() {
    let mut h = Harness::wildcard();
    h.drive(|rsi, sd, ctx| rsi.start_discovery(sd, ctx));
    h.offer(7);
    h.offer(9);

    let down = h.drive(|rsi, sd, ctx| {
        rsi.on_reboot_detected("10.0.0.2:30490".parse().unwrap(), sd, ctx)
    });
    assert_eq!(down.len(), 2);
    assert!(h.rsi.offered_services().is_empty());
}

#[test]
fn wildcard_reap_respawns_still_required_children() {
    let mut h = Harness::wildcard();
    h.drive(|rsi, sd, ctx| rsi.start_discovery(sd, ctx));
    h.offer(7);
    h.offer(9);

    let mut stop7 = offer_for(7);
    stop7.ttl = Ttl::ZERO;
    let mut stop9 = offer_for(9);
    stop9.ttl = Ttl::ZERO;
    h.drive(|rsi, sd, ctx| {
        rsi.on_stop_offer_entry("10.0.0.2:30490".parse().unwrap(), &stop7, sd, ctx)
    });
    h.drive(|rsi, sd, ctx| {
        rsi.on_stop_offer_entry("10.0.0.2:30490".parse().unwrap(), &stop9, sd, ctx)
    });

    // Instance 9 still has a live client; 7 does not.
    h.rsi.reap_stopped_children(|instance| instance == InstanceId(9));

    // A fresh offer for 9 is accepted again; 7 spawns a brand new child.
    assert!(matches!(h.offer(9), OfferOutcome::Up(_)));
    assert!(matches!(h.offer(7), OfferOutcome::Up(_)));
}

#[test]
fn discovery_demand_is_counted_not_boolean() {
    let mut h = Harness::specific();
    h.drive(|rsi, sd, ctx| rsi.start_discovery(sd, ctx));
    let _client = h.drive(|rsi, sd, ctx| rsi.request_service(InstanceId(5), sd, ctx)).unwrap();

    // Dropping only one of the two demands keeps the search alive: the
    // phase timer for the find sequence stays armed.
    h.drive(|rsi, sd, ctx| rsi.stop_discovery(sd, ctx));
    assert!(h.timers.has_timers());
}
