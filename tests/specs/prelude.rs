// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared harness for the end-to-end specs: a manually driven runtime
//! plus a fake application speaking the IPC protocol over a duplex pipe.

use std::sync::Arc;
use std::time::Duration;

pub use sipd_core::config::{
    Config, EventConfig, MachineConfig, ProvidedInstance, RequiredInstance, SdClientTimers,
    SdServerTimers, ServiceInterface,
};
pub use sipd_core::{
    ClientId, EventId, EventgroupId, FakeClock, InstanceId, MajorVersion, MinorVersion,
    ServiceId, ServiceInstanceId, SessionId, Ttl, VersionPolicy,
};
pub use sipd_daemon::app::connection::{Connection, ConnectionId};
pub use sipd_daemon::event::Event;
pub use sipd_daemon::iam::{AllowAll, IamPolicy, StaticPolicy};
pub use sipd_daemon::runtime::{Runtime, RuntimeDeps};
pub use sipd_daemon::sd::endpoint::{decode_datagram, encode_datagram, RecordingSdSender};
pub use sipd_daemon::sd::jitter::MinJitter;
pub use sipd_daemon::services::transport::RecordingTransport;
pub use sipd_wire::sd::{OptionRun, SdEntry, SdEntryPayload, SdEntryType, SdMessage, SdOption};
pub use sipd_wire::{
    encode_message, ControlReturnCode, MessageType, RawFrame, ReleaseServicePayload,
    RequestServiceResponsePayload, ServiceInstancePayload, SpecificHeader, SubscribeEventPayload,
};

pub const SD_PEER: &str = "10.0.0.2:30490";
pub const OTHER_PEER: &str = "10.0.0.3:30490";

/// Default timers used by every spec: window minimum is 10ms, repetition
/// base 200ms with two repetitions.
pub fn client_timers() -> SdClientTimers {
    SdClientTimers {
        initial_delay_min_ms: 10,
        initial_delay_max_ms: 100,
        repetitions_base_delay_ms: 200,
        repetitions_max: 2,
        find_ttl: Ttl::INFINITE,
        subscribe_ttl: Ttl(300),
    }
}

pub fn base_config(instance: InstanceId) -> Config {
    Config {
        machine: MachineConfig {
            unicast_address: "10.0.0.1".parse().unwrap(),
            subnet_prefix_len: 24,
            sd_multicast_address: "224.244.224.245".parse().unwrap(),
            sd_port: 30490,
            user_udp_port: 30600,
        },
        services: vec![ServiceInterface {
            service: ServiceId(0x1234),
            major: MajorVersion(1),
            minor: MinorVersion(0),
            methods: vec![sipd_core::MethodId(0x0001)],
            events: vec![
                EventConfig { event: EventId(0x8001), eventgroup: EventgroupId(1), field: false },
                EventConfig { event: EventId(0x8002), eventgroup: EventgroupId(1), field: true },
            ],
        }],
        required: vec![RequiredInstance {
            service: ServiceId(0x1234),
            instance,
            major: MajorVersion(1),
            minor: MinorVersion(0),
            version_policy: VersionPolicy::ExactOrAnyMinorVersion,
            requires_udp: true,
            requires_tcp: false,
            eventgroups: vec![EventgroupId(1)],
            sd: client_timers(),
        }],
        provided: vec![],
        iam_enabled: false,
    }
}

pub fn target_id(instance: u16) -> ServiceInstanceId {
    ServiceInstanceId::new(ServiceId(0x1234), MajorVersion(1), MinorVersion(0), InstanceId(instance))
}

/// A runtime driven by hand plus its recorded outputs.
pub struct Sim {
    pub clock: FakeClock,
    pub runtime: Runtime<FakeClock>,
    pub events: sipd_daemon::event::EventSender,
    pub sd_out: Arc<RecordingSdSender>,
    pub transport: Arc<RecordingTransport>,
    next_conn: u32,
}

impl Sim {
    pub fn new(config: Config) -> Sim {
        Sim::with_iam(config, Arc::new(AllowAll))
    }

    pub fn with_iam(config: Config, iam: Arc<dyn IamPolicy>) -> Sim {
        let sd_out = Arc::new(RecordingSdSender::new());
        let transport = Arc::new(RecordingTransport::new());
        let clock = FakeClock::new();
        let deps = RuntimeDeps {
            config: Arc::new(config),
            iam,
            transport: Arc::clone(&transport) as Arc<dyn sipd_daemon::services::NetTransport>,
            sd_out: Arc::clone(&sd_out) as Arc<dyn sipd_daemon::sd::SdSender>,
        };
        let (mut runtime, events) =
            Runtime::new(deps, clock.clone(), Box::new(MinJitter), 256);
        runtime.handle_event(Event::NetworkUp);
        Sim { clock, runtime, events, sd_out, transport, next_conn: 1 }
    }

    /// Connect a fake application.
    pub fn connect(&mut self) -> App {
        let (app_side, daemon_side) = tokio::io::duplex(1 << 20);
        let (read_half, write_half) = tokio::io::split(daemon_side);
        let id = ConnectionId(self.next_conn);
        self.next_conn += 1;
        let connection =
            Connection::spawn(id, read_half, write_half, 100, self.events.clone());
        self.runtime.handle_event(Event::Accepted {
            connection: connection.clone(),
            credentials: sipd_core::Credentials { uid: 1000, gid: 1000 },
        });
        let (read, write) = tokio::io::split(app_side);
        drop(connection);
        App { id, read, write }
    }

    /// Let the I/O tasks run, then process everything queued on the bus.
    pub async fn settle(&mut self) {
        tokio::time::sleep(Duration::from_millis(20)).await;
        self.runtime.pump();
    }

    /// Advance the fake clock and run due timers plus queued events.
    pub fn advance_ms(&mut self, ms: u64) {
        self.clock.advance_ms(ms);
        self.runtime.fire_due_timers();
        self.runtime.pump();
    }

    /// Inject an SD datagram as if it arrived from the network.
    pub fn inject_sd(&mut self, from: &str, multicast: bool, message: &SdMessage) {
        self.runtime.handle_event(Event::SdDatagram {
            from: from.parse().unwrap(),
            multicast,
            datagram: encode_datagram(message),
        });
        self.runtime.pump();
    }

    /// Find datagrams sent to the multicast channel, decoded.
    pub fn multicast_messages(&self) -> Vec<SdMessage> {
        self.sd_out
            .sent()
            .into_iter()
            .filter(|(to, _)| to.ip().to_string() == "224.244.224.245")
            .map(|(_, datagram)| decode_datagram(&datagram).unwrap())
            .collect()
    }

    pub fn sent_find_count(&self) -> usize {
        self.multicast_messages()
            .iter()
            .flat_map(|m| &m.entries)
            .filter(|e| e.entry_type == SdEntryType::FindService)
            .count()
    }
}

/// One fake application on the far side of an IPC connection.
pub struct App {
    pub id: ConnectionId,
    pub read: tokio::io::ReadHalf<tokio::io::DuplexStream>,
    pub write: tokio::io::WriteHalf<tokio::io::DuplexStream>,
}

impl App {
    pub async fn send_frame(&mut self, frame: Vec<u8>) {
        sipd_wire::write_frame(&mut self.write, &frame).await.unwrap();
    }

    /// Next daemon→app message, decoded. Panics after 500ms of silence.
    pub async fn recv(&mut self) -> (MessageType, SpecificHeader, Vec<u8>) {
        let raw = sipd_wire::ipc::read_frame_timeout(&mut self.read, Duration::from_millis(500))
            .await
            .expect("expected an IPC message");
        let (message_type, header, payload) = raw.decode().expect("decodable IPC message");
        (message_type, header, payload.to_vec())
    }

    /// Assert that nothing arrives within the grace window.
    pub async fn expect_silence(&mut self) {
        let result =
            sipd_wire::ipc::read_frame_timeout(&mut self.read, Duration::from_millis(100)).await;
        assert!(result.is_err(), "unexpected IPC message: {result:?}");
    }

    pub async fn request_service(
        &mut self,
        sim: &mut Sim,
        id: ServiceInstanceId,
    ) -> (ControlReturnCode, Option<ClientId>) {
        let payload = ServiceInstancePayload::from_id(id).encode();
        let frame = encode_message(
            MessageType::RequestService,
            &SpecificHeader::Control { return_code: 0 },
            &payload,
        );
        self.send_frame(frame).await;
        sim.settle().await;

        let (message_type, header, body) = self.recv().await;
        let SpecificHeader::Control { return_code } = header else {
            panic!("expected control header, got {header:?}");
        };
        let code = ControlReturnCode::from_wire(return_code).unwrap();
        match message_type {
            MessageType::RequestServiceAck => {
                let client = RequestServiceResponsePayload::decode(&body).unwrap().client;
                (code, Some(client))
            }
            MessageType::RequestServiceNack => (code, None),
            other => panic!("unexpected response type {other:?}"),
        }
    }

    pub async fn release_service(&mut self, sim: &mut Sim, id: ServiceInstanceId, client: ClientId) {
        let payload = ReleaseServicePayload {
            target: ServiceInstancePayload::from_id(id),
            client,
        }
        .encode();
        let frame = encode_message(
            MessageType::ReleaseService,
            &SpecificHeader::Control { return_code: 0 },
            &payload,
        );
        self.send_frame(frame).await;
        sim.settle().await;
    }

    pub async fn start_discovery(&mut self, sim: &mut Sim, id: ServiceInstanceId) {
        let payload = ServiceInstancePayload::from_id(id).encode();
        let frame = encode_message(
            MessageType::StartServiceDiscovery,
            &SpecificHeader::Control { return_code: 0 },
            &payload,
        );
        self.send_frame(frame).await;
        sim.settle().await;
    }

    pub async fn subscribe_event(
        &mut self,
        sim: &mut Sim,
        id: ServiceInstanceId,
        event: EventId,
        client: ClientId,
    ) {
        let payload = SubscribeEventPayload {
            target: ServiceInstancePayload::from_id(id),
            event,
            client,
        }
        .encode();
        let frame = encode_message(
            MessageType::SubscribeEvent,
            &SpecificHeader::Control { return_code: 0 },
            &payload,
        );
        self.send_frame(frame).await;
        sim.settle().await;
    }
}

// — SD message builders —

pub fn offer_message(session: u16, instance: u16, ttl: u32) -> SdMessage {
    SdMessage {
        reboot: true,
        unicast: true,
        session: SessionId(session),
        entries: vec![SdEntry {
            entry_type: SdEntryType::OfferService,
            options: OptionRun::first(0, 2),
            service: ServiceId(0x1234),
            instance: InstanceId(instance),
            major: MajorVersion(1),
            ttl: Ttl(ttl),
            payload: SdEntryPayload::Service { minor: MinorVersion(0) },
        }],
        options: vec![
            SdOption::udp("10.0.0.2".parse().unwrap(), 30500),
            SdOption::tcp("10.0.0.2".parse().unwrap(), 30501),
        ],
    }
}

pub fn stop_offer_message(session: u16, instance: u16) -> SdMessage {
    let mut message = offer_message(session, instance, 0);
    message.entries[0].options = OptionRun::NONE;
    message.options.clear();
    message
}

pub fn ack_message(session: u16, instance: u16, eventgroup: u16, ttl: u32) -> SdMessage {
    SdMessage {
        reboot: true,
        unicast: true,
        session: SessionId(session),
        entries: vec![SdEntry {
            entry_type: SdEntryType::SubscribeEventgroupAck,
            options: OptionRun::NONE,
            service: ServiceId(0x1234),
            instance: InstanceId(instance),
            major: MajorVersion(1),
            ttl: Ttl(ttl),
            payload: SdEntryPayload::Eventgroup {
                counter: 0,
                eventgroup: EventgroupId(eventgroup),
            },
        }],
        options: vec![],
    }
}

/// An otherwise empty SD message carrying specific session counters.
pub fn heartbeat_message(session: u16, reboot: bool) -> SdMessage {
    SdMessage {
        reboot,
        unicast: true,
        session: SessionId(session),
        entries: vec![],
        options: vec![],
    }
}
