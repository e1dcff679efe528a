// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The runtime loop.
//!
//! One task owns every piece of daemon state and processes events from
//! the bus to completion, one at a time; timers fire between events. I/O
//! tasks (IPC connections, the SD sockets, the acceptor) only post events
//! and never touch state, so nothing here needs a lock.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use sipd_core::config::Config;
use sipd_core::{
    Clock, InstanceKey, MajorVersion, Scheduler, SdTarget, ServiceInstanceId, TimerKey,
};
use sipd_wire::sd::{OptionRun, SdEntry, SdEntryPayload, SdEntryType, SdMessage, SdOption};

use crate::app::command::{self, CommandDeps};
use crate::app::connection::ConnectionId;
use crate::app::manager::ApplicationManager;
use crate::app::recv;
use crate::event::{Event, EventSender};
use crate::iam::IamPolicy;
use crate::sd::endpoint::{decode_datagram, encode_datagram, SdSender, SessionPool};
use crate::sd::entries::{AckEntry, EntryEndpoints, InterpretedEntry, SubscribeEntry};
use crate::sd::jitter::JitterSource;
use crate::sd::processor::interpret_message;
use crate::sd::reboot::RebootDetector;
use crate::sd::scheduler::{PostSendAction, SdCtx, SdJob, SdScheduler, Transmission};
use crate::sd::server_offer::ServerOffer;
use crate::services::local_server::{LocalServer, LocalServerManager};
use crate::services::required::{OfferOutcome, RequiredServiceInstance};
use crate::services::transport::NetTransport;
use crate::stats::{SdDropReason, Stats};
use crate::validator::PacketValidator;

/// External collaborators injected at startup.
pub struct RuntimeDeps {
    pub config: Arc<Config>,
    pub iam: Arc<dyn IamPolicy>,
    pub transport: Arc<dyn NetTransport>,
    pub sd_out: Arc<dyn SdSender>,
}

/// See the module docs.
pub struct Runtime<C: Clock> {
    clock: C,
    jitter: Box<dyn JitterSource>,
    timers: Scheduler,
    sd: SdScheduler,
    events: EventSender,
    rx: mpsc::UnboundedReceiver<Event>,

    config: Arc<Config>,
    iam: Arc<dyn IamPolicy>,
    transport: Arc<dyn NetTransport>,
    sd_out: Arc<dyn SdSender>,
    validator: PacketValidator,

    apps: ApplicationManager,
    rsis: Vec<RequiredServiceInstance>,
    server_offers: Vec<ServerOffer>,
    server_manager: LocalServerManager,
    local_servers: HashMap<ServiceInstanceId, LocalServer>,

    reboot: RebootDetector,
    sessions: SessionPool,
    stats: Stats,
    network_up: bool,
}

impl<C: Clock> Runtime<C> {
    pub fn new(
        deps: RuntimeDeps,
        clock: C,
        jitter: Box<dyn JitterSource>,
        max_applications: usize,
    ) -> (Self, EventSender) {
        let (events, rx) = crate::event::event_bus();
        let rsis = deps
            .config
            .required
            .iter()
            .map(|required| {
                RequiredServiceInstance::new(required.clone(), Arc::clone(&deps.transport))
            })
            .collect();
        let server_offers =
            deps.config.provided.iter().map(|provided| ServerOffer::new(provided.clone())).collect();
        let validator = PacketValidator::new(Arc::clone(&deps.config), Arc::clone(&deps.iam));
        let runtime = Self {
            clock,
            jitter,
            timers: Scheduler::new(),
            sd: SdScheduler::new(),
            events: events.clone(),
            rx,
            config: deps.config,
            iam: deps.iam,
            transport: deps.transport,
            sd_out: deps.sd_out,
            validator,
            apps: ApplicationManager::new(max_applications),
            rsis,
            server_offers,
            server_manager: LocalServerManager::new(),
            local_servers: HashMap::new(),
            reboot: RebootDetector::new(),
            sessions: SessionPool::new(),
            stats: Stats::new(),
            network_up: false,
        };
        (runtime, events)
    }

    pub fn stats(&self) -> &Stats {
        &self.stats
    }

    /// Drain and handle every event queued on the bus. Test harnesses
    /// drive the loop manually with this instead of `run`.
    #[cfg(any(test, feature = "test-support"))]
    pub fn pump(&mut self) {
        while let Ok(event) = self.rx.try_recv() {
            if matches!(event, Event::Shutdown) {
                continue;
            }
            self.handle_event(event);
        }
    }

    pub fn applications(&self) -> usize {
        self.apps.len()
    }

    /// Run until a Shutdown event arrives or every sender is gone.
    pub async fn run(mut self) {
        info!(
            required = self.rsis.len(),
            provided = self.server_offers.len(),
            "runtime started"
        );
        loop {
            let deadline = self.timers.next_deadline();
            let next = tokio::select! {
                event = self.rx.recv() => match event {
                    None | Some(Event::Shutdown) => break,
                    Some(event) => Some(event),
                },
                _ = sleep_until_deadline(deadline) => None,
            };
            match next {
                Some(event) => self.handle_event(event),
                None => self.fire_due_timers(),
            }
        }
        self.shutdown();
    }

    fn shutdown(&mut self) {
        info!("runtime shutting down");
        let mut ctx = SdCtx {
            now: self.clock.now(),
            timers: &mut self.timers,
            jitter: self.jitter.as_mut(),
        };
        for rsi in &mut self.rsis {
            rsi.shutdown(&mut self.sd, &mut ctx);
        }
        let _ = self.apps.drain_all();
    }

    /// Process one event to completion.
    pub fn handle_event(&mut self, event: Event) {
        match event {
            Event::Accepted { connection, credentials } => {
                self.apps.on_accepted(
                    connection,
                    credentials,
                    self.iam.as_ref(),
                    self.config.iam_enabled,
                );
            }
            Event::Frame { conn, frame } => {
                let now = self.clock.now();
                let Some(app) = self.apps.get_mut(conn) else {
                    debug!(%conn, "frame from unknown connection");
                    return;
                };
                let mut ctx = SdCtx {
                    now,
                    timers: &mut self.timers,
                    jitter: self.jitter.as_mut(),
                };
                let mut deps = CommandDeps {
                    config: &self.config,
                    iam: self.iam.as_ref(),
                    rsis: &mut self.rsis,
                    server_manager: &mut self.server_manager,
                    local_servers: &mut self.local_servers,
                    server_offers: &mut self.server_offers,
                    transport: &self.transport,
                };
                recv::handle_frame(
                    app,
                    &frame,
                    &self.validator,
                    &mut deps,
                    &mut self.stats,
                    &mut self.sd,
                    &mut ctx,
                );
            }
            Event::Disconnected { conn } => self.release_application(conn),
            Event::SdDatagram { from, multicast, datagram } => {
                self.handle_sd_datagram(from, multicast, &datagram)
            }
            Event::NetworkUp => self.set_network(true),
            Event::NetworkDown => self.set_network(false),
            Event::ReapApplications => {
                let _ = self.apps.reap_disconnected();
            }
            Event::ReapSdChildren { key } => {
                let apps = &self.apps;
                if let Some(rsi) = self.rsis.iter_mut().find(|rsi| rsi.key() == key) {
                    rsi.reap_stopped_children(|instance| {
                        apps.any_client_for_instance(key.service, instance)
                    });
                }
            }
            Event::Shutdown => {
                // Handled by the run loop; nothing to do when fed directly.
            }
        }
    }

    /// Fire every timer whose deadline passed.
    pub fn fire_due_timers(&mut self) {
        let now = self.clock.now();
        for key in self.timers.fired_timers(now) {
            self.dispatch_timer(key);
        }
    }

    fn dispatch_timer(&mut self, key: TimerKey) {
        let now = self.clock.now();
        match key {
            TimerKey::ClientPhase(instance_key) => {
                let mut ctx = SdCtx {
                    now,
                    timers: &mut self.timers,
                    jitter: self.jitter.as_mut(),
                };
                if let Some(rsi) =
                    self.rsis.iter_mut().find(|rsi| rsi.owns_key(instance_key))
                {
                    rsi.on_phase_timer(instance_key, &mut self.sd, &mut ctx);
                }
            }
            TimerKey::OfferTtl(instance_key) => {
                let mut ctx = SdCtx {
                    now,
                    timers: &mut self.timers,
                    jitter: self.jitter.as_mut(),
                };
                let mut downs = Vec::new();
                let mut reap = None;
                if let Some(rsi) =
                    self.rsis.iter_mut().find(|rsi| rsi.owns_key(instance_key))
                {
                    downs = rsi.on_ttl_expired(instance_key, &mut self.sd, &mut ctx);
                    if !downs.is_empty() && rsi.is_wildcard() {
                        reap = Some(rsi.key());
                    }
                }
                self.notify_down(&downs);
                if let Some(key) = reap {
                    self.events.emit(Event::ReapSdChildren { key });
                }
            }
            TimerKey::ServerPhase(instance_key) => {
                let mut ctx = SdCtx {
                    now,
                    timers: &mut self.timers,
                    jitter: self.jitter.as_mut(),
                };
                if let Some(offer) =
                    self.server_offers.iter_mut().find(|offer| offer.key() == instance_key)
                {
                    offer.on_phase_timer(&self.config.machine, &mut self.sd, &mut ctx);
                }
            }
            TimerKey::SdFlush(_) | TimerKey::CyclicOffer(_) | TimerKey::OfferRepetition(_) => {
                let (transmissions, posts) = {
                    let mut ctx = SdCtx {
                        now,
                        timers: &mut self.timers,
                        jitter: self.jitter.as_mut(),
                    };
                    self.sd.on_timer(key, &mut ctx)
                };
                for transmission in transmissions {
                    self.transmit(transmission);
                }
                for post in posts {
                    self.handle_post_send(post);
                }
            }
        }
    }

    // — applications —

    /// Cleanup for a disconnected application: client resources first,
    /// then discovery watches, then server resources. Destruction of the
    /// Application itself is deferred to the ReapApplications software
    /// event.
    fn release_application(&mut self, conn: ConnectionId) {
        let Some(app) = self.apps.get_mut(conn) else { return };
        info!(%conn, "releasing application resources");
        let clients = app.take_clients();
        let watches = app.take_watches();
        let servers = app.take_servers();

        let now = self.clock.now();
        let mut ctx = SdCtx {
            now,
            timers: &mut self.timers,
            jitter: self.jitter.as_mut(),
        };
        let mut deps = CommandDeps {
            config: &self.config,
            iam: self.iam.as_ref(),
            rsis: &mut self.rsis,
            server_manager: &mut self.server_manager,
            local_servers: &mut self.local_servers,
            server_offers: &mut self.server_offers,
            transport: &self.transport,
        };

        for client in &clients {
            command::teardown_client(conn, client, &mut deps, &mut self.sd, &mut ctx);
        }
        for watch in watches {
            if let Some(rsi) =
                deps.rsis.iter_mut().find(|rsi| rsi.covers(watch.service, watch.instance))
            {
                rsi.stop_discovery(&mut self.sd, &mut ctx);
            }
        }
        for rsi in deps.rsis.iter_mut() {
            rsi.remove_connection(&deps.config.machine, conn, &mut self.sd, &mut ctx);
        }
        for server_id in servers {
            if let Some(offer) = deps
                .server_offers
                .iter_mut()
                .find(|offer| offer.key() == server_id.instance_key())
            {
                offer.on_stop_offer(&deps.config.machine, &mut self.sd, &mut ctx);
            }
            deps.local_servers.remove(&server_id.lookup_key());
            deps.server_manager.release(server_id, conn);
        }
        for server in deps.local_servers.values_mut() {
            server.remove_connection(conn);
        }

        self.events.emit(Event::ReapApplications);
    }

    // — network state —

    fn set_network(&mut self, up: bool) {
        if self.network_up == up {
            return;
        }
        self.network_up = up;
        info!(up, "network state changed");
        let now = self.clock.now();
        let mut downs = Vec::new();
        {
            let mut ctx = SdCtx {
                now,
                timers: &mut self.timers,
                jitter: self.jitter.as_mut(),
            };
            for rsi in &mut self.rsis {
                if up {
                    rsi.on_network_up(&mut self.sd, &mut ctx);
                } else {
                    downs.extend(rsi.on_network_down(&mut self.sd, &mut ctx));
                }
            }
            for offer in &mut self.server_offers {
                if up {
                    offer.on_network_up(&mut ctx);
                } else {
                    offer.on_network_down(&mut self.sd, &mut ctx);
                }
            }
        }
        self.notify_down(&downs);
    }

    // — service discovery inbound —

    fn handle_sd_datagram(&mut self, from: SocketAddr, multicast: bool, datagram: &[u8]) {
        self.stats.sd_messages_received += 1;
        let message = match decode_datagram(datagram) {
            Ok(message) => message,
            Err(err) => {
                debug!(%from, error = %err, "undecodable sd datagram");
                self.stats.count_drop(SdDropReason::UndecodableMessage);
                return;
            }
        };

        // Reboot detection runs first so stale state is cleared before the
        // new entries are consumed.
        if self.reboot.observe(from, multicast, message.session, message.reboot) {
            self.stats.reboots_detected += 1;
            warn!(%from, "peer reboot detected");
            self.on_peer_reboot(from);
        }

        let interpreted = interpret_message(&message, &mut self.stats);

        for nack in interpreted.nack_requests {
            let mut ctx = SdCtx {
                now: self.clock.now(),
                timers: &mut self.timers,
                jitter: self.jitter.as_mut(),
            };
            self.sd.schedule_nack(from, nack, &mut ctx);
        }

        for entry in interpreted.entries {
            self.dispatch_sd_entry(from, multicast, entry);
        }
    }

    fn on_peer_reboot(&mut self, from: SocketAddr) {
        let now = self.clock.now();
        let mut downs = Vec::new();
        let mut reaps = Vec::new();
        {
            let mut ctx = SdCtx {
                now,
                timers: &mut self.timers,
                jitter: self.jitter.as_mut(),
            };
            for rsi in &mut self.rsis {
                let lost = rsi.on_reboot_detected(from, &mut self.sd, &mut ctx);
                if !lost.is_empty() && rsi.is_wildcard() {
                    reaps.push(rsi.key());
                }
                downs.extend(lost);
            }
        }
        self.notify_down(&downs);
        for key in reaps {
            self.events.emit(Event::ReapSdChildren { key });
        }
    }

    fn dispatch_sd_entry(&mut self, from: SocketAddr, multicast: bool, entry: InterpretedEntry) {
        match entry {
            InterpretedEntry::Find(find) => {
                let now = self.clock.now();
                let mut ctx = SdCtx {
                    now,
                    timers: &mut self.timers,
                    jitter: self.jitter.as_mut(),
                };
                for offer in self.server_offers.iter_mut().filter(|offer| {
                    let key = offer.key();
                    key.service == find.service
                        && (find.instance.is_all() || key.instance == find.instance)
                        && (find.major == MajorVersion::ANY || key.major == find.major)
                }) {
                    offer.on_find_received(&self.config.machine, from, &mut self.sd, &mut ctx);
                }
            }
            InterpretedEntry::Offer(offer_entry) => {
                let now = self.clock.now();
                let mut ups = Vec::new();
                {
                    let mut ctx = SdCtx {
                        now,
                        timers: &mut self.timers,
                        jitter: self.jitter.as_mut(),
                    };
                    for rsi in self.rsis.iter_mut().filter(|rsi| {
                        rsi.config().major == offer_entry.id.major
                            && rsi.covers(offer_entry.id.service, offer_entry.id.instance)
                    }) {
                        match rsi.on_offer_entry(
                            &self.config.machine,
                            from,
                            offer_entry,
                            multicast,
                            &mut self.sd,
                            &mut ctx,
                        ) {
                            OfferOutcome::Up(id) => ups.push(id),
                            OfferOutcome::Renewed(_) | OfferOutcome::Ignored => {}
                        }
                    }
                }
                for id in ups {
                    self.notify_up(&id);
                }
            }
            InterpretedEntry::StopOffer(offer_entry) => {
                let now = self.clock.now();
                let mut downs = Vec::new();
                let mut reaps = Vec::new();
                {
                    let mut ctx = SdCtx {
                        now,
                        timers: &mut self.timers,
                        jitter: self.jitter.as_mut(),
                    };
                    for rsi in self.rsis.iter_mut().filter(|rsi| {
                        rsi.covers(offer_entry.id.service, offer_entry.id.instance)
                    }) {
                        let lost =
                            rsi.on_stop_offer_entry(from, &offer_entry, &mut self.sd, &mut ctx);
                        if !lost.is_empty() && rsi.is_wildcard() {
                            reaps.push(rsi.key());
                        }
                        downs.extend(lost);
                    }
                }
                self.notify_down(&downs);
                for key in reaps {
                    self.events.emit(Event::ReapSdChildren { key });
                }
            }
            InterpretedEntry::Subscribe(subscribe) => self.handle_remote_subscribe(from, subscribe),
            InterpretedEntry::StopSubscribe(subscribe) => {
                if let Some(server) = self.local_server_for(subscribe.key) {
                    if let Some(endpoint) = subscribe.endpoints.udp {
                        server.unsubscribe_remote(subscribe.eventgroup, endpoint);
                    }
                }
            }
            InterpretedEntry::Ack(ack) => {
                if let Some(rsi) = self.rsis.iter_mut().find(|rsi| {
                    rsi.config().major == ack.key.major
                        && rsi.covers(ack.key.service, ack.key.instance)
                }) {
                    rsi.on_subscribe_ack(ack.key.instance, ack.eventgroup, ack.multicast);
                }
            }
            InterpretedEntry::Nack(nack) => {
                if let Some(rsi) = self.rsis.iter_mut().find(|rsi| {
                    rsi.config().major == nack.key.major
                        && rsi.covers(nack.key.service, nack.key.instance)
                }) {
                    rsi.on_subscribe_nack(nack.key.instance, nack.eventgroup);
                }
            }
        }
    }

    /// A remote peer subscribes to a locally provided eventgroup.
    fn handle_remote_subscribe(&mut self, from: SocketAddr, subscribe: SubscribeEntry) {
        let now = self.clock.now();
        let offered = self
            .server_offers
            .iter()
            .find(|offer| offer.key() == subscribe.key)
            .is_some_and(|offer| offer.is_offered());
        let server_exists = self.local_server_for(subscribe.key).is_some();

        let mut ctx = SdCtx {
            now,
            timers: &mut self.timers,
            jitter: self.jitter.as_mut(),
        };
        if !offered || !server_exists {
            debug!(key = %subscribe.key, %from, "subscribe for unoffered instance, nacking");
            self.sd.schedule_nack(from, AckEntry::nack_for(&subscribe), &mut ctx);
            return;
        }
        let Some(endpoint) = subscribe.endpoints.udp else {
            self.sd.schedule_nack(from, AckEntry::nack_for(&subscribe), &mut ctx);
            return;
        };

        let provided = self
            .config
            .provided_instance(subscribe.key.service, subscribe.key.instance);
        let window = provided
            .map(|p| p.sd.request_response_window())
            .unwrap_or((std::time::Duration::ZERO, std::time::Duration::ZERO));

        let ack = AckEntry {
            key: subscribe.key,
            eventgroup: subscribe.eventgroup,
            counter: subscribe.counter,
            ttl: subscribe.ttl,
            multicast: None,
        };
        let post = PostSendAction::SubscribeAcked {
            key: subscribe.key,
            eventgroup: subscribe.eventgroup,
            subscriber: std::net::SocketAddr::V4(endpoint),
        };
        self.sd.schedule_ack(from, ack, window, Some(post), &mut ctx);

        if let Some(server) = self.local_server_for(subscribe.key) {
            server.subscribe_remote(subscribe.eventgroup, endpoint);
        }
    }

    fn local_server_for(&mut self, key: InstanceKey) -> Option<&mut LocalServer> {
        self.local_servers
            .values_mut()
            .find(|server| server.id().instance_key() == key)
    }

    fn handle_post_send(&mut self, post: PostSendAction) {
        match post {
            PostSendAction::EnterMainPhase(key) => {
                let now = self.clock.now();
                let mut ctx = SdCtx {
                    now,
                    timers: &mut self.timers,
                    jitter: self.jitter.as_mut(),
                };
                if let Some(offer) =
                    self.server_offers.iter_mut().find(|offer| offer.key() == key)
                {
                    offer.on_enter_main_phase(&self.config.machine, &mut self.sd, &mut ctx);
                }
            }
            PostSendAction::SubscribeAcked { key, eventgroup, subscriber } => {
                // Initial field values for the fresh remote subscriber.
                let Some(service) = self.config.service(key.service, key.major) else {
                    return;
                };
                let service = service.clone();
                let transport = Arc::clone(&self.transport);
                if let Some(server) = self.local_server_for(key) {
                    for value in server.cached_fields(&service, eventgroup) {
                        transport.send(sipd_wire::TransportProto::Udp, subscriber, value);
                    }
                }
            }
        }
    }

    // — app notifications —

    fn notify_up(&mut self, id: &ServiceInstanceId) {
        for app in self.apps.iter() {
            if app.watches(*id) {
                let _ = app.send_router().on_service_instance_up(id);
            }
        }
    }

    fn notify_down(&mut self, downs: &[ServiceInstanceId]) {
        for id in downs {
            debug!(instance = %id, "service instance down");
            for app in self.apps.iter() {
                if app.watches(*id) {
                    let _ = app.send_router().on_service_instance_down(id);
                }
            }
        }
    }

    // — service discovery outbound —

    fn transmit(&mut self, transmission: Transmission) {
        let to = match transmission.target {
            SdTarget::Multicast => self.sd_out.multicast_target(),
            SdTarget::Unicast(addr) => addr,
        };
        let (session, reboot) = self.sessions.next(transmission.target);
        let message = compose_message(session, reboot, &transmission.jobs);
        debug!(%to, entries = message.entries.len(), "sd message sent");
        self.sd_out.send(to, encode_datagram(&message));
    }
}

/// Compose one wire message from scheduled jobs, deduplicating options.
fn compose_message(
    session: sipd_core::SessionId,
    reboot: bool,
    jobs: &[SdJob],
) -> SdMessage {
    let mut message = SdMessage {
        reboot,
        unicast: true,
        session,
        entries: Vec::with_capacity(jobs.len()),
        options: Vec::new(),
    };
    for job in jobs {
        let entry = match *job {
            SdJob::Find(find) => SdEntry {
                entry_type: SdEntryType::FindService,
                options: OptionRun::NONE,
                service: find.service,
                instance: find.instance,
                major: find.major,
                ttl: find.ttl,
                payload: SdEntryPayload::Service { minor: find.minor },
            },
            SdJob::Offer(offer) => SdEntry {
                entry_type: SdEntryType::OfferService,
                options: endpoint_options(&mut message.options, &offer.endpoints),
                service: offer.id.service,
                instance: offer.id.instance,
                major: offer.id.major,
                ttl: offer.ttl,
                payload: SdEntryPayload::Service { minor: offer.id.minor },
            },
            SdJob::Subscribe(subscribe) => SdEntry {
                entry_type: SdEntryType::SubscribeEventgroup,
                options: endpoint_options(&mut message.options, &subscribe.endpoints),
                service: subscribe.key.service,
                instance: subscribe.key.instance,
                major: subscribe.key.major,
                ttl: subscribe.ttl,
                payload: SdEntryPayload::Eventgroup {
                    counter: subscribe.counter,
                    eventgroup: subscribe.eventgroup,
                },
            },
            SdJob::Ack(ack) => {
                let options = match ack.multicast {
                    Some(multicast) => {
                        let index = intern_option(
                            &mut message.options,
                            SdOption::Ipv4Multicast {
                                addr: *multicast.ip(),
                                port: multicast.port(),
                            },
                        );
                        OptionRun::first(index, 1)
                    }
                    None => OptionRun::NONE,
                };
                SdEntry {
                    entry_type: SdEntryType::SubscribeEventgroupAck,
                    options,
                    service: ack.key.service,
                    instance: ack.key.instance,
                    major: ack.key.major,
                    ttl: ack.ttl,
                    payload: SdEntryPayload::Eventgroup {
                        counter: ack.counter,
                        eventgroup: ack.eventgroup,
                    },
                }
            }
        };
        message.entries.push(entry);
    }
    message
}

fn endpoint_options(options: &mut Vec<SdOption>, endpoints: &EntryEndpoints) -> OptionRun {
    let mut indices = Vec::new();
    if let Some(udp) = endpoints.udp {
        indices.push(intern_option(options, SdOption::udp(*udp.ip(), udp.port())));
    }
    if let Some(tcp) = endpoints.tcp {
        indices.push(intern_option(options, SdOption::tcp(*tcp.ip(), tcp.port())));
    }
    match indices.as_slice() {
        [] => OptionRun::NONE,
        [single] => OptionRun::first(*single, 1),
        [first, second] if *second == first + 1 => OptionRun::first(*first, 2),
        [first, second] => OptionRun {
            index1: *first,
            num1: 1,
            index2: *second,
            num2: 1,
        },
        _ => OptionRun::NONE,
    }
}

/// Index of `option` in the message option list, appending when new.
fn intern_option(options: &mut Vec<SdOption>, option: SdOption) -> u8 {
    if let Some(index) = options.iter().position(|existing| *existing == option) {
        return index as u8;
    }
    options.push(option);
    (options.len() - 1) as u8
}

async fn sleep_until_deadline(deadline: Option<std::time::Instant>) {
    match deadline {
        Some(deadline) => {
            tokio::time::sleep_until(tokio::time::Instant::from_std(deadline)).await
        }
        None => std::future::pending().await,
    }
}
