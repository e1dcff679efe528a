// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Control command execution.
//!
//! Each handler decodes its size-bounded payload, delegates to the domain
//! objects, and maps the result onto a control return code. Only
//! `RequestService` and `RequestLocalServer` answer with a response
//! message; every other command is fire-and-forget and failures are
//! logged only.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, info, warn};

use sipd_core::config::Config;
use sipd_core::{EventgroupId, ServiceInstanceId};
use sipd_wire::{
    encode_message, ControlReturnCode, MessageType, ReleaseServicePayload,
    RequestServiceResponsePayload, ServiceInstancePayload, SpecificHeader, SubscribeEventPayload,
};

use crate::app::application::{Application, LocalClient};
use crate::iam::IamPolicy;
use crate::sd::scheduler::{SdCtx, SdScheduler};
use crate::sd::server_offer::ServerOffer;
use crate::services::local_server::{LocalServer, LocalServerManager, ServedSubscriber};
use crate::services::remote::LocalSubscriber;
use crate::services::required::{RequestServiceError, RequiredServiceInstance};
use crate::services::transport::NetTransport;

/// Everything a command handler may touch besides the requesting
/// application.
pub struct CommandDeps<'a> {
    pub config: &'a Arc<Config>,
    pub iam: &'a dyn IamPolicy,
    pub rsis: &'a mut Vec<RequiredServiceInstance>,
    pub server_manager: &'a mut LocalServerManager,
    pub local_servers: &'a mut HashMap<ServiceInstanceId, LocalServer>,
    pub server_offers: &'a mut Vec<ServerOffer>,
    pub transport: &'a Arc<dyn NetTransport>,
}

impl<'a> CommandDeps<'a> {
    fn rsi_covering(
        rsis: &mut [RequiredServiceInstance],
        id: ServiceInstanceId,
    ) -> Option<&mut RequiredServiceInstance> {
        rsis.iter_mut().find(|rsi| rsi.covers(id.service, id.instance))
    }

    fn server_offer_for(
        offers: &mut [ServerOffer],
        id: ServiceInstanceId,
    ) -> Option<&mut ServerOffer> {
        offers.iter_mut().find(|offer| {
            offer.key().service == id.service && offer.key().instance == id.instance
        })
    }
}

/// Execute one control request.
pub fn handle_control(
    app: &mut Application,
    message_type: MessageType,
    payload: &[u8],
    deps: &mut CommandDeps<'_>,
    sd: &mut SdScheduler,
    ctx: &mut SdCtx<'_>,
) {
    match message_type {
        MessageType::RequestService => request_service(app, payload, deps, sd, ctx),
        MessageType::ReleaseService => release_service(app, payload, deps, sd, ctx),
        MessageType::RequestLocalServer => request_local_server(app, payload, deps),
        MessageType::ReleaseLocalServer => release_local_server(app, payload, deps, sd, ctx),
        MessageType::OfferService => offer_service(app, payload, deps, ctx),
        MessageType::StopOfferService => stop_offer_service(app, payload, deps, sd, ctx),
        MessageType::SubscribeEvent => subscribe_event(app, payload, deps, sd, ctx),
        MessageType::UnsubscribeEvent => unsubscribe_event(app, payload, deps, sd, ctx),
        MessageType::StartServiceDiscovery => start_service_discovery(app, payload, deps, sd, ctx),
        MessageType::StopServiceDiscovery => stop_service_discovery(app, payload, deps, sd, ctx),
        other => {
            warn!(conn = %app.id(), ?other, "not a control request");
        }
    }
}

/// Build and enqueue a control response; the response message type is
/// derived from the request type.
fn respond(
    app: &Application,
    request: MessageType,
    code: ControlReturnCode,
    payload: &[u8],
) {
    let Ok(response_type) = request.response_type(code.is_ok()) else {
        warn!(conn = %app.id(), ?request, "no response type derivable");
        return;
    };
    let frame = encode_message(
        response_type,
        &SpecificHeader::Control { return_code: code.to_wire() },
        payload,
    );
    let _ = app.send_router().send_control_response(frame);
}

// — fire-and-wait commands —

fn request_service(
    app: &mut Application,
    payload: &[u8],
    deps: &mut CommandDeps<'_>,
    sd: &mut SdScheduler,
    ctx: &mut SdCtx<'_>,
) {
    let request = MessageType::RequestService;
    let Ok(payload) = ServiceInstancePayload::decode(payload) else {
        respond(app, request, ControlReturnCode::MalformedMessage, &[]);
        return;
    };
    let id = payload.id();

    if !deps.iam.allow_request_service(app.credentials(), id) {
        info!(conn = %app.id(), instance = %id, "request service denied by policy");
        respond(app, request, ControlReturnCode::RequestServiceAccessDenied, &[]);
        return;
    }
    let Some(rsi) = CommandDeps::rsi_covering(deps.rsis, id) else {
        respond(
            app,
            request,
            ControlReturnCode::RequestServiceRequiredServiceInstanceNotFound,
            &[],
        );
        return;
    };

    match rsi.request_service(id.instance, sd, ctx) {
        Ok(client_id) => {
            app.insert_client(LocalClient::new(id, client_id));
            let body = RequestServiceResponsePayload { client: client_id }.encode();
            respond(app, request, ControlReturnCode::Ok, &body);
        }
        Err(RequestServiceError::ClientIdsOverflow) => {
            respond(app, request, ControlReturnCode::RequestServiceClientIdsOverflow, &[]);
        }
        Err(RequestServiceError::RemoteServerNotFound) => {
            respond(app, request, ControlReturnCode::RequestServiceRemoteServerNotFound, &[]);
        }
    }
}

fn request_local_server(app: &mut Application, payload: &[u8], deps: &mut CommandDeps<'_>) {
    let request = MessageType::RequestLocalServer;
    let Ok(payload) = ServiceInstancePayload::decode(payload) else {
        respond(app, request, ControlReturnCode::MalformedMessage, &[]);
        return;
    };
    let id = payload.id();

    if deps.config.provided_instance(id.service, id.instance).is_none() {
        respond(app, request, ControlReturnCode::NotOk, &[]);
        return;
    }
    if !deps.iam.allow_offer_service(app.credentials(), id) {
        info!(conn = %app.id(), instance = %id, "offer service denied by policy");
        respond(app, request, ControlReturnCode::OfferServiceAccessDenied, &[]);
        return;
    }
    if !deps.server_manager.try_acquire(id, app.id()) {
        respond(app, request, ControlReturnCode::LocalServerNotAvailable, &[]);
        return;
    }

    deps.local_servers.insert(
        id.lookup_key(),
        LocalServer::new(id, app.id(), app.send_router().clone(), Arc::clone(deps.transport)),
    );
    app.add_server(id);
    info!(conn = %app.id(), instance = %id, "local server granted");
    respond(app, request, ControlReturnCode::Ok, &[]);
}

// — fire-and-forget commands —

fn release_service(
    app: &mut Application,
    payload: &[u8],
    deps: &mut CommandDeps<'_>,
    sd: &mut SdScheduler,
    ctx: &mut SdCtx<'_>,
) {
    let Ok(payload) = ReleaseServicePayload::decode(payload) else {
        warn!(conn = %app.id(), "malformed release service payload");
        return;
    };
    let id = payload.target.id();
    let Some(client) = app.remove_client(id, payload.client) else {
        debug!(conn = %app.id(), instance = %id, client = %payload.client, "unknown client");
        return;
    };
    teardown_client(app.id(), &client, deps, sd, ctx);
}

/// Tear down one client's subscriptions and return its id to the pool.
pub fn teardown_client(
    conn: crate::app::connection::ConnectionId,
    client: &LocalClient,
    deps: &mut CommandDeps<'_>,
    sd: &mut SdScheduler,
    ctx: &mut SdCtx<'_>,
) {
    let id = client.target;
    if let Some(rsi) = CommandDeps::rsi_covering(deps.rsis, id) {
        for &(event, eventgroup) in &client.subscriptions {
            if let Some(server) = deps.local_servers.get_mut(&id.lookup_key()) {
                server.unsubscribe_local(eventgroup, conn, client.id);
            } else {
                rsi.unsubscribe(
                    &deps.config.machine,
                    id.instance,
                    eventgroup,
                    conn,
                    client.id,
                    event,
                    sd,
                    ctx,
                );
            }
        }
        rsi.release_service(client.id, sd, ctx);
    }
}

fn release_local_server(
    app: &mut Application,
    payload: &[u8],
    deps: &mut CommandDeps<'_>,
    sd: &mut SdScheduler,
    ctx: &mut SdCtx<'_>,
) {
    let Ok(payload) = ServiceInstancePayload::decode(payload) else {
        warn!(conn = %app.id(), "malformed release local server payload");
        return;
    };
    let id = payload.id();
    if !app.remove_server(id) {
        debug!(conn = %app.id(), instance = %id, "release of a server not owned");
        return;
    }
    if let Some(offer) = CommandDeps::server_offer_for(deps.server_offers, id) {
        offer.on_stop_offer(&deps.config.machine, sd, ctx);
    }
    deps.local_servers.remove(&id.lookup_key());
    deps.server_manager.release(id, app.id());
    info!(conn = %app.id(), instance = %id, "local server released");
}

fn offer_service(
    app: &mut Application,
    payload: &[u8],
    deps: &mut CommandDeps<'_>,
    ctx: &mut SdCtx<'_>,
) {
    let Ok(payload) = ServiceInstancePayload::decode(payload) else {
        warn!(conn = %app.id(), "malformed offer service payload");
        return;
    };
    let id = payload.id();
    if !app.owns_server(id) {
        warn!(conn = %app.id(), instance = %id, "offer without local server ownership");
        return;
    }
    if let Some(offer) = CommandDeps::server_offer_for(deps.server_offers, id) {
        offer.on_offer_requested(ctx);
    }
}

fn stop_offer_service(
    app: &mut Application,
    payload: &[u8],
    deps: &mut CommandDeps<'_>,
    sd: &mut SdScheduler,
    ctx: &mut SdCtx<'_>,
) {
    let Ok(payload) = ServiceInstancePayload::decode(payload) else {
        warn!(conn = %app.id(), "malformed stop offer payload");
        return;
    };
    let id = payload.id();
    if !app.owns_server(id) {
        return;
    }
    if let Some(offer) = CommandDeps::server_offer_for(deps.server_offers, id) {
        offer.on_stop_offer(&deps.config.machine, sd, ctx);
    }
}

fn subscribe_event(
    app: &mut Application,
    payload: &[u8],
    deps: &mut CommandDeps<'_>,
    sd: &mut SdScheduler,
    ctx: &mut SdCtx<'_>,
) {
    let Ok(payload) = SubscribeEventPayload::decode(payload) else {
        warn!(conn = %app.id(), "malformed subscribe payload");
        return;
    };
    let id = payload.target.id();
    let Some(eventgroup) = eventgroup_of(deps.config, id, payload.event.get()) else {
        warn!(conn = %app.id(), instance = %id, event = %payload.event, "unknown event");
        return;
    };
    if !deps.iam.allow_subscribe(app.credentials(), id, eventgroup) {
        info!(conn = %app.id(), instance = %id, %eventgroup, "subscribe denied by policy");
        return;
    }
    let router = app.send_router().clone();
    let conn = app.id();
    let Some(client) = app.client_mut(id, payload.client) else {
        warn!(conn = %conn, instance = %id, client = %payload.client, "subscribe without client");
        return;
    };
    client.add_subscription(payload.event, eventgroup);

    if deps.server_manager.owner_of(id).is_some() {
        // Locally provided: the subscription is active immediately.
        if let Some(server) = deps.local_servers.get_mut(&id.lookup_key()) {
            if let Some(service) = deps.config.service(id.service, id.major) {
                server.subscribe_local(
                    service,
                    eventgroup,
                    ServedSubscriber { conn, client: payload.client, router: router.clone() },
                );
            }
            let _ = router.on_subscription_state_change(
                &id,
                payload.event,
                crate::services::subscription::SubscriptionState::Subscribed,
            );
        }
        return;
    }

    if let Some(rsi) = CommandDeps::rsi_covering(deps.rsis, id) {
        rsi.subscribe(
            &deps.config.machine,
            id.instance,
            eventgroup,
            LocalSubscriber { conn, client: payload.client, event: payload.event, router },
            sd,
            ctx,
        );
    }
}

fn unsubscribe_event(
    app: &mut Application,
    payload: &[u8],
    deps: &mut CommandDeps<'_>,
    sd: &mut SdScheduler,
    ctx: &mut SdCtx<'_>,
) {
    let Ok(payload) = SubscribeEventPayload::decode(payload) else {
        warn!(conn = %app.id(), "malformed unsubscribe payload");
        return;
    };
    let id = payload.target.id();
    let Some(eventgroup) = eventgroup_of(deps.config, id, payload.event.get()) else {
        return;
    };
    let conn = app.id();
    if let Some(client) = app.client_mut(id, payload.client) {
        client.remove_subscription(payload.event, eventgroup);
    }

    if let Some(server) = deps.local_servers.get_mut(&id.lookup_key()) {
        server.unsubscribe_local(eventgroup, conn, payload.client);
        return;
    }
    if let Some(rsi) = CommandDeps::rsi_covering(deps.rsis, id) {
        rsi.unsubscribe(
            &deps.config.machine,
            id.instance,
            eventgroup,
            conn,
            payload.client,
            payload.event,
            sd,
            ctx,
        );
    }
}

fn start_service_discovery(
    app: &mut Application,
    payload: &[u8],
    deps: &mut CommandDeps<'_>,
    sd: &mut SdScheduler,
    ctx: &mut SdCtx<'_>,
) {
    let Ok(payload) = ServiceInstancePayload::decode(payload) else {
        warn!(conn = %app.id(), "malformed start service discovery payload");
        return;
    };
    let id = payload.id();
    let Some(rsi) = CommandDeps::rsi_covering(deps.rsis, id) else {
        warn!(conn = %app.id(), instance = %id, "service discovery for unknown requirement");
        return;
    };
    if !app.watch(id) {
        // Already armed by this application.
        return;
    }
    rsi.start_discovery(sd, ctx);

    // Initial snapshot: deliver the currently active offers to this
    // application before any later offer notification can be observed.
    for offered in rsi.offered_services() {
        let _ = app.send_router().on_service_instance_up(&offered);
    }
}

fn stop_service_discovery(
    app: &mut Application,
    payload: &[u8],
    deps: &mut CommandDeps<'_>,
    sd: &mut SdScheduler,
    ctx: &mut SdCtx<'_>,
) {
    let Ok(payload) = ServiceInstancePayload::decode(payload) else {
        warn!(conn = %app.id(), "malformed stop service discovery payload");
        return;
    };
    let id = payload.id();
    if !app.unwatch(id) {
        return;
    }
    if let Some(rsi) = CommandDeps::rsi_covering(deps.rsis, id) {
        rsi.stop_discovery(sd, ctx);
    }
}

fn eventgroup_of(config: &Config, id: ServiceInstanceId, event: u16) -> Option<EventgroupId> {
    config.service(id.service, id.major)?.eventgroup_of(sipd_core::EventId(event))
}

#[cfg(test)]
#[path = "command_tests.rs"]
mod tests;
