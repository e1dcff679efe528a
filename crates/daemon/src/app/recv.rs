// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Inbound frame classification and routing.
//!
//! Every frame from an application is either a control request (handed to
//! the command controller), a routing SOME/IP message, a routing PDU, or
//! an initial-field notification from a provider. Routing messages pass
//! the packet validator first; a failed request is answered with a
//! synthesized SOME/IP error response so the caller does not hang.

use std::sync::Arc;

use tracing::{debug, warn};

use sipd_core::{InstanceId, MajorVersion, MinorVersion, ServiceInstanceId};
use sipd_wire::{
    encode_header_only, MessageType, RawFrame, SomeIpHeader, SomeIpMessageType,
    SomeIpReturnCode, SOMEIP_HEADER_LEN,
};

use crate::app::application::Application;
use crate::app::command::{self, CommandDeps};
use crate::sd::scheduler::{SdCtx, SdScheduler};
use crate::services::local_server::Requester;
use crate::stats::Stats;
use crate::validator::PacketValidator;

/// Route one received frame.
#[allow(clippy::too_many_arguments)]
pub fn handle_frame(
    app: &mut Application,
    frame: &RawFrame,
    validator: &PacketValidator,
    deps: &mut CommandDeps<'_>,
    stats: &mut Stats,
    sd: &mut SdScheduler,
    ctx: &mut SdCtx<'_>,
) {
    let (message_type, specific, payload) = match frame.decode() {
        Ok(parts) => parts,
        Err(err) => {
            warn!(conn = %app.id(), error = %err, "undecodable IPC frame");
            return;
        }
    };

    match (message_type, specific) {
        (message_type, _) if message_type.is_control_request() => {
            command::handle_control(app, message_type, payload, deps, sd, ctx);
        }
        (MessageType::RoutingSomeIp, sipd_wire::SpecificHeader::Routing { instance }) => {
            route_someip(app, instance, payload, validator, deps, stats);
        }
        (MessageType::RoutingPdu, sipd_wire::SpecificHeader::Routing { instance }) => {
            route_pdu(app, instance, payload, deps);
        }
        (
            MessageType::InitialFieldNotification,
            sipd_wire::SpecificHeader::Notification { instance, client },
        ) => {
            // A provider pushing the initial value of a field toward one
            // freshly subscribed client.
            let Some(header) = decode_someip(app, payload) else { return };
            let id = instance_id_of(&header, instance);
            match deps.local_servers.get(&id.lookup_key()) {
                Some(server) if server.conn() == app.id() => {
                    server.send_initial_field_notification(client, Arc::from(payload));
                }
                _ => {
                    debug!(conn = %app.id(), instance = %id, "initial field without server")
                }
            }
        }
        (message_type, _) => {
            warn!(conn = %app.id(), ?message_type, "unroutable IPC message");
        }
    }
}

fn route_someip(
    app: &mut Application,
    instance: InstanceId,
    payload: &[u8],
    validator: &PacketValidator,
    deps: &mut CommandDeps<'_>,
    stats: &mut Stats,
) {
    let Some(header) = decode_someip(app, payload) else { return };

    if let Err(err) = validator.validate(app.credentials(), &header, instance) {
        stats.local_packets_rejected += 1;
        debug!(conn = %app.id(), error = %err, "local packet rejected");
        // Only a request expects an answer; everything else is dropped.
        if header.message_type == SomeIpMessageType::Request.to_wire() {
            send_error_response(app, instance, &header, err.into());
        }
        return;
    }

    let id = instance_id_of(&header, instance);
    let packet: Arc<[u8]> = Arc::from(payload);

    match header.typed_message_type() {
        Ok(SomeIpMessageType::Notification) => {
            // Event from a providing application: fan out to subscribers.
            match deps.local_servers.get_mut(&id.lookup_key()) {
                Some(server) if server.conn() == app.id() => {
                    if let Some(service) = deps.config.service(header.service, MajorVersion(header.interface_version)) {
                        server.send_event(service, sipd_core::EventId(header.method.get()), packet);
                    }
                }
                _ => debug!(conn = %app.id(), instance = %id, "event without local server"),
            }
        }
        Ok(SomeIpMessageType::Response) | Ok(SomeIpMessageType::Error) => {
            match deps.local_servers.get_mut(&id.lookup_key()) {
                Some(server) if server.conn() == app.id() => {
                    server.send_method_response(&header, packet);
                }
                _ => debug!(conn = %app.id(), instance = %id, "response without local server"),
            }
        }
        Ok(SomeIpMessageType::Request) | Ok(SomeIpMessageType::RequestNoReturn) => {
            route_request(app, id, &header, packet, deps, stats);
        }
        _ => unreachable!("validator admits only routable message types"),
    }
}

/// Request from a consuming application: local providers are reached
/// through their LocalServer, remote ones through the remote server of
/// the covering RSI.
fn route_request(
    app: &mut Application,
    id: ServiceInstanceId,
    header: &SomeIpHeader,
    packet: Arc<[u8]>,
    deps: &mut CommandDeps<'_>,
    stats: &mut Stats,
) {
    let expects_response = header.message_type == SomeIpMessageType::Request.to_wire();

    if app.client(id, header.client).is_none() {
        debug!(conn = %app.id(), instance = %id, client = %header.client, "request without client");
        stats.local_packets_rejected += 1;
        if expects_response {
            send_error_response(app, id.instance, header, SomeIpReturnCode::NotReady);
        }
        return;
    }

    // Locally provided instance?
    if let Some(server) = deps.local_servers.get_mut(&id.lookup_key()) {
        let requester = Requester::Local { router: app.send_router().clone() };
        server.send_method_request(header, packet, requester, expects_response);
        return;
    }

    // Remote instance through the RSI's remote server.
    let remote = deps
        .rsis
        .iter_mut()
        .find(|rsi| rsi.covers(id.service, id.instance))
        .and_then(|rsi| rsi.remote_mut(id.instance));
    match remote {
        Some(remote) => {
            if let Err(err) = remote.send_method_request(packet) {
                debug!(conn = %app.id(), instance = %id, error = %err, "request undeliverable");
                if expects_response {
                    send_error_response(app, id.instance, header, err.into());
                }
            }
        }
        None => {
            debug!(conn = %app.id(), instance = %id, "request with no reachable server");
            if expects_response {
                send_error_response(app, id.instance, header, SomeIpReturnCode::NotReachable);
            }
        }
    }
}

/// PDU from a providing application: the owning LocalServer fans it out.
/// PDUs carry no SOME/IP header, so the server is found by instance alone.
fn route_pdu(
    app: &mut Application,
    instance: InstanceId,
    payload: &[u8],
    deps: &mut CommandDeps<'_>,
) {
    let server = deps
        .local_servers
        .values_mut()
        .find(|server| server.conn() == app.id() && server.id().instance == instance);
    match server {
        Some(server) => server.send_pdu(Arc::from(payload)),
        None => debug!(conn = %app.id(), %instance, "pdu without local server"),
    }
}

fn decode_someip(app: &Application, payload: &[u8]) -> Option<SomeIpHeader> {
    if payload.len() < SOMEIP_HEADER_LEN {
        warn!(conn = %app.id(), len = payload.len(), "short SOME/IP message");
        return None;
    }
    match SomeIpHeader::decode(payload) {
        Ok(header) => Some(header),
        Err(err) => {
            warn!(conn = %app.id(), error = %err, "undecodable SOME/IP header");
            None
        }
    }
}

fn instance_id_of(header: &SomeIpHeader, instance: InstanceId) -> ServiceInstanceId {
    ServiceInstanceId::new(
        header.service,
        MajorVersion(header.interface_version),
        MinorVersion(0),
        instance,
    )
}

/// Synthesize the SOME/IP error response for a failed request and route
/// it back to the caller.
fn send_error_response(
    app: &Application,
    instance: InstanceId,
    request: &SomeIpHeader,
    code: SomeIpReturnCode,
) {
    let response = request.to_error_response(code);
    let packet: Arc<[u8]> = encode_header_only(&response).into();
    let _ = app.send_router().on_method_response(instance, packet);
}

#[cfg(test)]
#[path = "recv_tests.rs"]
mod tests;
