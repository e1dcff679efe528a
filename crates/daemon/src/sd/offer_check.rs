// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Endpoint validation for accepted offers.
//!
//! An offer is only usable when it carries an endpoint for every transport
//! the required instance is configured to use, and when those endpoints
//! lie inside the local subnet.

use std::net::Ipv4Addr;

use thiserror::Error;

use sipd_core::config::{MachineConfig, RequiredInstance};
use sipd_wire::TransportProto;

use crate::sd::entries::EntryEndpoints;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum OfferCheckError {
    #[error("offer lacks a required {0:?} endpoint")]
    MissingEndpoint(TransportProto),

    #[error("offered endpoint {0} is outside the local subnet")]
    OutsideSubnet(Ipv4Addr),
}

/// Whether `addr` shares the machine's subnet prefix.
pub fn in_local_subnet(machine: &MachineConfig, addr: Ipv4Addr) -> bool {
    let prefix = u32::from(machine.subnet_prefix_len.min(32));
    if prefix == 0 {
        return true;
    }
    let mask = u32::MAX << (32 - prefix);
    (u32::from(machine.unicast_address) & mask) == (u32::from(addr) & mask)
}

/// Validate an offer's endpoints against the instance requirements.
pub fn check_offer_endpoints(
    machine: &MachineConfig,
    required: &RequiredInstance,
    endpoints: &EntryEndpoints,
) -> Result<(), OfferCheckError> {
    if required.requires_udp && endpoints.udp.is_none() {
        return Err(OfferCheckError::MissingEndpoint(TransportProto::Udp));
    }
    if required.requires_tcp && endpoints.tcp.is_none() {
        return Err(OfferCheckError::MissingEndpoint(TransportProto::Tcp));
    }
    for endpoint in [endpoints.udp, endpoints.tcp].into_iter().flatten() {
        if !in_local_subnet(machine, *endpoint.ip()) {
            return Err(OfferCheckError::OutsideSubnet(*endpoint.ip()));
        }
    }
    Ok(())
}

#[cfg(test)]
#[path = "offer_check_tests.rs"]
mod tests;
