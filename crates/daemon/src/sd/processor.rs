// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Validation and interpretation of incoming SD messages.
//!
//! Each wire entry is checked against its option references and turned
//! into a self-contained [`InterpretedEntry`]. Invalid entries are counted
//! and dropped; a malformed Subscribe additionally produces a Nack request
//! so the peer does not wait for an answer that will never come.

use std::net::SocketAddrV4;

use tracing::debug;

use sipd_core::{ServiceInstanceId, Ttl};
use sipd_wire::{SdEntry, SdEntryPayload, SdEntryType, SdMessage, SdOption, TransportProto};

use crate::sd::entries::{
    AckEntry, EntryEndpoints, FindEntry, InterpretedEntry, OfferEntry, SubscribeEntry,
};
use crate::stats::{SdDropReason, Stats};

/// Outcome of interpreting one SD message.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct InterpretedMessage {
    pub entries: Vec<InterpretedEntry>,
    /// Nacks owed for malformed Subscribe entries.
    pub nack_requests: Vec<AckEntry>,
}

/// Option kinds an entry type may reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OptionPolicy {
    /// No options at all (FindService, Nack).
    None,
    /// Unicast endpoints, at most one per transport (Offer, Subscribe).
    Endpoints,
    /// One multicast endpoint (Ack).
    Multicast,
}

#[derive(Debug, Default)]
struct ResolvedOptions {
    endpoints: EntryEndpoints,
    multicast: Option<SocketAddrV4>,
}

/// Interpret every entry of `message`, counting dropped entries.
pub fn interpret_message(message: &SdMessage, stats: &mut Stats) -> InterpretedMessage {
    let mut result = InterpretedMessage::default();
    for entry in &message.entries {
        match interpret_entry(entry, &message.options) {
            Ok(interpreted) => {
                stats.sd_entries_dispatched += 1;
                result.entries.push(interpreted);
            }
            Err(reason) => {
                debug!(?reason, entry_type = ?entry.entry_type, "dropping sd entry");
                stats.count_drop(reason);
                // A peer that subscribed malformedly must be told; it
                // would otherwise hang waiting for the Ack.
                if entry.entry_type == SdEntryType::SubscribeEventgroup && !entry.ttl.is_zero()
                {
                    if let SdEntryPayload::Eventgroup { counter, eventgroup } = entry.payload {
                        result.nack_requests.push(AckEntry {
                            key: sipd_core::InstanceKey::new(
                                entry.service,
                                entry.major,
                                entry.instance,
                            ),
                            eventgroup,
                            counter,
                            ttl: Ttl::ZERO,
                            multicast: None,
                        });
                    }
                }
            }
        }
    }
    result
}

fn interpret_entry(
    entry: &SdEntry,
    options: &[SdOption],
) -> Result<InterpretedEntry, SdDropReason> {
    let policy = option_policy(entry);
    let resolved = resolve_options(entry, options, policy)?;

    Ok(match entry.entry_type {
        SdEntryType::FindService => {
            let minor = match entry.payload {
                SdEntryPayload::Service { minor } => minor,
                SdEntryPayload::Eventgroup { .. } => return Err(SdDropReason::MalformedEntry),
            };
            InterpretedEntry::Find(FindEntry {
                service: entry.service,
                instance: entry.instance,
                major: entry.major,
                minor,
                ttl: entry.ttl,
            })
        }
        SdEntryType::OfferService => {
            let minor = match entry.payload {
                SdEntryPayload::Service { minor } => minor,
                SdEntryPayload::Eventgroup { .. } => return Err(SdDropReason::MalformedEntry),
            };
            let offer = OfferEntry {
                id: ServiceInstanceId::new(entry.service, entry.major, minor, entry.instance),
                ttl: entry.ttl,
                endpoints: resolved.endpoints,
            };
            if offer.is_stop() {
                InterpretedEntry::StopOffer(offer)
            } else if offer.endpoints.is_empty() {
                // An offer without any endpoint cannot be used.
                return Err(SdDropReason::MalformedEntry);
            } else {
                InterpretedEntry::Offer(offer)
            }
        }
        SdEntryType::SubscribeEventgroup => {
            let (counter, eventgroup) = eventgroup_payload(entry)?;
            let subscribe = SubscribeEntry {
                key: sipd_core::InstanceKey::new(entry.service, entry.major, entry.instance),
                eventgroup,
                counter,
                ttl: entry.ttl,
                endpoints: resolved.endpoints,
            };
            if subscribe.is_stop() {
                InterpretedEntry::StopSubscribe(subscribe)
            } else if subscribe.endpoints.is_empty() {
                // A subscriber without endpoints cannot receive events.
                return Err(SdDropReason::MalformedEntry);
            } else {
                InterpretedEntry::Subscribe(subscribe)
            }
        }
        SdEntryType::SubscribeEventgroupAck => {
            let (counter, eventgroup) = eventgroup_payload(entry)?;
            let ack = AckEntry {
                key: sipd_core::InstanceKey::new(entry.service, entry.major, entry.instance),
                eventgroup,
                counter,
                ttl: entry.ttl,
                multicast: resolved.multicast,
            };
            if ack.is_nack() {
                InterpretedEntry::Nack(ack)
            } else {
                InterpretedEntry::Ack(ack)
            }
        }
    })
}

fn option_policy(entry: &SdEntry) -> OptionPolicy {
    match entry.entry_type {
        SdEntryType::FindService => OptionPolicy::None,
        SdEntryType::OfferService | SdEntryType::SubscribeEventgroup => OptionPolicy::Endpoints,
        SdEntryType::SubscribeEventgroupAck => {
            if entry.ttl.is_zero() {
                // A Nack may not reference anything.
                OptionPolicy::None
            } else {
                OptionPolicy::Multicast
            }
        }
    }
}

fn eventgroup_payload(entry: &SdEntry) -> Result<(u8, sipd_core::EventgroupId), SdDropReason> {
    match entry.payload {
        SdEntryPayload::Eventgroup { counter, eventgroup } => Ok((counter, eventgroup)),
        SdEntryPayload::Service { .. } => Err(SdDropReason::MalformedEntry),
    }
}

fn resolve_options(
    entry: &SdEntry,
    options: &[SdOption],
    policy: OptionPolicy,
) -> Result<ResolvedOptions, SdDropReason> {
    let mut resolved = ResolvedOptions::default();
    for index in entry.options.indices() {
        let option = options.get(index).ok_or(SdDropReason::OptionIndexOutOfRange)?;
        match option {
            SdOption::Unknown { .. } => return Err(SdDropReason::UnknownOption),
            SdOption::Ipv4Endpoint { addr, proto, port } => {
                if policy != OptionPolicy::Endpoints {
                    return Err(SdDropReason::OptionNotAllowed);
                }
                let endpoint = SocketAddrV4::new(*addr, *port);
                let slot = match proto {
                    TransportProto::Udp => &mut resolved.endpoints.udp,
                    TransportProto::Tcp => &mut resolved.endpoints.tcp,
                };
                if slot.is_some() {
                    return Err(SdDropReason::ConflictingEndpoints);
                }
                *slot = Some(endpoint);
            }
            SdOption::Ipv4Multicast { addr, port } => {
                if policy != OptionPolicy::Multicast {
                    return Err(SdDropReason::OptionNotAllowed);
                }
                if resolved.multicast.is_some() {
                    return Err(SdDropReason::ConflictingEndpoints);
                }
                resolved.multicast = Some(SocketAddrV4::new(*addr, *port));
            }
        }
    }
    Ok(resolved)
}

#[cfg(test)]
#[path = "processor_tests.rs"]
mod tests;
