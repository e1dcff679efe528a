// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Interpreted SD entries.
//!
//! The wire codec leaves option references unresolved; the message
//! processor resolves them into these self-contained forms, which are what
//! the state machines consume and what the scheduler accepts for sending.

use std::net::SocketAddrV4;

use sipd_core::{
    EventgroupId, InstanceId, InstanceKey, MajorVersion, MinorVersion, ServiceId,
    ServiceInstanceId, Ttl,
};

/// Resolved endpoint options of one entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EntryEndpoints {
    pub udp: Option<SocketAddrV4>,
    pub tcp: Option<SocketAddrV4>,
}

impl EntryEndpoints {
    pub fn is_empty(&self) -> bool {
        self.udp.is_none() && self.tcp.is_none()
    }
}

/// FindService entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FindEntry {
    pub service: ServiceId,
    pub instance: InstanceId,
    pub major: MajorVersion,
    pub minor: MinorVersion,
    pub ttl: Ttl,
}

/// OfferService entry with resolved endpoints. A zero TTL makes this a
/// StopOffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OfferEntry {
    pub id: ServiceInstanceId,
    pub ttl: Ttl,
    pub endpoints: EntryEndpoints,
}

impl OfferEntry {
    pub fn key(&self) -> InstanceKey {
        self.id.instance_key()
    }

    pub fn is_stop(&self) -> bool {
        self.ttl.is_zero()
    }
}

/// SubscribeEventgroup entry with the subscriber's resolved endpoints.
/// A zero TTL makes this a StopSubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscribeEntry {
    pub key: InstanceKey,
    pub eventgroup: EventgroupId,
    pub counter: u8,
    pub ttl: Ttl,
    pub endpoints: EntryEndpoints,
}

impl SubscribeEntry {
    pub fn is_stop(&self) -> bool {
        self.ttl.is_zero()
    }
}

/// SubscribeEventgroupAck entry; a zero TTL makes this a Nack. The
/// multicast endpoint is present when the provider serves the eventgroup
/// over multicast.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AckEntry {
    pub key: InstanceKey,
    pub eventgroup: EventgroupId,
    pub counter: u8,
    pub ttl: Ttl,
    pub multicast: Option<SocketAddrV4>,
}

impl AckEntry {
    pub fn is_nack(&self) -> bool {
        self.ttl.is_zero()
    }

    /// The Nack answering a rejected subscribe.
    pub fn nack_for(subscribe: &SubscribeEntry) -> AckEntry {
        AckEntry {
            key: subscribe.key,
            eventgroup: subscribe.eventgroup,
            counter: subscribe.counter,
            ttl: Ttl::ZERO,
            multicast: None,
        }
    }
}

/// One fully interpreted entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterpretedEntry {
    Find(FindEntry),
    Offer(OfferEntry),
    StopOffer(OfferEntry),
    Subscribe(SubscribeEntry),
    StopSubscribe(SubscribeEntry),
    Ack(AckEntry),
    Nack(AckEntry),
}

impl InterpretedEntry {
    /// The `(service, major, instance)` key entries are demultiplexed on.
    pub fn instance_key(&self) -> InstanceKey {
        match self {
            InterpretedEntry::Find(find) => {
                InstanceKey::new(find.service, find.major, find.instance)
            }
            InterpretedEntry::Offer(offer) | InterpretedEntry::StopOffer(offer) => offer.key(),
            InterpretedEntry::Subscribe(sub) | InterpretedEntry::StopSubscribe(sub) => sub.key,
            InterpretedEntry::Ack(ack) | InterpretedEntry::Nack(ack) => ack.key,
        }
    }
}
