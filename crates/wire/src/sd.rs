// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! SOME/IP-SD message model and payload codec.
//!
//! An SD message is an ordinary SOME/IP message addressed to the reserved
//! SD service; its payload is a flags byte, an entries array, and an
//! options array. Entries reference options by two index runs. The codec
//! preserves option indices exactly as received so the interpreter can
//! enforce reference rules; unknown option types are retained as opaque
//! placeholders rather than shifting later indices.

use std::net::Ipv4Addr;

use sipd_core::{
    EventgroupId, InstanceId, MajorVersion, MethodId, MinorVersion, ServiceId, SessionId, Ttl,
};

use crate::bytes::{ByteReader, ByteWriter, WireError};

/// Reserved service id of SOME/IP-SD itself.
pub const SD_SERVICE: ServiceId = ServiceId(0xFFFF);
/// Reserved method id of SOME/IP-SD messages.
pub const SD_METHOD: MethodId = MethodId(0x8100);

const FLAG_REBOOT: u8 = 0x80;
const FLAG_UNICAST: u8 = 0x40;

const ENTRY_WIRE_LEN: usize = 16;

/// Entry type discriminators on the wire. Stop variants share the type of
/// their positive counterpart with TTL zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum SdEntryType {
    FindService = 0x00,
    OfferService = 0x01,
    SubscribeEventgroup = 0x06,
    SubscribeEventgroupAck = 0x07,
}

impl SdEntryType {
    pub fn from_wire(raw: u8) -> Result<Self, WireError> {
        Ok(match raw {
            0x00 => Self::FindService,
            0x01 => Self::OfferService,
            0x06 => Self::SubscribeEventgroup,
            0x07 => Self::SubscribeEventgroupAck,
            other => {
                return Err(WireError::InvalidValue {
                    context: "sd entry type",
                    value: u64::from(other),
                })
            }
        })
    }

    /// Service entries carry a minor version; eventgroup entries carry a
    /// counter and eventgroup id.
    pub fn is_service_entry(self) -> bool {
        matches!(self, Self::FindService | Self::OfferService)
    }
}

/// The two option-index runs of one entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OptionRun {
    pub index1: u8,
    pub num1: u8,
    pub index2: u8,
    pub num2: u8,
}

impl OptionRun {
    pub const NONE: OptionRun = OptionRun { index1: 0, num1: 0, index2: 0, num2: 0 };

    /// Single run starting at `index` with `num` options.
    pub fn first(index: u8, num: u8) -> OptionRun {
        OptionRun { index1: index, num1: num, index2: 0, num2: 0 }
    }

    pub fn is_empty(&self) -> bool {
        self.num1 == 0 && self.num2 == 0
    }

    /// All referenced indices, first run then second run.
    pub fn indices(&self) -> impl Iterator<Item = usize> + '_ {
        let first = (self.index1 as usize)..(self.index1 as usize + self.num1 as usize);
        let second = (self.index2 as usize)..(self.index2 as usize + self.num2 as usize);
        first.chain(second)
    }
}

/// Type-dependent tail of an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SdEntryPayload {
    Service { minor: MinorVersion },
    Eventgroup { counter: u8, eventgroup: EventgroupId },
}

/// One SD entry as carried on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SdEntry {
    pub entry_type: SdEntryType,
    pub options: OptionRun,
    pub service: ServiceId,
    pub instance: InstanceId,
    pub major: MajorVersion,
    pub ttl: Ttl,
    pub payload: SdEntryPayload,
}

impl SdEntry {
    /// The minor version of a service entry; eventgroup entries have none.
    pub fn minor(&self) -> Option<MinorVersion> {
        match self.payload {
            SdEntryPayload::Service { minor } => Some(minor),
            SdEntryPayload::Eventgroup { .. } => None,
        }
    }

    pub fn eventgroup(&self) -> Option<EventgroupId> {
        match self.payload {
            SdEntryPayload::Service { .. } => None,
            SdEntryPayload::Eventgroup { eventgroup, .. } => Some(eventgroup),
        }
    }

    fn encode(&self, w: &mut ByteWriter) {
        w.u8(self.entry_type as u8);
        w.u8(self.options.index1);
        w.u8(self.options.index2);
        w.u8((self.options.num1 << 4) | (self.options.num2 & 0x0F));
        w.u16_be(self.service.get());
        w.u16_be(self.instance.get());
        w.u8(self.major.get());
        w.u24_be(self.ttl.0);
        match self.payload {
            SdEntryPayload::Service { minor } => w.u32_be(minor.get()),
            SdEntryPayload::Eventgroup { counter, eventgroup } => {
                w.u8(0); // reserved
                w.u8(counter & 0x0F);
                w.u16_be(eventgroup.get());
            }
        }
    }

    fn decode(r: &mut ByteReader<'_>) -> Result<SdEntry, WireError> {
        let entry_type = SdEntryType::from_wire(r.u8()?)?;
        let index1 = r.u8()?;
        let index2 = r.u8()?;
        let nums = r.u8()?;
        let options = OptionRun { index1, num1: nums >> 4, index2, num2: nums & 0x0F };
        let service = ServiceId(r.u16_be()?);
        let instance = InstanceId(r.u16_be()?);
        let major = MajorVersion(r.u8()?);
        let ttl = Ttl(r.u24_be()?);
        let payload = if entry_type.is_service_entry() {
            SdEntryPayload::Service { minor: MinorVersion(r.u32_be()?) }
        } else {
            let _ = r.u8()?;
            let counter = r.u8()? & 0x0F;
            SdEntryPayload::Eventgroup { counter, eventgroup: EventgroupId(r.u16_be()?) }
        };
        Ok(SdEntry { entry_type, options, service, instance, major, ttl, payload })
    }
}

/// Layer-4 protocol carried in endpoint options.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum TransportProto {
    Tcp = 0x06,
    Udp = 0x11,
}

impl TransportProto {
    pub fn from_wire(raw: u8) -> Result<Self, WireError> {
        Ok(match raw {
            0x06 => Self::Tcp,
            0x11 => Self::Udp,
            other => {
                return Err(WireError::InvalidValue {
                    context: "transport protocol",
                    value: u64::from(other),
                })
            }
        })
    }
}

const OPTION_IPV4_ENDPOINT: u8 = 0x04;
const OPTION_IPV4_MULTICAST: u8 = 0x14;

/// One SD option.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SdOption {
    Ipv4Endpoint { addr: Ipv4Addr, proto: TransportProto, port: u16 },
    Ipv4Multicast { addr: Ipv4Addr, port: u16 },
    /// Unrecognized option, kept to preserve option indexing.
    Unknown { option_type: u8 },
}

impl SdOption {
    pub fn udp(addr: Ipv4Addr, port: u16) -> SdOption {
        SdOption::Ipv4Endpoint { addr, proto: TransportProto::Udp, port }
    }

    pub fn tcp(addr: Ipv4Addr, port: u16) -> SdOption {
        SdOption::Ipv4Endpoint { addr, proto: TransportProto::Tcp, port }
    }

    fn encode(&self, w: &mut ByteWriter) {
        match *self {
            SdOption::Ipv4Endpoint { addr, proto, port } => {
                w.u16_be(9); // length from the reserved byte onward
                w.u8(OPTION_IPV4_ENDPOINT);
                w.u8(0); // reserved
                w.bytes(&addr.octets());
                w.u8(0); // reserved
                w.u8(proto as u8);
                w.u16_be(port);
            }
            SdOption::Ipv4Multicast { addr, port } => {
                w.u16_be(9);
                w.u8(OPTION_IPV4_MULTICAST);
                w.u8(0);
                w.bytes(&addr.octets());
                w.u8(0);
                w.u8(TransportProto::Udp as u8);
                w.u16_be(port);
            }
            SdOption::Unknown { option_type } => {
                w.u16_be(1);
                w.u8(option_type);
                w.u8(0);
            }
        }
    }

    fn decode(r: &mut ByteReader<'_>) -> Result<SdOption, WireError> {
        let length = r.u16_be()? as usize;
        let option_type = r.u8()?;
        if length == 0 {
            return Err(WireError::InvalidValue { context: "sd option length", value: 0 });
        }
        // The length covers the reserved byte and everything after it.
        let body = r.bytes(length)?;
        match option_type {
            OPTION_IPV4_ENDPOINT | OPTION_IPV4_MULTICAST => {
                let mut b = ByteReader::new(body);
                let _ = b.u8()?; // reserved
                let addr = Ipv4Addr::new(b.u8()?, b.u8()?, b.u8()?, b.u8()?);
                let _ = b.u8()?; // reserved
                let proto = TransportProto::from_wire(b.u8()?)?;
                let port = b.u16_be()?;
                b.finish("ipv4 option")?;
                if option_type == OPTION_IPV4_MULTICAST {
                    Ok(SdOption::Ipv4Multicast { addr, port })
                } else {
                    Ok(SdOption::Ipv4Endpoint { addr, proto, port })
                }
            }
            other => Ok(SdOption::Unknown { option_type: other }),
        }
    }
}

/// A decoded SD message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SdMessage {
    pub reboot: bool,
    pub unicast: bool,
    /// Session counter from the enclosing SOME/IP header.
    pub session: SessionId,
    pub entries: Vec<SdEntry>,
    pub options: Vec<SdOption>,
}

impl SdMessage {
    pub fn new(session: SessionId, reboot: bool) -> SdMessage {
        SdMessage { reboot, unicast: true, session, entries: Vec::new(), options: Vec::new() }
    }

    /// Encode the SD payload (everything after the SOME/IP header).
    pub fn encode_payload(&self) -> Vec<u8> {
        let mut w = ByteWriter::with_capacity(
            12 + self.entries.len() * ENTRY_WIRE_LEN + self.options.len() * 12,
        );
        let mut flags = 0u8;
        if self.reboot {
            flags |= FLAG_REBOOT;
        }
        if self.unicast {
            flags |= FLAG_UNICAST;
        }
        w.u8(flags);
        w.u24_be(0); // reserved

        w.u32_be((self.entries.len() * ENTRY_WIRE_LEN) as u32);
        for entry in &self.entries {
            entry.encode(&mut w);
        }

        let options_start = w.len() + 4;
        w.u32_be(0); // patched below
        for option in &self.options {
            option.encode(&mut w);
        }
        let options_len = (w.len() - options_start) as u32;
        w.patch_u32_be(options_start - 4, options_len);
        w.into_vec()
    }

    /// Decode the SD payload. `session` comes from the SOME/IP header.
    pub fn decode_payload(session: SessionId, buf: &[u8]) -> Result<SdMessage, WireError> {
        let mut r = ByteReader::new(buf);
        let flags = r.u8()?;
        let _ = r.u24_be()?;

        let entries_len = r.u32_be()? as usize;
        if entries_len % ENTRY_WIRE_LEN != 0 {
            return Err(WireError::InvalidValue {
                context: "sd entries length",
                value: entries_len as u64,
            });
        }
        let mut entries_reader = ByteReader::new(r.bytes(entries_len)?);
        let mut entries = Vec::with_capacity(entries_len / ENTRY_WIRE_LEN);
        while entries_reader.remaining() > 0 {
            entries.push(SdEntry::decode(&mut entries_reader)?);
        }

        let options_len = r.u32_be()? as usize;
        let mut options_reader = ByteReader::new(r.bytes(options_len)?);
        let mut options = Vec::new();
        while options_reader.remaining() > 0 {
            options.push(SdOption::decode(&mut options_reader)?);
        }
        r.finish("sd payload")?;

        Ok(SdMessage {
            reboot: flags & FLAG_REBOOT != 0,
            unicast: flags & FLAG_UNICAST != 0,
            session,
            entries,
            options,
        })
    }
}

#[cfg(test)]
#[path = "sd_tests.rs"]
mod tests;
