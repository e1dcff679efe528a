// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Wire codecs: the daemon↔application IPC protocol, the SOME/IP message
//! header, and the SOME/IP-SD payload.

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod bytes;
pub mod control;
pub mod ipc;
pub mod sd;
pub mod someip;

pub use bytes::{ByteReader, ByteWriter, WireError};
pub use control::{
    ControlReturnCode, ReleaseServicePayload, RequestServiceResponsePayload,
    ServiceInstancePayload, SubscribeEventPayload,
};
pub use ipc::{
    encode_message, read_frame, read_frame_timeout, write_frame, GenericHeader, MessageType,
    ProtocolError, RawFrame, SpecificHeader, IPC_PROTOCOL_VERSION, MAX_BODY_LEN,
    MIN_RX_ALLOCATION,
};
pub use sd::{
    OptionRun, SdEntry, SdEntryPayload, SdEntryType, SdMessage, SdOption, TransportProto,
    SD_METHOD, SD_SERVICE,
};
pub use someip::{
    encode_header_only, SomeIpHeader, SomeIpMessageType, SomeIpReturnCode, SOMEIP_HEADER_LEN,
    SOMEIP_LENGTH_BASE, SOMEIP_PROTOCOL_VERSION,
};
