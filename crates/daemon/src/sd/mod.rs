// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Service discovery: client and server state machines, message
//! interpretation, entry scheduling, reboot detection, and the SD socket
//! endpoint.

pub mod client;
pub mod client_all;
pub mod client_sm;
pub mod endpoint;
pub mod entries;
pub mod jitter;
pub mod offer_check;
pub mod processor;
pub mod reboot;
pub mod scheduler;
pub mod server_offer;

pub use client::{ActiveOffer, OfferIntake, SdClient};
pub use client_all::{AllOfferIntake, SdClientAll};
pub use client_sm::FindPhase;
pub use endpoint::{decode_datagram, encode_datagram, SdEndpoint, SdSender, SessionPool};
pub use entries::{AckEntry, EntryEndpoints, FindEntry, InterpretedEntry, OfferEntry, SubscribeEntry};
pub use jitter::{JitterSource, UniformJitter};
pub use processor::{interpret_message, InterpretedMessage};
pub use reboot::RebootDetector;
pub use scheduler::{PostSendAction, SdCtx, SdJob, SdScheduler, Transmission};
pub use server_offer::{OfferPhase, ServerOffer};
