// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Service-side domain objects: required instances with their SD clients
//! and remote-server proxies, the provided-side ownership and routing
//! handles, and client-id allocation.

pub mod client_ids;
pub mod local_server;
pub mod remote;
pub mod required;
pub mod subscription;
pub mod transport;

pub use client_ids::{ClientIdError, ClientIdGenerator};
pub use local_server::{LocalServer, LocalServerManager, Requester, ServedSubscriber};
pub use remote::{LocalSubscriber, RemoteServer};
pub use required::{OfferOutcome, RequestServiceError, RequiredServiceInstance};
pub use subscription::SubscriptionState;
pub use transport::{NetTransport, NullTransport};
