// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-application plane: the framed IPC connection, the receive/send
//! routers, the command controller, and the application pool.

pub mod application;
pub mod command;
pub mod connection;
pub mod manager;
pub mod recv;
pub mod send;

pub use application::{Application, LocalClient};
pub use connection::{Connection, ConnectionId, ConnectionState, TxEntry, TxError};
pub use manager::ApplicationManager;
pub use send::SendRouter;
