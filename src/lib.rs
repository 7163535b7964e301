// Copyright 2020 Joyent, Inc.

//! Request/response RPC over an unreliable, message-oriented WebSocket, with
//! a stateless HTTP fallback.
//!
//! Application code sees one call, [`ApiClient::send_api`], which takes a
//! `(route, data)` [`Request`] and always yields a [`Response`]:
//!
//! ```text
//! { "route": "/users", "error": null | "<message>", "data": ... }
//! ```
//!
//! Underneath:
//!
//! * The connection manager keeps at most one socket open, reconnecting
//!   after a flat delay whenever it closes or fails.
//!
//! * While the socket is open, each request gets a fresh correlation id
//!   (`requestId` on the wire) and an entry in the pending request table.
//!   The answering frame echoes the id and settles exactly that caller.
//!   Answers may arrive in any order.
//!
//! * Every socket request has the same deadline. An unanswered request
//!   fails with `"Request timeout"`; a late answer is dropped.
//!
//! * While the socket is not open, the request is POSTed to the HTTP
//!   endpoint instead, with the token sent as `Authorization: Custom <token>`.
//!
//! * Frames that cannot be parsed or correlated are logged and discarded.
//!
//! There are no retries beyond the reconnect loop and no caller-initiated
//! cancellation; a caller wanting another attempt calls `send_api` again.

#![allow(missing_docs)]

pub mod client;
pub mod config;
pub mod connection;
pub mod error;
pub mod fallback;
pub mod pending;
pub mod protocol;
pub mod token;

pub use client::ApiClient;
pub use config::TransportConfig;
pub use connection::ConnectionState;
pub use error::TransportError;
pub use protocol::{Request, Response};
pub use token::{Credentials, FileTokenStore, MemoryTokenStore, TokenStore};
