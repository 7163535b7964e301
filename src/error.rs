// Copyright 2020 Joyent, Inc.

use std::io;

use thiserror::Error;
use tokio_tungstenite::tungstenite;

/// Every way a single API call can fail below the facade.
///
/// The `Display` text of each variant is what callers finally see in
/// `Response::error`, so the wording of `Timeout` and `Server` is part of
/// the public contract.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Request timeout")]
    Timeout,
    #[error("socket is not connected")]
    NotConnected,
    /// Failure reported by the server for one request, passed through
    /// verbatim.
    #[error("{0}")]
    Server(String),
    #[error("socket error: {0}")]
    Socket(#[from] tungstenite::Error),
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("request failed with status code {0}")]
    Status(u16),
    #[error("malformed JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("transport shut down")]
    Shutdown,
}
