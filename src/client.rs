// Copyright 2020 Joyent, Inc.

use std::sync::Arc;
use std::time::Duration;

use slog::{debug, o, Drain, Logger};
use tokio::sync::oneshot;

use crate::config::TransportConfig;
use crate::connection::{ConnectionManager, ConnectionState};
use crate::error::TransportError;
use crate::fallback::FallbackTransport;
use crate::pending::PendingTable;
use crate::protocol::{CorrelationId, OutgoingFrame, Request, Response};
use crate::token::TokenStore;

/// The one entry point application code calls.
///
/// Requests go over the persistent socket while it is open and over a
/// single HTTP POST otherwise. Whatever happens underneath, `send_api`
/// hands back a `Response`; transport failures show up in its `error`
/// field and never as a panic or an `Err`.
pub struct ApiClient {
    config: TransportConfig,
    tokens: Arc<dyn TokenStore>,
    table: PendingTable,
    connection: ConnectionManager,
    fallback: FallbackTransport,
    log: Logger,
}

impl ApiClient {
    /// Build the transport and start connecting. Must be called from within
    /// a tokio runtime.
    pub fn start(
        config: TransportConfig,
        tokens: Arc<dyn TokenStore>,
        log: Option<&Logger>,
    ) -> Result<ApiClient, TransportError> {
        let log = match log {
            Some(l) => l.new(o!()),
            None => Logger::root(slog_stdlog::StdLog.fuse(), o!()),
        };
        let table = PendingTable::new(Some(&log));
        let fallback = FallbackTransport::new(config.http_url.as_str(), Some(&log))?;
        let connection = ConnectionManager::start(&config, table.clone(), Some(&log));

        Ok(ApiClient {
            config,
            tokens,
            table,
            connection,
            fallback,
            log,
        })
    }

    pub async fn send_api(&self, request: Request) -> Response {
        let token = self.tokens.token();

        match self.connection.open_generation() {
            Some(generation) => {
                match self.send_socket(&request, token.as_deref(), generation).await {
                    Ok(response) => response,
                    Err(e) => {
                        debug!(self.log, "socket request failed";
                               "route" => &request.route, "err" => %e);
                        Response::failure(request.route.as_str(), e.to_string())
                    }
                }
            }
            None => self.fallback.send_once(&request, token.as_deref()).await,
        }
    }

    async fn send_socket(
        &self,
        request: &Request,
        token: Option<&str>,
        generation: u64,
    ) -> Result<Response, TransportError> {
        let id = CorrelationId::next();
        let frame = OutgoingFrame::new(request, &id, token).encode()?;

        let (handle, completion) = oneshot::channel();
        self.table
            .register(id.clone(), generation, handle, self.config.request_timeout);
        if let Err(e) = self.connection.send(id.clone(), generation, frame) {
            self.table.reject(&id, TransportError::Shutdown);
            return Err(e);
        }

        // A dropped handle can only come from the table being torn down.
        let mut response = completion.await.map_err(|_| TransportError::Shutdown)??;
        if response.route.is_empty() {
            response.route = request.route.clone();
        }
        Ok(response)
    }

    pub fn state(&self) -> ConnectionState {
        self.connection.state()
    }

    pub fn connection(&self) -> &ConnectionManager {
        &self.connection
    }

    pub fn token_store(&self) -> &Arc<dyn TokenStore> {
        &self.tokens
    }

    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    /// Number of socket requests currently awaiting an answer.
    pub fn pending_len(&self) -> usize {
        self.table.len()
    }

    pub async fn wait_until_open(&self, within: Duration) -> bool {
        self.connection.wait_until_open(within).await
    }

    /// Close the socket and fail whatever is still outstanding.
    pub async fn shutdown(&self) {
        self.connection.stop().await;
        self.table.reject_all();
    }
}
