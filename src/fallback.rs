// Copyright 2020 Joyent, Inc.

//! Stateless request/response path used whenever the socket is not open.

use reqwest::header::AUTHORIZATION;
use slog::{debug, o, Drain, Logger};

use crate::error::TransportError;
use crate::protocol::{FallbackBody, Request, Response};

/// Authorization scheme the API server expects on fallback requests.
const AUTH_SCHEME: &str = "Custom";

pub struct FallbackTransport {
    http: reqwest::Client,
    url: String,
    log: Logger,
}

impl FallbackTransport {
    pub fn new<S: Into<String>>(
        url: S,
        log: Option<&Logger>,
    ) -> Result<FallbackTransport, TransportError> {
        let url = url.into();
        let log = match log {
            Some(l) => l.new(o!("component" => "fallback", "url" => url.clone())),
            None => Logger::root(slog_stdlog::StdLog.fuse(), o!()),
        };
        let http = reqwest::Client::builder().build()?;

        Ok(FallbackTransport { http, url, log })
    }

    /// One POST exchange. Never fails: every transport problem comes back
    /// as a `Response` carrying the error message and no data.
    pub async fn send_once(&self, request: &Request, token: Option<&str>) -> Response {
        match self.try_send_once(request, token).await {
            Ok(response) => response,
            Err(e) => {
                debug!(self.log, "fallback request failed";
                       "route" => &request.route, "err" => %e);
                Response::failure(request.route.as_str(), e.to_string())
            }
        }
    }

    async fn try_send_once(
        &self,
        request: &Request,
        token: Option<&str>,
    ) -> Result<Response, TransportError> {
        debug!(self.log, "sending fallback request"; "route" => &request.route);

        let mut builder = self.http.post(&self.url).json(&FallbackBody::from(request));
        if let Some(token) = token {
            builder = builder.header(AUTHORIZATION, authorization_value(token));
        }

        let reply = builder.send().await?;
        let status = reply.status();
        if !status.is_success() {
            return Err(TransportError::Status(status.as_u16()));
        }

        let body = reply.bytes().await?;
        let mut response: Response = serde_json::from_slice(&body)?;
        if response.route.is_empty() {
            response.route = request.route.clone();
        }
        Ok(response)
    }
}

fn authorization_value(token: &str) -> String {
    format!("{} {}", AUTH_SCHEME, token)
}
