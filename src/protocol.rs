// Copyright 2020 Joyent, Inc.

//! Wire shapes shared by the socket and fallback paths.
//!
//! Socket frames are JSON text messages. An outgoing frame carries the
//! request, the correlation id and the caller's token:
//!
//! ```text
//! { "route": "/users", "data": {...}, "requestId": "req_1_1577836800000", "token": "..." | null }
//! ```
//!
//! The answering frame echoes the correlation id:
//!
//! ```text
//! { "route": "/users", "error": null, "data": [...], "requestId": "req_1_1577836800000" }
//! ```
//!
//! The fallback path POSTs `{ "route", "data" }` and receives a bare
//! `{ "route", "error", "data" }` body.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use serde_derive::{Deserialize, Serialize};
use serde_json::Value;

/*
 * Correlation ids are allocated from one process-wide counter so that no two
 * outstanding requests can ever share an id, whichever client issued them.
 */
static NEXT_REQUEST_SEQ: AtomicU64 = AtomicU64::new(1);

/// Identifier tagging one socket request so its answer can be matched
/// back to the waiting caller.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct CorrelationId(String);

impl CorrelationId {
    /// Allocate a fresh id of the form `req_<seq>_<unix-millis>`.
    pub fn next() -> CorrelationId {
        let seq = NEXT_REQUEST_SEQ.fetch_add(1, Ordering::Relaxed);
        CorrelationId(format!("req_{}_{}", seq, Utc::now().timestamp_millis()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for CorrelationId {
    fn from(s: &str) -> Self {
        CorrelationId(String::from(s))
    }
}

impl From<String> for CorrelationId {
    fn from(s: String) -> Self {
        CorrelationId(s)
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A call issued by application code. `route` is an opaque dispatch key
/// only the server understands.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Request {
    pub route: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl Request {
    pub fn new<S: Into<String>>(route: S, data: Value) -> Request {
        Request {
            route: route.into(),
            data: Some(data),
        }
    }

    pub fn without_data<S: Into<String>>(route: S) -> Request {
        Request {
            route: route.into(),
            data: None,
        }
    }
}

/// The normalized result every caller receives. A non-null `error` means
/// the call failed; otherwise `data` holds the payload, which may itself
/// be null.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Response {
    #[serde(default)]
    pub route: String,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub data: Option<Value>,
}

impl Response {
    pub fn success<S: Into<String>>(route: S, data: Option<Value>) -> Response {
        Response {
            route: route.into(),
            error: None,
            data,
        }
    }

    pub fn failure<S: Into<String>, E: Into<String>>(route: S, error: E) -> Response {
        Response {
            route: route.into(),
            error: Some(error.into()),
            data: None,
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// A request as written to the socket.
#[derive(Serialize, Clone, Debug)]
pub struct OutgoingFrame<'a> {
    pub route: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<&'a Value>,
    #[serde(rename = "requestId")]
    pub request_id: &'a CorrelationId,
    pub token: Option<&'a str>,
}

impl<'a> OutgoingFrame<'a> {
    pub fn new(
        request: &'a Request,
        request_id: &'a CorrelationId,
        token: Option<&'a str>,
    ) -> OutgoingFrame<'a> {
        OutgoingFrame {
            route: &request.route,
            data: request.data.as_ref(),
            request_id,
            token,
        }
    }

    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// A response as read from the socket.
#[derive(Deserialize, Clone, Debug)]
pub struct IncomingFrame {
    #[serde(default)]
    pub route: String,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub data: Option<Value>,
    #[serde(rename = "requestId")]
    pub request_id: CorrelationId,
}

impl IncomingFrame {
    pub fn parse(text: &str) -> Result<IncomingFrame, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// Split the frame into its correlation id and either the response or
    /// the server-reported error.
    pub fn into_outcome(self) -> (CorrelationId, Result<Response, String>) {
        let outcome = match self.error {
            Some(err) => Err(err),
            None => Ok(Response::success(self.route, self.data)),
        };
        (self.request_id, outcome)
    }
}

/// Body of a fallback POST.
#[derive(Serialize, Clone, Debug)]
pub struct FallbackBody<'a> {
    pub route: &'a str,
    pub data: Option<&'a Value>,
}

impl<'a> From<&'a Request> for FallbackBody<'a> {
    fn from(request: &'a Request) -> Self {
        FallbackBody {
            route: &request.route,
            data: request.data.as_ref(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::collections::HashSet;

    use quickcheck::{quickcheck, TestResult};
    use serde_json::json;

    #[test]
    fn outgoing_frame_shape() {
        let req = Request::new(
            "/users",
            json!({"pagi": {"page": 1, "keyword": "", "limit": 20}}),
        );
        let id = CorrelationId::from("req_1_1000");
        let frame = OutgoingFrame::new(&req, &id, Some("secret"));
        let encoded: Value = serde_json::from_str(&frame.encode().unwrap()).unwrap();

        assert_eq!(
            encoded,
            json!({
                "route": "/users",
                "data": {"pagi": {"page": 1, "keyword": "", "limit": 20}},
                "requestId": "req_1_1000",
                "token": "secret"
            })
        );
    }

    #[test]
    fn outgoing_frame_without_data_or_token() {
        let req = Request::without_data("/logout");
        let id = CorrelationId::from("req_7_1000");
        let encoded: Value =
            serde_json::from_str(&OutgoingFrame::new(&req, &id, None).encode().unwrap())
                .unwrap();

        assert_eq!(
            encoded,
            json!({"route": "/logout", "requestId": "req_7_1000", "token": null})
        );
    }

    #[test]
    fn incoming_frame_success_and_error() {
        let ok = IncomingFrame::parse(
            r#"{"route":"/users","error":null,"data":[{"id":1}],"requestId":"req_1_1"}"#,
        )
        .unwrap();
        let (id, outcome) = ok.into_outcome();
        assert_eq!(id.as_str(), "req_1_1");
        assert_eq!(
            outcome.unwrap(),
            Response::success("/users", Some(json!([{"id": 1}])))
        );

        let failed = IncomingFrame::parse(
            r#"{"route":"/users","error":"Permission denied","requestId":"req_2_1"}"#,
        )
        .unwrap();
        let (_, outcome) = failed.into_outcome();
        assert_eq!(outcome.unwrap_err(), "Permission denied");
    }

    #[test]
    fn incoming_frame_requires_request_id() {
        assert!(IncomingFrame::parse(r#"{"route":"/users","error":null}"#).is_err());
        assert!(IncomingFrame::parse("not json").is_err());
    }

    #[test]
    fn response_defaults_missing_fields() {
        let resp: Response = serde_json::from_str(r#"{"route":"/users"}"#).unwrap();
        assert_eq!(resp, Response::success("/users", None));
        assert!(!resp.is_error());
    }

    #[test]
    fn correlation_id_format() {
        let id = CorrelationId::next();
        let parts: Vec<&str> = id.as_str().split('_').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], "req");
        assert!(parts[1].parse::<u64>().is_ok());
        assert!(parts[2].parse::<i64>().is_ok());
    }

    quickcheck! {
        fn prop_correlation_ids_never_collide(n: u8) -> TestResult {
            let count = n as usize + 1;
            let ids: HashSet<CorrelationId> =
                (0..count).map(|_| CorrelationId::next()).collect();
            TestResult::from_bool(ids.len() == count)
        }

        fn prop_request_id_echoes_through_frames(route: String, raw_id: String) -> bool {
            let req = Request::without_data(route.clone());
            let id = CorrelationId::from(raw_id);
            let sent: Value = match OutgoingFrame::new(&req, &id, None).encode() {
                Ok(s) => serde_json::from_str(&s).unwrap(),
                Err(_) => return false,
            };
            let reply = json!({
                "route": sent["route"],
                "error": null,
                "requestId": sent["requestId"],
            });
            let frame = IncomingFrame::parse(&reply.to_string()).unwrap();
            frame.request_id == id && frame.route == route
        }
    }
}
