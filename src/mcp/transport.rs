//! Per-request HTTP transport session
//!
//! Wraps exactly one HTTP request/response exchange. A session is created
//! fresh for every inbound request, bound to exactly one [`ProtocolServer`],
//! and released when the response body completes or the client disconnects.
//! Session-less by construction: no session id is ever issued, and no two
//! HTTP requests are correlated as the same logical client.

use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    body::Bytes,
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    Json,
};
use futures::{stream::BoxStream, StreamExt};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, error};

use crate::mcp::rpc::{json_rpc_error, json_rpc_notification, INTERNAL_ERROR, PARSE_ERROR};
use crate::mcp::server::ProtocolServer;
use crate::LifecycleStats;

/// Bounded queue between a dispatching server and the response body. The
/// handler suspends on `send` when the client reads slowly, which is what
/// keeps notification delivery strictly ordered.
const OUTBOUND_CHANNEL_CAPACITY: usize = 16;

/// A message headed for the wire: either a server-initiated notification or
/// the terminal response that ends the exchange.
#[derive(Debug)]
pub enum Outbound {
    Notification(Value),
    Response(Value),
}

impl Outbound {
    pub fn is_response(&self) -> bool {
        matches!(self, Self::Response(_))
    }

    pub fn into_value(self) -> Value {
        match self {
            Self::Notification(value) | Self::Response(value) => value,
        }
    }
}

/// The transport has shut down; no further messages can reach the client.
#[derive(Debug, Error)]
#[error("transport closed")]
pub struct TransportClosed;

/// Ordered notification primitive handed to capability handlers. Sends fail
/// with [`TransportClosed`] once the client has disconnected, which handlers
/// treat as a signal to stop scheduling further work.
#[derive(Debug, Clone)]
pub struct NotificationSender {
    tx: mpsc::Sender<Outbound>,
}

impl NotificationSender {
    pub(crate) fn new(tx: mpsc::Sender<Outbound>) -> Self {
        Self { tx }
    }

    pub async fn send(&self, method: &str, params: Value) -> Result<(), TransportClosed> {
        self.tx
            .send(Outbound::Notification(json_rpc_notification(method, params)))
            .await
            .map_err(|_| TransportClosed)
    }
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("transport is already connected to a protocol server")]
    AlreadyConnected,
}

/// One HTTP exchange worth of transport state. Never pooled, never reused.
pub struct TransportSession {
    server: Option<ProtocolServer>,
    lifecycle: Arc<LifecycleStats>,
    released: bool,
}

impl TransportSession {
    pub fn new(lifecycle: Arc<LifecycleStats>) -> Self {
        lifecycle.record_transport_built();
        Self {
            server: None,
            lifecycle,
            released: false,
        }
    }

    /// Binds this session to one protocol server for its whole lifetime.
    pub fn connect(&mut self, server: ProtocolServer) -> Result<(), TransportError> {
        if self.server.is_some() {
            return Err(TransportError::AlreadyConnected);
        }
        self.server = Some(server);
        Ok(())
    }

    /// Idempotent release; also runs on drop so abrupt client disconnects
    /// cannot leak a session.
    pub fn close(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        self.server.take();
        self.lifecycle.record_transport_released();
        debug!("transport session released");
    }

    /// Services one POST exchange: decode the body, hand the envelope to the
    /// connected server on a spawned task, and pick the response encoding
    /// from the first message the server emits. A terminal response first
    /// means a plain JSON body; a notification first means the exchange
    /// streams every message in emission order, result last.
    pub async fn handle_post(mut self, body: Bytes) -> TransportResponse {
        let payload: Value = match serde_json::from_slice(&body) {
            Ok(value) => value,
            Err(_) => {
                self.close();
                return TransportResponse::Json(json_rpc_error(None, PARSE_ERROR, "Parse error"));
            }
        };

        // Bodies double-encoded as a JSON string still carry one envelope.
        let payload = match payload {
            Value::String(raw) => match serde_json::from_str(&raw) {
                Ok(value) => value,
                Err(_) => {
                    self.close();
                    return TransportResponse::Json(json_rpc_error(
                        None,
                        PARSE_ERROR,
                        "Parse error",
                    ));
                }
            },
            other => other,
        };

        let Some(server) = self.server.take() else {
            self.close();
            return TransportResponse::ServerError(json_rpc_error(
                None,
                INTERNAL_ERROR,
                "Internal server error",
            ));
        };

        let (tx, mut rx) = mpsc::channel::<Outbound>(OUTBOUND_CHANNEL_CAPACITY);
        let dispatch = tokio::spawn(async move {
            let notifications = NotificationSender::new(tx.clone());
            let response = server.handle_message(payload, notifications).await;
            // The server instance is released before the terminal write so
            // teardown has already happened when the client sees the result.
            drop(server);
            if let Some(value) = response {
                let _ = tx.send(Outbound::Response(value)).await;
            }
        });

        match rx.recv().await {
            None => {
                // Either a notification-only input, which produces no
                // response envelope, or the dispatch task died before
                // writing anything.
                let dispatch_failed = dispatch.await.is_err();
                self.close();
                if dispatch_failed {
                    error!("dispatch task failed before writing a response");
                    return TransportResponse::ServerError(json_rpc_error(
                        None,
                        INTERNAL_ERROR,
                        "Internal server error",
                    ));
                }
                TransportResponse::NoContent
            }
            Some(Outbound::Response(value)) => {
                self.close();
                TransportResponse::Json(value)
            }
            Some(first) => TransportResponse::Stream(self.into_event_stream(first, rx)),
        }
    }

    /// Services one GET exchange: opens the read channel for server-initiated
    /// messages. Nothing is ever queued in session-less mode, so the stream
    /// ends as soon as it is polled; the session is released when the body
    /// completes.
    pub fn handle_get(self) -> TransportResponse {
        let (tx, mut rx) = mpsc::channel::<Outbound>(1);
        drop(tx);

        let stream = async_stream::stream! {
            let mut session = self;
            while let Some(outbound) = rx.recv().await {
                yield Ok(Event::default()
                    .event("message")
                    .data(outbound.into_value().to_string()));
            }
            session.close();
        };

        TransportResponse::Stream(stream.boxed())
    }

    fn into_event_stream(
        self,
        first: Outbound,
        mut rx: mpsc::Receiver<Outbound>,
    ) -> BoxStream<'static, Result<Event, Infallible>> {
        let stream = async_stream::stream! {
            let mut session = self;
            let mut next = Some(first);
            while let Some(outbound) = next.take() {
                let terminal = outbound.is_response();
                yield Ok(Event::default()
                    .event("message")
                    .data(outbound.into_value().to_string()));
                if terminal {
                    break;
                }
                next = rx.recv().await;
            }
            session.close();
        };

        stream.boxed()
    }
}

impl Drop for TransportSession {
    fn drop(&mut self) {
        self.close();
    }
}

/// Encoded outcome of one exchange, ready to hand back to axum.
pub enum TransportResponse {
    Json(Value),
    /// An error envelope sent before any part of the response was written;
    /// carries HTTP 500 like every other unstarted-response failure.
    ServerError(Value),
    NoContent,
    Stream(BoxStream<'static, Result<Event, Infallible>>),
}

impl IntoResponse for TransportResponse {
    fn into_response(self) -> Response {
        match self {
            Self::Json(value) => (StatusCode::OK, Json(value)).into_response(),
            Self::ServerError(value) => {
                (StatusCode::INTERNAL_SERVER_ERROR, Json(value)).into_response()
            }
            Self::NoContent => StatusCode::NO_CONTENT.into_response(),
            Self::Stream(stream) => Sse::new(stream).keep_alive(KeepAlive::default()).into_response(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;

    use async_trait::async_trait;

    use super::*;
    use crate::domain::{
        build_capability_table, CapabilityTable, ToolCapability, ToolDescriptor, ToolOutput,
    };
    use crate::errors::AppError;
    use crate::mcp::server::ProtocolServer;
    use crate::LifecycleStats;

    struct FailingTool;

    #[async_trait]
    impl ToolCapability for FailingTool {
        fn descriptor(&self) -> ToolDescriptor {
            ToolDescriptor {
                name: "failing-tool",
                title: "Failing Tool",
                description: "dies before producing any output",
                input_schema: json!({ "type": "object" }),
                output_schema: None,
            }
        }

        fn validate(&self, arguments: Value) -> Result<Value, AppError> {
            Ok(arguments)
        }

        async fn call(
            &self,
            _arguments: Value,
            _notifications: NotificationSender,
        ) -> Result<ToolOutput, AppError> {
            panic!("handler died");
        }
    }

    fn lifecycle() -> Arc<LifecycleStats> {
        Arc::new(LifecycleStats::default())
    }

    fn server(lifecycle: &Arc<LifecycleStats>) -> ProtocolServer {
        let table = Arc::new(build_capability_table(100).expect("capability table"));
        ProtocolServer::new(table, Arc::clone(lifecycle))
    }

    #[test]
    fn connect_rejects_second_server() {
        let lifecycle = lifecycle();
        let mut transport = TransportSession::new(Arc::clone(&lifecycle));

        transport
            .connect(server(&lifecycle))
            .expect("first connect succeeds");
        let err = transport
            .connect(server(&lifecycle))
            .expect_err("second connect must fail");

        assert!(matches!(err, TransportError::AlreadyConnected));
    }

    #[test]
    fn close_is_idempotent() {
        let lifecycle = lifecycle();
        let mut transport = TransportSession::new(Arc::clone(&lifecycle));

        transport.close();
        transport.close();

        let snapshot = lifecycle.snapshot();
        assert_eq!(snapshot.transports_built, 1);
        assert_eq!(snapshot.transports_released, 1);
    }

    #[test]
    fn drop_releases_exactly_once() {
        let lifecycle = lifecycle();
        {
            let _transport = TransportSession::new(Arc::clone(&lifecycle));
        }

        assert_eq!(lifecycle.snapshot().transports_released, 1);
    }

    #[tokio::test]
    async fn notification_send_fails_after_receiver_drops() {
        let (tx, rx) = mpsc::channel::<Outbound>(1);
        let sender = NotificationSender::new(tx);
        drop(rx);

        let err = sender
            .send("notifications/message", json!({"level": "info"}))
            .await;
        assert!(err.is_err());
    }

    #[tokio::test]
    async fn post_parse_failure_closes_session_and_reports_error() {
        let lifecycle = lifecycle();
        let mut transport = TransportSession::new(Arc::clone(&lifecycle));
        transport
            .connect(server(&lifecycle))
            .expect("connect succeeds");

        let response = transport.handle_post(Bytes::from_static(b"{nope")).await;

        match response {
            TransportResponse::Json(value) => {
                assert_eq!(value["error"]["code"], json!(PARSE_ERROR));
                assert_eq!(value["id"], serde_json::Value::Null);
            }
            _ => panic!("expected json error response"),
        }
        let snapshot = lifecycle.snapshot();
        assert_eq!(snapshot.transports_released, 1);
        assert_eq!(snapshot.servers_released, 1);
    }

    #[tokio::test]
    async fn dispatch_death_before_any_write_yields_500_internal_error() {
        let lifecycle = lifecycle();
        let mut table = CapabilityTable::default();
        table
            .register_tool(Arc::new(FailingTool))
            .expect("register tool");
        let server = ProtocolServer::new(Arc::new(table), Arc::clone(&lifecycle));
        let mut transport = TransportSession::new(Arc::clone(&lifecycle));
        transport.connect(server).expect("connect succeeds");

        let body =
            r#"{"jsonrpc":"2.0","id":1,"method":"tools/call","params":{"name":"failing-tool","arguments":{}}}"#;
        let response = transport
            .handle_post(Bytes::from_static(body.as_bytes()))
            .await;

        match &response {
            TransportResponse::ServerError(value) => {
                assert_eq!(value["error"]["code"], json!(INTERNAL_ERROR));
                assert_eq!(value["id"], Value::Null);
            }
            _ => panic!("expected server error response"),
        }
        assert_eq!(
            response.into_response().status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );

        let snapshot = lifecycle.snapshot();
        assert_eq!(snapshot.servers_released, 1);
        assert_eq!(snapshot.transports_released, 1);
    }

    #[tokio::test]
    async fn string_body_containing_envelope_is_unwrapped() {
        let lifecycle = lifecycle();
        let mut transport = TransportSession::new(Arc::clone(&lifecycle));
        transport
            .connect(server(&lifecycle))
            .expect("connect succeeds");

        let inner = r#"{"jsonrpc":"2.0","id":5,"method":"ping"}"#;
        let body = serde_json::to_vec(&json!(inner)).expect("string body");
        let response = transport.handle_post(Bytes::from(body)).await;

        match response {
            TransportResponse::Json(value) => {
                assert_eq!(value["id"], json!(5));
                assert!(value.get("result").is_some());
            }
            _ => panic!("expected json response"),
        }
    }
}
