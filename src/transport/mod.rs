//! Transport layer for the coordinator link.
//!
//! The client talks to the coordinator over two channels:
//! - **Request channel**: one-shot GraphQL calls (announce, send, search response)
//! - **Event channel**: server-push GraphQL subscriptions multiplexed over one socket
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │                 Client                  │
//! │          (Transport-Agnostic)           │
//! └──────────────────┬──────────────────────┘
//!                    │ TransportPair
//!          ┌────────┴────────┐
//!          ▼                 ▼
//! ┌─────────────────┐ ┌─────────────────┐
//! │   HttpChannel   │ │    WsChannel    │
//! │ (GraphQL/HTTP)  │ │  (graphql-ws)   │
//! └─────────────────┘ └─────────────────┘
//! ```
//!
//! Both channels sit behind traits so tests can drive the client with
//! in-memory fakes.

mod backoff;
mod http;
mod ws;

pub use backoff::Backoff;
pub use http::HttpChannel;
pub use ws::WsChannel;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::Stream;
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::config::ClientConfig;
use crate::error::{ChatPlugError, Result};
use crate::protocol::{Operation, OperationKind, OperationRequest};

/// Boxed future returned by channel operations
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// One-shot request/response channel.
///
/// Implementations resolve with the GraphQL `data` object. Each call is
/// attempted at most once.
pub trait RequestChannel: Send + Sync {
    /// Execute a mutation and return its `data` object.
    fn execute<'a>(&'a self, request: &'a OperationRequest) -> BoxFuture<'a, Result<Value>>;

    /// Channel name for logging.
    fn name(&self) -> &'static str;
}

/// Server-push event channel.
///
/// Every call opens an independent logical subscription; implementations
/// multiplex them over one physical connection.
pub trait EventChannel: Send + Sync {
    /// Open a subscription yielding `data` objects.
    fn subscribe(&self, request: OperationRequest) -> BoxFuture<'_, Result<Subscription>>;

    /// Channel name for logging.
    fn name(&self) -> &'static str;
}

/// Sender half feeding a [`Subscription`]
pub type SubscriptionSender = mpsc::UnboundedSender<Result<Value>>;

/// A live subscription.
///
/// Yields `data` objects in push order and ends when the server completes
/// the subscription or the channel gives up. Dropping it unsubscribes.
pub struct Subscription {
    id: String,
    operation: Operation,
    items: mpsc::UnboundedReceiver<Result<Value>>,
    on_drop: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    /// Wrap a receiver fed by a channel implementation
    pub fn new(
        id: impl Into<String>,
        operation: Operation,
        items: mpsc::UnboundedReceiver<Result<Value>>,
    ) -> Self {
        Self {
            id: id.into(),
            operation,
            items,
            on_drop: None,
        }
    }

    /// Create a sender/subscription pair
    pub fn channel(id: impl Into<String>, operation: Operation) -> (SubscriptionSender, Self) {
        let (tx, rx) = mpsc::unbounded_channel();
        (tx, Self::new(id, operation, rx))
    }

    /// Run `cancel` when the subscription is dropped
    pub fn with_cancel(mut self, cancel: impl FnOnce() + Send + Sync + 'static) -> Self {
        self.on_drop = Some(Box::new(cancel));
        self
    }

    /// Channel-assigned subscription ID
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Subscribed operation
    pub fn operation(&self) -> Operation {
        self.operation
    }
}

impl Stream for Subscription {
    type Item = Result<Value>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.items.poll_recv(cx)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(cancel) = self.on_drop.take() {
            cancel();
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("operation", &self.operation)
            .finish_non_exhaustive()
    }
}

/// The request channel and event channel of one client
#[derive(Clone)]
pub struct TransportPair {
    requests: Arc<dyn RequestChannel>,
    events: Arc<dyn EventChannel>,
}

impl TransportPair {
    /// Pair arbitrary channel implementations
    pub fn new(requests: Arc<dyn RequestChannel>, events: Arc<dyn EventChannel>) -> Self {
        Self { requests, events }
    }

    /// GraphQL over HTTP plus graphql-ws, built from the client configuration
    pub fn connect(config: &ClientConfig) -> Result<Self> {
        let requests = HttpChannel::new(config)?;
        let events = WsChannel::new(config);
        tracing::debug!(
            http = %config.http_endpoint,
            ws = %config.ws_endpoint,
            "transport pair built"
        );
        Ok(Self::new(Arc::new(requests), Arc::new(events)))
    }

    /// Run a mutation
    pub async fn request(&self, request: &OperationRequest) -> Result<Value> {
        expect_kind(request.operation, OperationKind::Mutation)?;
        self.requests.execute(request).await
    }

    /// Open a subscription
    pub async fn subscribe(&self, request: OperationRequest) -> Result<Subscription> {
        expect_kind(request.operation, OperationKind::Subscription)?;
        self.events.subscribe(request).await
    }

    /// Channel names, for logging
    pub fn names(&self) -> (&'static str, &'static str) {
        (self.requests.name(), self.events.name())
    }
}

fn expect_kind(operation: Operation, kind: OperationKind) -> Result<()> {
    if operation.kind() == kind {
        Ok(())
    } else {
        Err(ChatPlugError::Protocol(format!(
            "{operation} is a {:?}, not a {kind:?}",
            operation.kind()
        )))
    }
}

/// GraphQL response envelope, shared by both channels
#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct GraphQlResponse {
    #[serde(default)]
    pub data: Option<Value>,
    #[serde(default)]
    pub errors: Vec<GraphQlError>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct GraphQlError {
    pub message: String,
}

impl GraphQlResponse {
    /// Joined error messages, if any
    pub fn error_summary(&self) -> Option<String> {
        if self.errors.is_empty() {
            None
        } else {
            Some(
                self.errors
                    .iter()
                    .map(|e| e.message.as_str())
                    .collect::<Vec<_>>()
                    .join("; "),
            )
        }
    }

    /// Unwrap `data`, turning GraphQL errors into transport errors
    pub fn into_data(self, operation: Operation) -> Result<Value> {
        if let Some(summary) = self.error_summary() {
            return Err(ChatPlugError::Transport(format!("{operation}: {summary}")));
        }
        match self.data {
            Some(data) if !data.is_null() => Ok(data),
            _ => Err(ChatPlugError::Transport(format!(
                "{operation}: response carried no data"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[test]
    fn test_graphql_errors_become_transport_errors() {
        let response: GraphQlResponse = serde_json::from_value(json!({
            "data": null,
            "errors": [{ "message": "unauthorized" }, { "message": "try again" }]
        }))
        .unwrap();
        let err = response.into_data(Operation::SendMessage).unwrap_err();
        assert!(err.is_transport());
        assert!(err.to_string().contains("unauthorized; try again"));
    }

    #[test]
    fn test_missing_data_is_an_error() {
        let response = GraphQlResponse::default();
        assert!(response.into_data(Operation::SetInstanceStatus).is_err());

        let response: GraphQlResponse =
            serde_json::from_value(json!({ "data": { "setInstanceStatus": { "id": "1" } } }))
                .unwrap();
        let data = response.into_data(Operation::SetInstanceStatus).unwrap();
        assert_eq!(data["setInstanceStatus"]["id"], "1");
    }

    #[tokio::test]
    async fn test_subscription_streams_in_order_and_cancels_on_drop() {
        let cancelled = Arc::new(AtomicBool::new(false));
        let flag = cancelled.clone();

        let (tx, sub) = Subscription::channel("7", Operation::MessageReceived);
        let mut sub = sub.with_cancel(move || flag.store(true, Ordering::SeqCst));
        assert_eq!(sub.id(), "7");

        tx.send(Ok(json!({ "n": 1 }))).unwrap();
        tx.send(Ok(json!({ "n": 2 }))).unwrap();
        assert_eq!(sub.next().await.unwrap().unwrap()["n"], 1);
        assert_eq!(sub.next().await.unwrap().unwrap()["n"], 2);

        drop(tx);
        assert!(sub.next().await.is_none());
        assert!(!cancelled.load(Ordering::SeqCst));

        drop(sub);
        assert!(cancelled.load(Ordering::SeqCst));
    }

    #[test]
    fn test_kind_checks() {
        assert!(expect_kind(Operation::SendMessage, OperationKind::Mutation).is_ok());
        assert!(expect_kind(Operation::SendMessage, OperationKind::Subscription).is_err());
        assert!(expect_kind(Operation::MessageReceived, OperationKind::Subscription).is_ok());
    }
}
