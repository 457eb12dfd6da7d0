//! GraphQL operations spoken with the coordinator.
//!
//! | Operation                   | Channel          | Root field                  |
//! |-----------------------------|------------------|-----------------------------|
//! | `SetInstanceStatus`         | request/response | `setInstanceStatus`         |
//! | `SendMessage`               | request/response | `sendMessage`               |
//! | `SetSearchResponse`         | request/response | `setSearchResponse`         |
//! | `MessageReceived`           | event stream     | `messageReceived`           |
//! | `ConfigurationReceived`     | event stream     | `configurationReceived`     |
//! | `SubscribeToSearchRequests` | event stream     | `subscribeToSearchRequests` |

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};

use crate::error::{ChatPlugError, Result};

macro_rules! message_fields {
    () => {
        r#"
    id
    originId
    author { id originId username avatarUrl }
    thread { id name originId threadGroupId serviceInstanceId }
    body
    threadGroupId
    attachments { id originId type sourceUrl }
"#
    };
}

const SET_INSTANCE_STATUS: &str = r#"mutation setStatus {
  setInstanceStatus(status: INITIALIZED) { id }
}"#;

const SEND_MESSAGE: &str = concat!(
    "mutation sendMessage($message: MessageInput!) {\n  sendMessage(input: $message) {",
    message_fields!(),
    "  }\n}"
);

const SET_SEARCH_RESPONSE: &str = r#"mutation setSearchResponse($forQuery: String!, $threads: [ThreadSearchResultInput!]!) {
  setSearchResponse(forQuery: $forQuery, threads: $threads) {
    forQuery
    threads { iconUrl name originId }
  }
}"#;

const MESSAGE_RECEIVED: &str = concat!(
    "subscription onNewMessage {\n  messageReceived {\n    targetThreadId\n    message {",
    message_fields!(),
    "    }\n  }\n}"
);

const CONFIGURATION_RECEIVED: &str = r#"subscription onConfigChange($config: ConfigurationRequest!) {
  configurationReceived(configuration: $config) {
    fieldValues { name value }
  }
}"#;

const SUBSCRIBE_TO_SEARCH_REQUESTS: &str = r#"subscription subscribeToSearchRequests {
  subscribeToSearchRequests { query }
}"#;

/// Whether an operation is a one-shot call or a server-push stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    /// Request/response
    Mutation,
    /// Event stream
    Subscription,
}

/// Operations known to the client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    /// Announce the instance as initialized
    SetInstanceStatus,
    /// Post an outbound message
    SendMessage,
    /// Answer a search query
    SetSearchResponse,
    /// Inbound message stream
    MessageReceived,
    /// One-shot configuration push
    ConfigurationReceived,
    /// Inbound search query stream
    SubscribeToSearchRequests,
}

impl Operation {
    /// GraphQL operation name as written in the document
    pub fn name(self) -> &'static str {
        match self {
            Self::SetInstanceStatus => "setStatus",
            Self::SendMessage => "sendMessage",
            Self::SetSearchResponse => "setSearchResponse",
            Self::MessageReceived => "onNewMessage",
            Self::ConfigurationReceived => "onConfigChange",
            Self::SubscribeToSearchRequests => "subscribeToSearchRequests",
        }
    }

    /// Root field carrying the result inside `data`
    pub fn field(self) -> &'static str {
        match self {
            Self::SetInstanceStatus => "setInstanceStatus",
            Self::SendMessage => "sendMessage",
            Self::SetSearchResponse => "setSearchResponse",
            Self::MessageReceived => "messageReceived",
            Self::ConfigurationReceived => "configurationReceived",
            Self::SubscribeToSearchRequests => "subscribeToSearchRequests",
        }
    }

    /// GraphQL document
    pub fn document(self) -> &'static str {
        match self {
            Self::SetInstanceStatus => SET_INSTANCE_STATUS,
            Self::SendMessage => SEND_MESSAGE,
            Self::SetSearchResponse => SET_SEARCH_RESPONSE,
            Self::MessageReceived => MESSAGE_RECEIVED,
            Self::ConfigurationReceived => CONFIGURATION_RECEIVED,
            Self::SubscribeToSearchRequests => SUBSCRIBE_TO_SEARCH_REQUESTS,
        }
    }

    /// Channel the operation travels on
    pub fn kind(self) -> OperationKind {
        match self {
            Self::SetInstanceStatus | Self::SendMessage | Self::SetSearchResponse => {
                OperationKind::Mutation
            },
            Self::MessageReceived | Self::ConfigurationReceived | Self::SubscribeToSearchRequests => {
                OperationKind::Subscription
            },
        }
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.field())
    }
}

/// An operation with its variables, ready to hand to a channel
#[derive(Debug, Clone, PartialEq)]
pub struct OperationRequest {
    /// The operation
    pub operation: Operation,
    /// Variables object
    pub variables: Value,
}

impl OperationRequest {
    /// Request without variables
    pub fn new(operation: Operation) -> Self {
        Self {
            operation,
            variables: json!({}),
        }
    }

    /// Request with serialized variables
    pub fn with_variables(operation: Operation, variables: &impl Serialize) -> Result<Self> {
        Ok(Self {
            operation,
            variables: serde_json::to_value(variables)?,
        })
    }

    /// GraphQL-over-HTTP / graphql-ws payload body
    pub fn body(&self) -> Value {
        json!({
            "query": self.operation.document(),
            "variables": self.variables,
            "operationName": self.operation.name(),
        })
    }

    /// Decode the operation's root field out of a `data` object
    pub fn extract<T: DeserializeOwned>(&self, data: &Value) -> Result<T> {
        let field = self.operation.field();
        let value = data.get(field).ok_or_else(|| ChatPlugError::Decode {
            operation: field,
            message: format!("response has no `{field}` field"),
        })?;
        T::deserialize(value).map_err(|e| ChatPlugError::decode(field, &e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::SearchRequest;

    #[test]
    fn test_documents_name_their_operation() {
        for op in [
            Operation::SetInstanceStatus,
            Operation::SendMessage,
            Operation::SetSearchResponse,
            Operation::MessageReceived,
            Operation::ConfigurationReceived,
            Operation::SubscribeToSearchRequests,
        ] {
            let doc = op.document();
            assert!(doc.contains(op.name()), "{op:?} document lacks its name");
            assert!(doc.contains(op.field()), "{op:?} document lacks its field");
            let keyword = match op.kind() {
                OperationKind::Mutation => "mutation",
                OperationKind::Subscription => "subscription",
            };
            assert!(doc.starts_with(keyword));
        }
    }

    #[test]
    fn test_message_documents_select_full_message() {
        for op in [Operation::SendMessage, Operation::MessageReceived] {
            let doc = op.document();
            assert!(doc.contains("serviceInstanceId"));
            assert!(doc.contains("attachments { id originId type sourceUrl }"));
        }
        assert!(Operation::MessageReceived.document().contains("targetThreadId"));
    }

    #[test]
    fn test_body_shape() {
        let request = OperationRequest::with_variables(
            Operation::SetSearchResponse,
            &json!({ "forQuery": "q", "threads": [] }),
        )
        .unwrap();
        let body = request.body();
        assert_eq!(body["operationName"], "setSearchResponse");
        assert_eq!(body["variables"]["forQuery"], "q");
        assert!(body["query"].as_str().unwrap().starts_with("mutation"));
    }

    #[test]
    fn test_extract_root_field() {
        let request = OperationRequest::new(Operation::SubscribeToSearchRequests);
        let data = json!({ "subscribeToSearchRequests": { "query": "general" } });
        let parsed: SearchRequest = request.extract(&data).unwrap();
        assert_eq!(parsed.query, "general");

        let err = request.extract::<SearchRequest>(&json!({})).unwrap_err();
        assert!(matches!(err, ChatPlugError::Decode { .. }));

        let err = request
            .extract::<SearchRequest>(&json!({ "subscribeToSearchRequests": { "q": 1 } }))
            .unwrap_err();
        assert!(matches!(
            err,
            ChatPlugError::Decode {
                operation: "subscribeToSearchRequests",
                ..
            }
        ));
    }
}
