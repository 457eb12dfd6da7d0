//! ChatPlug coordinator protocol.
//!
//! Typed data model, GraphQL operation documents and the connection
//! lifecycle state machine.
//!
//! # Identity
//!
//! Messages, threads, authors and attachments each carry a coordinator `id`
//! and an `origin_id` assigned by the external chat network. Origin IDs are
//! opaque and never rewritten by the client.
//!
//! # Lifecycle
//!
//! ```text
//!   [Created] ── announce ──> [Announced] ── open streams ──> [Subscribed]
//!                                                                │     │
//!                                            schema supplied ────┘     │ no schema
//!                                                   v                  │
//!                                             [Configuring] ──> [Ready] <┘
//! ```
//!
//! | State         | Description                               | Valid Transitions        |
//! |---------------|-------------------------------------------|--------------------------|
//! | `Created`     | Client built, nothing sent                | → Announced              |
//! | `Announced`   | Coordinator knows the instance            | → Subscribed             |
//! | `Subscribed`  | Message (and search) streams open         | → Configuring, → Ready   |
//! | `Configuring` | Waiting for configuration values          | → Ready                  |
//! | `Ready`       | Steady state                              | (terminal)               |

mod configuration;
mod lifecycle;
mod message;
mod operations;
mod search;

pub use configuration::{
    ConfigurationField, ConfigurationRequest, ConfigurationResponse, FieldType, FieldValue,
    REDACTED,
};
pub use lifecycle::{Lifecycle, LifecycleState};
pub use message::{
    Attachment, AttachmentInput, AttachmentType, Message, MessageAuthor, MessageAuthorInput,
    MessageInput, MessagePayload, Thread,
};
pub use operations::{Operation, OperationKind, OperationRequest};
pub use search::{SearchRequest, SearchResponse, ThreadSearchResult};

/// WebSocket sub-protocol used by the event channel
pub const WS_SUBPROTOCOL: &str = "graphql-ws";
