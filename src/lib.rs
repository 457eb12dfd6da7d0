//! # ChatPlug Client - Bridge-Side Coordinator Link
//!
//! Client library for ChatPlug service plugins. A plugin bridges one external
//! chat network into the ChatPlug coordinator; this crate gives it the link:
//! announcing the instance, exchanging messages, negotiating configuration
//! and answering thread searches.
//!
//! ## Features
//!
//! - **Dual-channel transport**: GraphQL over HTTP for one-shot calls, graphql-ws
//!   subscriptions multiplexed over one WebSocket for server pushes
//! - **Startup lifecycle**: announce, subscribe, optional configuration, ready
//! - **Typed events**: every push is decoded into the data model before delivery
//! - **Configuration cache**: negotiated values persisted per instance
//! - **Reconnects**: exponential backoff with jitter and resubscription
//!
//! ## Protocol Overview
//!
//! ```text
//! Plugin (Client)                               Coordinator
//!    |                                               |
//!    |------ setInstanceStatus(INITIALIZED) -------->|   HTTP
//!    |<----- {id} -----------------------------------|
//!    |                                               |
//!    |====== connection_init {accessToken} =========>|   WebSocket
//!    |<===== connection_ack =========================|
//!    |====== start messageReceived =================>|
//!    |====== start subscribeToSearchRequests =======>|
//!    |====== start configurationReceived(schema) ===>|
//!    |<===== data configurationReceived =============|
//!    |====== stop configurationReceived ============>|
//!    |                                               |
//!    |<===== data messageReceived ===================|
//!    |------ sendMessage(input) -------------------->|   HTTP
//!    |<----- Message --------------------------------|
//! ```
//!
//! ### Operations
//!
//! | Operation                   | Channel  | Direction | Payload → Result                 |
//! |-----------------------------|----------|-----------|----------------------------------|
//! | `setInstanceStatus`         | HTTP     | outbound  | none → `{id}`                    |
//! | `sendMessage`               | HTTP     | outbound  | `MessageInput` → `Message`       |
//! | `setSearchResponse`         | HTTP     | outbound  | `{forQuery, threads}` → ack      |
//! | `messageReceived`           | WS       | inbound   | none → `MessagePayload`          |
//! | `configurationReceived`     | WS       | inbound   | schema → `ConfigurationResponse` |
//! | `subscribeToSearchRequests` | WS       | inbound   | none → `SearchRequest`           |
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use chatplug::{Client, ClientConfig, ClientEvent};
//!
//! let client = Client::new(ClientConfig::from_env()?)?;
//! let mut events = client.events();
//! client.connect(None).await?;
//!
//! while let Some(event) = events.recv().await {
//!     if let ClientEvent::Message { target_thread_id, message } = event {
//!         println!("[{target_thread_id}] {}: {}", message.author.username, message.body);
//!     }
//! }
//! ```
//!
//! ### Search
//!
//! ```rust,ignore
//! use chatplug::{SearchRequest, ThreadSearchResult};
//!
//! client
//!     .handle_search(|request: SearchRequest| async move {
//!         Ok(vec![ThreadSearchResult::new(request.query, "", "origin-1")])
//!     })
//!     .await?;
//! ```
//!
//! ## Modules
//!
//! - [`client`]: Client handle, events and search resolvers
//! - [`protocol`]: Data model, operation documents and lifecycle
//! - [`transport`]: Request and event channels
//! - [`store`]: Configuration cache
//! - [`config`]: Client configuration
//! - [`error`]: Error types and result aliases

pub mod client;
pub mod config;
pub mod error;
pub mod protocol;
pub mod store;
pub mod transport;

// Re-exports for convenience
pub use client::{Client, ClientEvent, EventReceiver, SearchResolver};
pub use config::{ClientConfig, ReconnectConfig, TransportConfig};
pub use error::{ChatPlugError, Result};
pub use protocol::{
    Attachment, AttachmentInput, AttachmentType, ConfigurationField, ConfigurationRequest,
    ConfigurationResponse, FieldType, FieldValue, LifecycleState, Message, MessageAuthor,
    MessageAuthorInput, MessageInput, MessagePayload, SearchRequest, SearchResponse, Thread,
    ThreadSearchResult,
};
pub use store::{ConfigStore, FileConfigStore, MemoryConfigStore};
pub use transport::{EventChannel, RequestChannel, Subscription, TransportPair};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
