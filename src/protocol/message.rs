//! Chat message model.
//!
//! Every entity carries two identifiers: `id`, assigned by the coordinator, and
//! `origin_id`, assigned by the external chat network the entity came from.
//! Origin identifiers are opaque and are passed through untouched.

use serde::{Deserialize, Serialize};

/// Kind of media an attachment points at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AttachmentType {
    /// Generic file
    File,
    /// Image
    Image,
    /// Audio clip
    Audio,
    /// Video clip
    Video,
}

/// Author of a message as resolved by the coordinator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageAuthor {
    /// Coordinator ID
    pub id: String,
    /// ID on the originating network
    pub origin_id: String,
    /// Display name
    pub username: String,
    /// Avatar URL
    pub avatar_url: String,
}

/// Conversation thread on one network
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Thread {
    /// Coordinator ID
    pub id: String,
    /// Thread display name
    pub name: String,
    /// ID on the originating network
    pub origin_id: String,
    /// Group linking sibling threads across bridged networks
    pub thread_group_id: String,
    /// Plugin instance owning this thread
    pub service_instance_id: String,
    /// Messages, only present when the coordinator chooses to inline them
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub messages: Option<Vec<Message>>,
}

/// Attachment reference (no inline binary data)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    /// Coordinator ID
    pub id: String,
    /// ID on the originating network
    pub origin_id: String,
    /// Media kind
    #[serde(rename = "type")]
    pub kind: AttachmentType,
    /// Where the content can be fetched
    pub source_url: String,
}

/// Canonical message as stored by the coordinator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Coordinator ID
    pub id: String,
    /// ID on the originating network
    pub origin_id: String,
    /// Resolved author
    pub author: MessageAuthor,
    /// Resolved thread
    pub thread: Thread,
    /// Text body
    pub body: String,
    /// Thread group the message belongs to
    pub thread_group_id: String,
    /// Attachments
    #[serde(default)]
    pub attachments: Vec<Attachment>,
}

/// Author as supplied by a plugin instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageAuthorInput {
    /// ID on the originating network
    pub origin_id: String,
    /// Display name
    pub username: String,
    /// Avatar URL
    pub avatar_url: String,
}

impl MessageAuthorInput {
    /// Create an author input
    pub fn new(
        origin_id: impl Into<String>,
        username: impl Into<String>,
        avatar_url: impl Into<String>,
    ) -> Self {
        Self {
            origin_id: origin_id.into(),
            username: username.into(),
            avatar_url: avatar_url.into(),
        }
    }
}

/// Attachment as supplied by a plugin instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachmentInput {
    /// ID on the originating network
    pub origin_id: String,
    /// Media kind
    #[serde(rename = "type")]
    pub kind: AttachmentType,
    /// Where the content can be fetched
    pub source_url: String,
}

/// Outbound message. Server-assigned fields are absent; the target thread is
/// named by its origin ID.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageInput {
    /// Text body
    pub body: String,
    /// ID on the originating network
    pub origin_id: String,
    /// Author
    pub author: MessageAuthorInput,
    /// Attachments
    pub attachments: Vec<AttachmentInput>,
    /// Origin ID of the thread the message was posted in
    pub origin_thread_id: String,
}

impl MessageInput {
    /// Create a message input without attachments
    pub fn new(
        origin_thread_id: impl Into<String>,
        origin_id: impl Into<String>,
        author: MessageAuthorInput,
        body: impl Into<String>,
    ) -> Self {
        Self {
            body: body.into(),
            origin_id: origin_id.into(),
            author,
            attachments: Vec::new(),
            origin_thread_id: origin_thread_id.into(),
        }
    }

    /// Add an attachment
    pub fn with_attachment(
        mut self,
        origin_id: impl Into<String>,
        kind: AttachmentType,
        source_url: impl Into<String>,
    ) -> Self {
        self.attachments.push(AttachmentInput {
            origin_id: origin_id.into(),
            kind,
            source_url: source_url.into(),
        });
        self
    }
}

/// Envelope pushed on the message stream
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagePayload {
    /// Local thread the message is destined for
    pub target_thread_id: String,
    /// The message
    pub message: Message,
}
