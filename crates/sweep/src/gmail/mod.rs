//! Gmail API integration
//!
//! This module provides:
//! - OAuth2 authentication and token persistence
//! - The [`MailApi`] seam used by the core, and its Gmail implementation
//! - Multipart encoding for the Gmail batch endpoint

mod auth;
mod batch;
mod client;
mod error;
mod traits;

pub use auth::GmailAuth;
pub use client::{GmailClient, GmailSession};
pub use error::{ApiError, ItemError};
pub use traits::{BatchOutcome, BatchReply, BatchRequest, ClientProvider, MailApi, MessageFormat};

/// Label IDs used by Gmail for common states
pub mod labels {
    pub const INBOX: &str = "INBOX";
    pub const UNREAD: &str = "UNREAD";
    pub const IMPORTANT: &str = "IMPORTANT";
}

/// Gmail API response types
pub mod api {
    use serde::{Deserialize, Serialize};

    /// Response from listing messages
    #[derive(Debug, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct ListMessagesResponse {
        pub messages: Option<Vec<MessageRef>>,
        pub next_page_token: Option<String>,
    }

    /// Reference to a message (just ID and thread ID)
    #[derive(Debug, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct MessageRef {
        pub id: String,
        pub thread_id: Option<String>,
    }

    /// Message as returned by `messages.get` in metadata or full format
    #[derive(Debug, Clone, Default, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct GmailMessage {
        pub id: String,
        pub thread_id: Option<String>,
        pub label_ids: Option<Vec<String>>,
        #[serde(default)]
        pub snippet: String,
        pub internal_date: Option<String>,
        pub size_estimate: Option<u64>,
        pub payload: Option<MessagePayload>,
    }

    impl GmailMessage {
        /// First header named `name`, compared case-insensitively
        pub fn header(&self, name: &str) -> Option<&str> {
            self.headers()
                .iter()
                .find(|h| h.name.eq_ignore_ascii_case(name))
                .map(|h| h.value.as_str())
        }

        pub fn headers(&self) -> &[Header] {
            self.payload
                .as_ref()
                .and_then(|p| p.headers.as_deref())
                .unwrap_or(&[])
        }

        /// Internal timestamp in milliseconds since epoch
        pub fn internal_date_millis(&self) -> Option<i64> {
            self.internal_date.as_ref()?.parse().ok()
        }
    }

    /// Message payload; body and parts are only present in full format
    #[derive(Debug, Clone, Default, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct MessagePayload {
        pub headers: Option<Vec<Header>>,
        pub body: Option<MessageBody>,
        pub parts: Option<Vec<MessagePart>>,
        pub mime_type: Option<String>,
    }

    /// Body data (base64url encoded)
    #[derive(Debug, Clone, Default, Deserialize)]
    pub struct MessageBody {
        pub size: Option<u64>,
        pub data: Option<String>,
    }

    /// MIME part of a multipart message
    #[derive(Debug, Clone, Default, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct MessagePart {
        pub mime_type: Option<String>,
        pub body: Option<MessageBody>,
        pub parts: Option<Vec<MessagePart>>,
    }

    /// Email header (name-value pair)
    #[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
    pub struct Header {
        pub name: String,
        pub value: String,
    }

    impl Header {
        pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
            Self {
                name: name.into(),
                value: value.into(),
            }
        }
    }

    /// Mailbox label; counts are only filled in by `labels.get`
    #[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct Label {
        pub id: String,
        pub name: String,
        #[serde(rename = "type")]
        pub label_type: Option<String>,
        pub messages_total: Option<u64>,
        pub messages_unread: Option<u64>,
    }

    impl Label {
        /// Built-in labels (INBOX, UNREAD, CATEGORY_*) cannot be deleted
        pub fn is_system(&self) -> bool {
            self.label_type.as_deref() == Some("system")
        }
    }

    /// Response from listing labels
    #[derive(Debug, Deserialize)]
    pub struct ListLabelsResponse {
        pub labels: Option<Vec<Label>>,
    }
}
