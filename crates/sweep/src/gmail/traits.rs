//! Remote mail API abstraction
//!
//! Core operations only talk to the provider through [`MailApi`], which
//! lets tests drive the executor against an in-process fake.

use std::sync::Arc;

use super::api::{GmailMessage, Label};
use super::{ApiError, ItemError};
use crate::models::MessageId;

/// Representation requested when fetching a message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageFormat {
    Metadata,
    Full,
}

impl MessageFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            MessageFormat::Metadata => "metadata",
            MessageFormat::Full => "full",
        }
    }
}

/// One operation inside an aggregated batch call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchRequest {
    /// Fetch a message, limited to `headers` for the metadata format
    Get {
        id: MessageId,
        format: MessageFormat,
        headers: Vec<String>,
    },
    /// Add and remove labels
    Modify {
        id: MessageId,
        add_labels: Vec<String>,
        remove_labels: Vec<String>,
    },
    /// Move to Trash
    Delete { id: MessageId },
}

impl BatchRequest {
    pub fn id(&self) -> &MessageId {
        match self {
            BatchRequest::Get { id, .. }
            | BatchRequest::Modify { id, .. }
            | BatchRequest::Delete { id } => id,
        }
    }
}

/// Successful per-item reply
#[derive(Debug, Clone)]
pub enum BatchReply {
    Message(Box<GmailMessage>),
    Done,
}

/// Outcome of one item in a batch, independent of its neighbours
pub type BatchOutcome = Result<BatchReply, ItemError>;

/// Calls the core needs from the mail provider
///
/// Per-message work always goes through [`MailApi::batch`]; a single
/// message is a batch of one.
pub trait MailApi: Send + Sync {
    /// Message ids matching `query`, newest first, at most `max_results`
    fn list(&self, query: &str, max_results: usize) -> Result<Vec<MessageId>, ApiError>;

    /// Submit `requests` as one aggregated call
    ///
    /// On success the result holds exactly one outcome per request, in order.
    fn batch(&self, requests: &[BatchRequest]) -> Result<Vec<BatchOutcome>, ApiError>;

    /// Every label in the mailbox, without message counts
    fn labels(&self) -> Result<Vec<Label>, ApiError>;

    /// One label with its message counts
    fn label(&self, id: &str) -> Result<Label, ApiError>;

    fn create_label(&self, name: &str) -> Result<Label, ApiError>;

    fn delete_label(&self, id: &str) -> Result<(), ApiError>;
}

/// Source of a ready-to-use authenticated API handle
pub trait ClientProvider: Send + Sync {
    /// Never returns a client backed by a stale or invalid credential
    fn authenticated_client(&self) -> Result<Arc<dyn MailApi>, ApiError>;

    /// Whether a usable credential exists right now
    fn is_authenticated(&self) -> bool {
        self.authenticated_client().is_ok()
    }

    /// Run the interactive sign-in flow (blocking)
    fn sign_in(&self) -> anyhow::Result<()>;

    /// Forget stored credentials
    fn sign_out(&self) -> anyhow::Result<()>;
}
