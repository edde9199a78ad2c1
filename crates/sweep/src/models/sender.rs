//! Per-sender scan summary

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::MessageId;

/// Aggregated view of every scanned message from one sender
///
/// `count` always equals `message_ids.len()`; `subjects` is capped and
/// ordered most-recent-first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SenderSummary {
    /// Lowercased sender address (grouping key)
    pub sender_address: String,
    /// Display name from the most recent message
    pub sender_name: String,
    pub subjects: Vec<String>,
    pub count: usize,
    /// Oldest message date seen
    pub first_date: Option<DateTime<Utc>>,
    /// Newest message date seen
    pub last_date: Option<DateTime<Utc>>,
    /// Unsubscribe URL or mailto address
    pub action_link: Option<String>,
    /// Sender advertised RFC 8058 one-click unsubscribe
    pub one_click: bool,
    /// Sum of provider size estimates in bytes
    pub total_size: u64,
    #[serde(skip)]
    pub message_ids: Vec<MessageId>,
}

impl SenderSummary {
    pub fn new(sender_address: impl Into<String>, sender_name: impl Into<String>) -> Self {
        Self {
            sender_address: sender_address.into(),
            sender_name: sender_name.into(),
            subjects: Vec::new(),
            count: 0,
            first_date: None,
            last_date: None,
            action_link: None,
            one_click: false,
            total_size: 0,
            message_ids: Vec::new(),
        }
    }
}

/// Rank summaries by message count, descending
///
/// The sort is stable so ties keep first-encounter order.
pub fn rank_by_count(mut summaries: Vec<SenderSummary>) -> Vec<SenderSummary> {
    summaries.sort_by(|a, b| b.count.cmp(&a.count));
    summaries
}
