//! Fold fetched messages into per-sender summaries

use chrono::{DateTime, Utc};
use std::collections::HashMap;

use super::headers::{self, FROM, SUBJECT};
use crate::gmail::api::GmailMessage;
use crate::models::{EmailAddress, MessageId, SenderSummary};

/// Sender key used when a message has no `From` header
const UNKNOWN_SENDER: &str = "unknown@unknown.com";

struct Entry {
    summary: SenderSummary,
    /// Dated subjects, newest first, capped
    recent: Vec<(Option<DateTime<Utc>>, String)>,
}

/// Groups messages by sender, preserving first-encounter order
pub struct SenderAggregator {
    max_subjects: usize,
    entries: Vec<Entry>,
    index: HashMap<String, usize>,
}

impl SenderAggregator {
    pub fn new(max_subjects: usize) -> Self {
        Self {
            max_subjects,
            entries: Vec::new(),
            index: HashMap::new(),
        }
    }

    /// Add one message to its sender's summary
    pub fn fold(&mut self, message: &GmailMessage) {
        let headers = message.headers();
        let from = headers::header_value(headers, FROM)
            .map(EmailAddress::parse)
            .filter(|a| !a.email.is_empty())
            .unwrap_or_else(|| EmailAddress::new(UNKNOWN_SENDER));
        let key = from.key();
        let date = headers::message_date(headers, message.internal_date_millis());

        let position = match self.index.get(&key) {
            Some(&position) => position,
            None => {
                self.entries.push(Entry {
                    summary: SenderSummary::new(key.clone(), from.display_name()),
                    recent: Vec::new(),
                });
                self.index.insert(key, self.entries.len() - 1);
                self.entries.len() - 1
            }
        };
        let entry = &mut self.entries[position];
        let summary = &mut entry.summary;

        // Newest message so far decides the display name and action link
        let is_newest = match (date, summary.last_date) {
            (Some(date), Some(last)) => date > last,
            (_, None) => true,
            (None, Some(_)) => false,
        };

        summary.count += 1;
        summary.message_ids.push(MessageId::new(message.id.clone()));
        summary.total_size += message.size_estimate.unwrap_or(0);

        if let Some(date) = date {
            if summary.first_date.is_none_or(|first| date < first) {
                summary.first_date = Some(date);
            }
            if summary.last_date.is_none_or(|last| date > last) {
                summary.last_date = Some(date);
            }
        }

        if let Some(link) = headers::extract_action_link(headers)
            && (is_newest || summary.action_link.is_none())
        {
            summary.action_link = Some(link);
            summary.one_click = headers::advertises_one_click(headers);
        }
        if is_newest && let Some(name) = &from.name {
            summary.sender_name = name.clone();
        }

        let subject = headers::header_value(headers, SUBJECT)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or("(no subject)")
            .to_string();
        insert_recent(&mut entry.recent, date, subject, self.max_subjects);
        entry.summary.subjects = entry.recent.iter().map(|(_, s)| s.clone()).collect();
    }

    /// Summaries in first-encounter order
    pub fn into_summaries(self) -> Vec<SenderSummary> {
        self.entries.into_iter().map(|e| e.summary).collect()
    }
}

/// Keep the `cap` newest subjects; undated ones sort after dated ones
fn insert_recent(
    recent: &mut Vec<(Option<DateTime<Utc>>, String)>,
    date: Option<DateTime<Utc>>,
    subject: String,
    cap: usize,
) {
    if cap == 0 {
        return;
    }
    let position = recent
        .iter()
        .position(|(existing, _)| match (date, existing) {
            (Some(new), Some(old)) => new > *old,
            (Some(_), None) => true,
            (None, _) => false,
        })
        .unwrap_or(recent.len());
    recent.insert(position, (date, subject));
    recent.truncate(cap);
}

/// Group `messages` by sender in one pass
pub fn aggregate<'a>(
    messages: impl IntoIterator<Item = &'a GmailMessage>,
    max_subjects: usize,
) -> Vec<SenderSummary> {
    let mut aggregator = SenderAggregator::new(max_subjects);
    for message in messages {
        aggregator.fold(message);
    }
    aggregator.into_summaries()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gmail::api::{Header, MessagePayload};

    fn message(id: &str, from: &str, subject: &str, date: &str) -> GmailMessage {
        let mut headers = vec![Header::new("From", from), Header::new("Subject", subject)];
        if !date.is_empty() {
            headers.push(Header::new("Date", date));
        }
        GmailMessage {
            id: id.to_string(),
            size_estimate: Some(1000),
            payload: Some(MessagePayload {
                headers: Some(headers),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn with_header(mut m: GmailMessage, name: &str, value: &str) -> GmailMessage {
        if let Some(payload) = m.payload.as_mut() {
            payload.headers.get_or_insert_with(Vec::new).push(Header::new(name, value));
        }
        m
    }

    #[test]
    fn test_groups_by_lowercased_sender_in_first_seen_order() {
        let messages = vec![
            message("1", "News <news@shop.com>", "Sale", "Mon, 3 Mar 2025 10:00:00 +0000"),
            message("2", "alice@example.com", "Hi", "Mon, 3 Mar 2025 11:00:00 +0000"),
            message("3", "NEWS@Shop.com", "More sale", "Tue, 4 Mar 2025 10:00:00 +0000"),
        ];

        let summaries = aggregate(&messages, 3);
        assert_eq!(summaries.len(), 2);
        assert_eq!(summaries[0].sender_address, "news@shop.com");
        assert_eq!(summaries[0].count, 2);
        assert_eq!(summaries[0].total_size, 2000);
        assert_eq!(summaries[0].message_ids, vec![MessageId::new("1"), MessageId::new("3")]);
        assert_eq!(summaries[1].sender_address, "alice@example.com");
    }

    #[test]
    fn test_subjects_capped_most_recent_first() {
        let messages = vec![
            message("1", "a@x.com", "two", "Sun, 2 Mar 2025 10:00:00 +0000"),
            message("2", "a@x.com", "four", "Tue, 4 Mar 2025 10:00:00 +0000"),
            message("3", "a@x.com", "one", "Sat, 1 Mar 2025 10:00:00 +0000"),
            message("4", "a@x.com", "three", "Mon, 3 Mar 2025 10:00:00 +0000"),
        ];

        let summaries = aggregate(&messages, 3);
        let s = &summaries[0];
        assert_eq!(s.count, 4);
        assert_eq!(s.subjects, vec!["four", "three", "two"]);
        assert_eq!(s.first_date.unwrap().to_rfc3339(), "2025-03-01T10:00:00+00:00");
        assert_eq!(s.last_date.unwrap().to_rfc3339(), "2025-03-04T10:00:00+00:00");
    }

    #[test]
    fn test_action_link_and_one_click_from_newest_message() {
        let old = with_header(
            message("1", "n@x.com", "old", "Sat, 1 Mar 2025 10:00:00 +0000"),
            "List-Unsubscribe",
            "<https://x.com/old>",
        );
        let new = with_header(
            with_header(
                message("2", "n@x.com", "new", "Mon, 3 Mar 2025 10:00:00 +0000"),
                "List-Unsubscribe",
                "<mailto:u@x.com>, <https://x.com/new>",
            ),
            "List-Unsubscribe-Post",
            "List-Unsubscribe=One-Click",
        );
        let plain = message("3", "n@x.com", "plain", "Tue, 4 Mar 2025 10:00:00 +0000");

        let summaries = aggregate(&[old, new, plain], 3);
        assert_eq!(summaries[0].action_link.as_deref(), Some("https://x.com/new"));
        assert!(summaries[0].one_click);
    }

    #[test]
    fn test_missing_from_and_subject() {
        let mut m = message("1", "", "", "");
        m.payload = Some(MessagePayload::default());

        let summaries = aggregate(&[m], 3);
        assert_eq!(summaries[0].sender_address, UNKNOWN_SENDER);
        assert_eq!(summaries[0].subjects, vec!["(no subject)"]);
        assert_eq!(summaries[0].first_date, None);
    }

    #[test]
    fn test_counts_sum_to_message_total() {
        let senders = ["a@x.com", "b@x.com", "c@x.com", "d@x.com"];
        let messages: Vec<GmailMessage> = (0..37)
            .map(|i| message(&i.to_string(), senders[i % senders.len()], "s", ""))
            .collect();

        let mut aggregator = SenderAggregator::new(3);
        for m in &messages {
            aggregator.fold(m);
        }
        let summaries = aggregator.into_summaries();
        assert_eq!(summaries.len(), 4);
        assert_eq!(
            summaries.iter().find(|s| s.sender_address == "b@x.com").map(|s| s.count),
            Some(9)
        );
        assert_eq!(summaries.iter().map(|s| s.count).sum::<usize>(), 37);
        assert!(summaries.iter().all(|s| s.count == s.message_ids.len()));
    }
}
