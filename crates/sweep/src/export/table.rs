//! CSV rendering of fetched messages

use anyhow::{Context, Result};
use csv::Writer;

use super::plain_text_body;
use crate::gmail::api::GmailMessage;
use crate::scan::{DATE, FROM, SUBJECT};

/// Header row of every export
pub const CSV_COLUMNS: [&str; 9] = [
    "message_id",
    "thread_id",
    "from",
    "to",
    "subject",
    "date",
    "labels",
    "snippet",
    "body",
];

/// Render one row per message, in the given order
pub fn messages_to_csv(messages: &[GmailMessage]) -> Result<String> {
    let mut writer = Writer::from_writer(Vec::new());
    writer.write_record(CSV_COLUMNS)?;

    for message in messages {
        let body = message
            .payload
            .as_ref()
            .and_then(plain_text_body)
            .unwrap_or_default();
        let labels = message.label_ids.as_deref().unwrap_or_default().join(";");

        writer.write_record([
            message.id.as_str(),
            message.thread_id.as_deref().unwrap_or_default(),
            message.header(FROM).unwrap_or_default(),
            message.header("To").unwrap_or_default(),
            message.header(SUBJECT).unwrap_or_default(),
            message.header(DATE).unwrap_or_default(),
            labels.as_str(),
            decode_html_entities(&message.snippet).as_str(),
            body.trim(),
        ])?;
    }

    let bytes = writer.into_inner().context("Failed to flush CSV")?;
    String::from_utf8(bytes).context("CSV output is not UTF-8")
}

/// Snippets arrive HTML-escaped
fn decode_html_entities(s: &str) -> String {
    s.replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&nbsp;", " ")
}
