//! Header extraction for scanned messages

use chrono::{DateTime, TimeZone, Utc};

use crate::gmail::api::Header;

pub const FROM: &str = "From";
pub const SUBJECT: &str = "Subject";
pub const DATE: &str = "Date";
pub const LIST_UNSUBSCRIBE: &str = "List-Unsubscribe";
pub const LIST_UNSUBSCRIBE_POST: &str = "List-Unsubscribe-Post";

/// Headers requested when fetching scan metadata
pub const METADATA_HEADERS: [&str; 5] = [FROM, SUBJECT, DATE, LIST_UNSUBSCRIBE, LIST_UNSUBSCRIBE_POST];

/// First header named `name`, compared case-insensitively
pub fn header_value<'a>(headers: &'a [Header], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|h| h.name.eq_ignore_ascii_case(name))
        .map(|h| h.value.as_str())
}

/// Unsubscribe target from `List-Unsubscribe`
///
/// The header holds one or more `<...>` candidates separated by commas.
/// An http(s) candidate wins over `mailto:`; otherwise the first is used.
pub fn extract_action_link(headers: &[Header]) -> Option<String> {
    let value = header_value(headers, LIST_UNSUBSCRIBE)?;
    let candidates = link_candidates(value);

    candidates
        .iter()
        .find(|c| is_http(c))
        .or_else(|| candidates.first())
        .map(|c| c.to_string())
}

fn link_candidates(value: &str) -> Vec<&str> {
    if value.contains('<') {
        value
            .split('<')
            .skip(1)
            .filter_map(|part| part.split_once('>').map(|(inner, _)| inner.trim()))
            .filter(|c| !c.is_empty())
            .collect()
    } else {
        value
            .split(',')
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .collect()
    }
}

pub(crate) fn is_http(link: &str) -> bool {
    let lower = link.to_ascii_lowercase();
    lower.starts_with("https://") || lower.starts_with("http://")
}

/// Whether the sender supports one-click unsubscribe (RFC 8058)
pub fn advertises_one_click(headers: &[Header]) -> bool {
    header_value(headers, LIST_UNSUBSCRIBE_POST)
        .is_some_and(|v| v.to_ascii_lowercase().contains("list-unsubscribe=one-click"))
}

/// Parse an RFC 2822 `Date` header, tolerating a trailing `(zone)` comment
pub fn parse_date(value: &str) -> Option<DateTime<Utc>> {
    let trimmed = match value.find('(') {
        Some(pos) => &value[..pos],
        None => value,
    }
    .trim();

    DateTime::parse_from_rfc2822(trimmed)
        .ok()
        .map(|d| d.with_timezone(&Utc))
}

/// Date from the header, falling back to the provider's internal timestamp
pub fn message_date(headers: &[Header], internal_millis: Option<i64>) -> Option<DateTime<Utc>> {
    header_value(headers, DATE)
        .and_then(parse_date)
        .or_else(|| internal_millis.and_then(|ms| Utc.timestamp_millis_opt(ms).single()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(pairs: &[(&str, &str)]) -> Vec<Header> {
        pairs.iter().map(|(n, v)| Header::new(*n, *v)).collect()
    }

    #[test]
    fn test_action_link_prefers_http() {
        let h = headers(&[(
            "list-unsubscribe",
            "<mailto:unsub@news.com?subject=stop>, <https://news.com/u?id=1>",
        )]);
        assert_eq!(extract_action_link(&h).as_deref(), Some("https://news.com/u?id=1"));
    }

    #[test]
    fn test_action_link_falls_back_to_first() {
        let h = headers(&[("List-Unsubscribe", "<mailto:a@b.com>, <mailto:c@d.com>")]);
        assert_eq!(extract_action_link(&h).as_deref(), Some("mailto:a@b.com"));
    }

    #[test]
    fn test_action_link_keeps_commas_inside_brackets() {
        let h = headers(&[("List-Unsubscribe", "<https://x.com/u?a=1,2>")]);
        assert_eq!(extract_action_link(&h).as_deref(), Some("https://x.com/u?a=1,2"));
    }

    #[test]
    fn test_action_link_without_brackets() {
        let h = headers(&[("List-Unsubscribe", "https://x.com/u")]);
        assert_eq!(extract_action_link(&h).as_deref(), Some("https://x.com/u"));
    }

    #[test]
    fn test_missing_action_link() {
        assert_eq!(extract_action_link(&headers(&[("From", "a@b.com")])), None);
        assert_eq!(extract_action_link(&headers(&[("List-Unsubscribe", " ")])), None);
    }

    #[test]
    fn test_one_click_detection() {
        let h = headers(&[("List-Unsubscribe-Post", "List-Unsubscribe=One-Click")]);
        assert!(advertises_one_click(&h));
        assert!(!advertises_one_click(&headers(&[])));
    }

    #[test]
    fn test_parse_date_with_comment() {
        let date = parse_date("Tue, 1 Jul 2025 10:52:37 +0200 (CEST)").unwrap();
        assert_eq!(date.to_rfc3339(), "2025-07-01T08:52:37+00:00");
        assert!(parse_date("yesterday").is_none());
    }

    #[test]
    fn test_message_date_falls_back_to_internal_date() {
        let date = message_date(&headers(&[("Date", "garbage")]), Some(1_700_000_000_000)).unwrap();
        assert_eq!(date.timestamp(), 1_700_000_000);
        assert!(message_date(&[], None).is_none());
    }
}
