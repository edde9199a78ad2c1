//! Body extraction from full-format messages

use base64::prelude::*;

use crate::gmail::api::{MessageBody, MessagePart, MessagePayload};

/// Plain-text body of a message payload
///
/// Prefers a `text/plain` part anywhere in the tree, then an HTML part with
/// tags stripped, then whatever single body the payload carries.
pub fn plain_text_body(payload: &MessagePayload) -> Option<String> {
    if let Some(data) = body_data(payload.body.as_ref())
        && is_mime(payload.mime_type.as_deref(), "text/plain")
    {
        return decode_base64_body(data);
    }

    if let Some(parts) = &payload.parts {
        if let Some(text) = find_part(parts, "text/plain") {
            return Some(text);
        }
        if let Some(html) = find_part(parts, "text/html") {
            return Some(strip_tags(&html));
        }
    }

    let decoded = decode_base64_body(body_data(payload.body.as_ref())?)?;
    if is_mime(payload.mime_type.as_deref(), "text/html") {
        Some(strip_tags(&decoded))
    } else {
        Some(decoded)
    }
}

fn body_data(body: Option<&MessageBody>) -> Option<&str> {
    body?.data.as_deref().filter(|d| !d.is_empty())
}

fn is_mime(mime_type: Option<&str>, wanted: &str) -> bool {
    mime_type.is_some_and(|m| m.starts_with(wanted))
}

/// Depth-first search for the first part of `mime_type` with a decodable body
fn find_part(parts: &[MessagePart], mime_type: &str) -> Option<String> {
    for part in parts {
        if is_mime(part.mime_type.as_deref(), mime_type)
            && let Some(data) = body_data(part.body.as_ref())
            && let Some(text) = decode_base64_body(data)
        {
            return Some(text);
        }

        if let Some(nested) = &part.parts
            && let Some(text) = find_part(nested, mime_type)
        {
            return Some(text);
        }
    }

    None
}

/// Decode base64-encoded body data
///
/// Gmail uses URL-safe base64 but padding varies, so several engines are tried.
pub fn decode_base64_body(data: &str) -> Option<String> {
    use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD, URL_SAFE};

    let decoders: &[&base64::engine::GeneralPurpose] =
        &[&BASE64_URL_SAFE_NO_PAD, &URL_SAFE, &STANDARD, &STANDARD_NO_PAD];

    decoders
        .iter()
        .find_map(|decoder| decoder.decode(data).ok())
        .and_then(|bytes| String::from_utf8(bytes).ok())
}

/// Drop markup and collapse whitespace
fn strip_tags(html: &str) -> String {
    let mut text = String::with_capacity(html.len());
    let mut in_tag = false;
    for c in html.chars() {
        match c {
            '<' => in_tag = true,
            '>' if in_tag => {
                in_tag = false;
                text.push(' ');
            }
            _ if !in_tag => text.push(c),
            _ => {}
        }
    }
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encoded(text: &str) -> Option<MessageBody> {
        Some(MessageBody {
            size: Some(text.len() as u64),
            data: Some(BASE64_URL_SAFE_NO_PAD.encode(text)),
        })
    }

    fn part(mime_type: &str, text: &str) -> MessagePart {
        MessagePart {
            mime_type: Some(mime_type.to_string()),
            body: encoded(text),
            parts: None,
        }
    }

    #[test]
    fn test_simple_plain_body() {
        let payload = MessagePayload {
            mime_type: Some("text/plain; charset=UTF-8".to_string()),
            body: encoded("Hello there"),
            ..MessagePayload::default()
        };
        assert_eq!(plain_text_body(&payload).as_deref(), Some("Hello there"));
    }

    #[test]
    fn test_nested_plain_part_wins_over_html() {
        let payload = MessagePayload {
            mime_type: Some("multipart/mixed".to_string()),
            parts: Some(vec![MessagePart {
                mime_type: Some("multipart/alternative".to_string()),
                body: None,
                parts: Some(vec![part("text/html", "<p>Rich</p>"), part("text/plain", "Plain")]),
            }]),
            ..MessagePayload::default()
        };
        assert_eq!(plain_text_body(&payload).as_deref(), Some("Plain"));
    }

    #[test]
    fn test_html_only_is_stripped() {
        let payload = MessagePayload {
            mime_type: Some("multipart/alternative".to_string()),
            parts: Some(vec![part("text/html", "<div><b>Sale</b>\n  today</div>")]),
            ..MessagePayload::default()
        };
        assert_eq!(plain_text_body(&payload).as_deref(), Some("Sale today"));
    }

    #[test]
    fn test_empty_body_has_no_text() {
        let payload = MessagePayload {
            body: Some(MessageBody {
                size: Some(0),
                data: Some(String::new()),
            }),
            ..MessagePayload::default()
        };
        assert_eq!(plain_text_body(&payload), None);
    }

    #[test]
    fn test_decode_accepts_padded_and_unpadded() {
        assert_eq!(decode_base64_body("aGk").as_deref(), Some("hi"));
        assert_eq!(decode_base64_body("aGk=").as_deref(), Some("hi"));
        assert_eq!(decode_base64_body("!!!"), None);
    }
}
