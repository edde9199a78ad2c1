//! Multipart/mixed codec for the Gmail batch endpoint
//!
//! Each sub-request is an `application/http` part tagged with
//! `Content-ID: <item-N>`. Google answers with `<response-item-N>` parts
//! that may arrive in any order.

use super::traits::BatchRequest;
use super::ApiError;

const API_PREFIX: &str = "/gmail/v1/users/me/messages";

/// One decoded sub-response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubResponse {
    pub status: u16,
    pub body: String,
}

/// Content-Type header value for a body built with `boundary`
pub fn content_type(boundary: &str) -> String {
    format!("multipart/mixed; boundary={}", boundary)
}

/// Serialize `requests` into a multipart body
pub fn encode(requests: &[BatchRequest], boundary: &str) -> String {
    let mut body = String::new();

    for (index, request) in requests.iter().enumerate() {
        body.push_str(&format!("--{}\r\n", boundary));
        body.push_str("Content-Type: application/http\r\n");
        body.push_str(&format!("Content-ID: <item-{}>\r\n\r\n", index));

        let id = urlencoding::encode(request.id().as_str());
        match request {
            BatchRequest::Get {
                format, headers, ..
            } => {
                let mut path = format!("{}/{}?format={}", API_PREFIX, id, format.as_str());
                for header in headers {
                    path.push_str(&format!("&metadataHeaders={}", urlencoding::encode(header)));
                }
                body.push_str(&format!("GET {} HTTP/1.1\r\n\r\n", path));
            }
            BatchRequest::Modify {
                add_labels,
                remove_labels,
                ..
            } => {
                let json = serde_json::json!({
                    "addLabelIds": add_labels,
                    "removeLabelIds": remove_labels,
                })
                .to_string();
                body.push_str(&format!("POST {}/{}/modify HTTP/1.1\r\n", API_PREFIX, id));
                body.push_str("Content-Type: application/json; charset=UTF-8\r\n");
                body.push_str(&format!("Content-Length: {}\r\n\r\n", json.len()));
                body.push_str(&json);
                body.push_str("\r\n");
            }
            BatchRequest::Delete { .. } => {
                body.push_str(&format!("POST {}/{}/trash HTTP/1.1\r\n", API_PREFIX, id));
                body.push_str("Content-Length: 0\r\n\r\n");
            }
        }
    }

    body.push_str(&format!("--{}--\r\n", boundary));
    body
}

/// Extract the boundary parameter from a multipart Content-Type
pub fn boundary_from_content_type(content_type: &str) -> Option<String> {
    content_type.split(';').find_map(|part| {
        let (key, value) = part.trim().split_once('=')?;
        if key.trim().eq_ignore_ascii_case("boundary") {
            Some(value.trim().trim_matches('"').to_string())
        } else {
            None
        }
    })
}

/// Decode a batch response into exactly `expected` slots, in request order
///
/// Parts are matched by Content-ID, falling back to their position. A slot
/// Google left unanswered is `None`.
pub fn decode(body: &str, content_type: &str, expected: usize) -> Result<Vec<Option<SubResponse>>, ApiError> {
    let boundary = boundary_from_content_type(content_type)
        .ok_or_else(|| ApiError::Decode("batch response missing boundary".to_string()))?;
    let separator = format!("--{}", boundary);
    let normalized = body.replace("\r\n", "\n");

    let mut slots: Vec<Option<SubResponse>> = vec![None; expected];
    let mut position = 0usize;

    for part in normalized.split(&separator) {
        let part = part.trim_start_matches('\n');
        if part.trim().is_empty() || part.starts_with("--") {
            continue;
        }

        let (outer_headers, http) = part.split_once("\n\n").unwrap_or((part, ""));
        let index = content_id_index(outer_headers).unwrap_or(position);
        position += 1;

        let Some(sub) = parse_http_response(http) else {
            continue;
        };
        if let Some(slot) = slots.get_mut(index) {
            *slot = Some(sub);
        }
    }

    Ok(slots)
}

/// Index from a `Content-ID: <response-item-N>` header
fn content_id_index(headers: &str) -> Option<usize> {
    headers.lines().find_map(|line| {
        let (name, value) = line.split_once(':')?;
        if !name.trim().eq_ignore_ascii_case("content-id") {
            return None;
        }
        let value = value.trim().trim_start_matches('<').trim_end_matches('>');
        value.rsplit('-').next()?.parse().ok()
    })
}

/// Parse `HTTP/1.1 200 OK\n<headers>\n\n<body>`
fn parse_http_response(http: &str) -> Option<SubResponse> {
    let http = http.trim_start();
    let (status_line, rest) = http.split_once('\n').unwrap_or((http, ""));
    let status = status_line
        .strip_prefix("HTTP/")?
        .split_whitespace()
        .nth(1)?
        .parse()
        .ok()?;
    let body = rest.split_once("\n\n").map(|(_, b)| b).unwrap_or("");
    Some(SubResponse {
        status,
        body: body.trim().to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gmail::MessageFormat;
    use crate::models::MessageId;

    fn response_part(boundary: &str, index: usize, status: &str, body: &str) -> String {
        format!(
            "--{b}\r\nContent-Type: application/http\r\nContent-ID: <response-item-{i}>\r\n\r\nHTTP/1.1 {s}\r\nContent-Type: application/json; charset=UTF-8\r\n\r\n{body}\r\n",
            b = boundary,
            i = index,
            s = status,
            body = body
        )
    }

    #[test]
    fn test_encode_get_and_modify() {
        let requests = vec![
            BatchRequest::Get {
                id: MessageId::new("abc"),
                format: MessageFormat::Metadata,
                headers: vec!["From".to_string(), "List-Unsubscribe".to_string()],
            },
            BatchRequest::Modify {
                id: MessageId::new("def"),
                add_labels: vec![],
                remove_labels: vec!["UNREAD".to_string()],
            },
            BatchRequest::Delete {
                id: MessageId::new("ghi"),
            },
        ];
        let body = encode(&requests, "b0");

        assert!(body.contains("Content-ID: <item-0>"));
        assert!(body.contains(
            "GET /gmail/v1/users/me/messages/abc?format=metadata&metadataHeaders=From&metadataHeaders=List-Unsubscribe HTTP/1.1"
        ));
        assert!(body.contains("POST /gmail/v1/users/me/messages/def/modify HTTP/1.1"));
        assert!(body.contains(r#""removeLabelIds":["UNREAD"]"#));
        assert!(body.contains("POST /gmail/v1/users/me/messages/ghi/trash HTTP/1.1"));
        assert!(body.ends_with("--b0--\r\n"));
    }

    #[test]
    fn test_boundary_from_content_type() {
        assert_eq!(
            boundary_from_content_type("multipart/mixed; boundary=batch_abc"),
            Some("batch_abc".to_string())
        );
        assert_eq!(
            boundary_from_content_type("multipart/mixed; Boundary=\"quoted\""),
            Some("quoted".to_string())
        );
        assert_eq!(boundary_from_content_type("application/json"), None);
    }

    #[test]
    fn test_decode_matches_by_content_id() {
        let boundary = "batch_xyz";
        let body = format!(
            "{}{}--{}--\r\n",
            response_part(boundary, 1, "404 Not Found", r#"{"error":{"message":"Not Found"}}"#),
            response_part(boundary, 0, "200 OK", r#"{"id":"m0"}"#),
            boundary
        );

        let subs = decode(&body, &content_type(boundary), 2).unwrap();
        let first = subs[0].as_ref().unwrap();
        assert_eq!(first.status, 200);
        assert_eq!(first.body, r#"{"id":"m0"}"#);
        assert_eq!(subs[1].as_ref().unwrap().status, 404);
    }

    #[test]
    fn test_decode_empty_success_body() {
        let boundary = "b";
        let body = "--b\r\nContent-Type: application/http\r\nContent-ID: <response-item-0>\r\n\r\nHTTP/1.1 204 No Content\r\n\r\n\r\n--b--\r\n";
        let subs = decode(body, &content_type(boundary), 1).unwrap();
        let sub = subs[0].as_ref().unwrap();
        assert_eq!(sub.status, 204);
        assert_eq!(sub.body, "");
    }

    #[test]
    fn test_decode_leaves_unanswered_items_empty() {
        let boundary = "b";
        let body = format!("{}--b--\r\n", response_part(boundary, 0, "200 OK", "{}"));
        let subs = decode(&body, &content_type(boundary), 2).unwrap();
        assert_eq!(subs.len(), 2);
        assert_eq!(subs[0].as_ref().map(|s| s.status), Some(200));
        assert!(subs[1].is_none());
    }

    #[test]
    fn test_decode_without_boundary_fails() {
        assert!(decode("", "application/json", 1).is_err());
    }
}
