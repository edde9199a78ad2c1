//! JSON API routing
//!
//! Routing is a pure function of method, path and body so it can be tested
//! without a socket.

use chrono::Local;
use serde::Deserialize;
use serde_json::{Value, json};
use tiny_http::Method;

use sweep::{ActionHandler, Filter, OperationKind, StartError};

/// CSV payload sent as a download instead of the JSON body
#[derive(Debug, Clone, PartialEq)]
pub struct Attachment {
    pub filename: String,
    pub content: String,
}

/// Status code plus JSON body, or a file for downloads
#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse {
    pub status: u16,
    pub body: Value,
    pub attachment: Option<Attachment>,
}

impl ApiResponse {
    fn ok(body: Value) -> Self {
        Self {
            status: 200,
            body,
            attachment: None,
        }
    }

    pub(crate) fn error(status: u16, message: impl Into<String>) -> Self {
        Self {
            status,
            body: json!({ "error": message.into() }),
            attachment: None,
        }
    }

    fn csv(content: String) -> Self {
        let filename = format!("emails-backup-{}.csv", Local::now().format("%Y-%m-%d-%H%M%S"));
        Self {
            status: 200,
            body: Value::Null,
            attachment: Some(Attachment { filename, content }),
        }
    }

    fn started() -> Self {
        Self::ok(json!({ "status": "started" }))
    }

    fn serialized<T: serde::Serialize>(value: &T) -> Self {
        match serde_json::to_value(value) {
            Ok(body) => Self::ok(body),
            Err(e) => Self::error(500, format!("Failed to serialize response: {}", e)),
        }
    }
}

impl From<StartError> for ApiResponse {
    fn from(e: StartError) -> Self {
        let status = match e {
            StartError::InvalidInput(_) => 400,
            StartError::NotAuthenticated(_) => 401,
            StartError::AlreadyRunning(_) | StartError::SignInInProgress | StartError::Conflict(_) => 409,
            StartError::NotFound(_) => 404,
            StartError::Upstream(_) => 502,
            StartError::Internal(_) => 500,
        };
        Self::error(status, e.to_string())
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ScanRequest {
    limit: Option<usize>,
    filters: Filter,
}

#[derive(Debug, Deserialize)]
struct SendersRequest {
    senders: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct LabelActionRequest {
    #[serde(default)]
    label_id: String,
    senders: Vec<String>,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize)]
struct ImportantRequest {
    senders: Vec<String>,
    #[serde(default = "default_true")]
    important: bool,
}

#[derive(Debug, Deserialize)]
struct SenderRequest {
    #[serde(default)]
    sender: String,
}

#[derive(Debug, Deserialize)]
struct CreateLabelRequest {
    #[serde(default)]
    name: String,
}

fn parse_body<T: serde::de::DeserializeOwned>(body: &[u8]) -> Result<T, ApiResponse> {
    serde_json::from_slice(body).map_err(|e| ApiResponse::error(400, format!("Invalid JSON body: {}", e)))
}

/// Value of `name` in a raw query string
fn query_value<'a>(query: &'a str, name: &str) -> Option<&'a str> {
    query
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value)
}

/// Start a background job and answer `started`
fn start(result: Result<(), StartError>) -> ApiResponse {
    match result {
        Ok(()) => ApiResponse::started(),
        Err(e) => e.into(),
    }
}

fn respond<T: serde::Serialize>(result: Result<T, StartError>) -> ApiResponse {
    match result {
        Ok(value) => ApiResponse::serialized(&value),
        Err(e) => e.into(),
    }
}

/// Parse the body as `T` and hand it to `f`
fn with_body<T, F>(body: &[u8], f: F) -> ApiResponse
where
    T: serde::de::DeserializeOwned,
    F: FnOnce(T) -> ApiResponse,
{
    match parse_body(body) {
        Ok(request) => f(request),
        Err(response) => response,
    }
}

/// Status paths with a fixed kind
fn status_kind(path: &str) -> Option<OperationKind> {
    match path {
        "/api/scan/status" => Some(OperationKind::Scan),
        "/api/label-operation-status" => Some(OperationKind::Label),
        "/api/important-status" => Some(OperationKind::Important),
        "/api/download-status" => Some(OperationKind::Download),
        _ => None,
    }
}

fn action_kind(path: &str) -> Option<OperationKind> {
    match path {
        "/api/mark-read" => Some(OperationKind::MarkRead),
        "/api/archive" => Some(OperationKind::Archive),
        "/api/delete" => Some(OperationKind::Delete),
        "/api/unsubscribe" => Some(OperationKind::Unsubscribe),
        _ => None,
    }
}

/// Dispatch one request
pub fn route(handler: &ActionHandler, method: &Method, url: &str, body: &[u8]) -> ApiResponse {
    let (path, query) = url.split_once('?').unwrap_or((url, ""));
    let path = path.trim_end_matches('/');

    match (method, path) {
        (Method::Post, "/api/scan") => {
            let request: ScanRequest = if body.iter().all(u8::is_ascii_whitespace) {
                ScanRequest::default()
            } else {
                match parse_body(body) {
                    Ok(request) => request,
                    Err(response) => return response,
                }
            };
            start(handler.start_scan(request.limit, request.filters))
        }
        (Method::Get, path) if status_kind(path).is_some() => match status_kind(path) {
            Some(kind) => ApiResponse::serialized(&handler.status(kind)),
            None => ApiResponse::error(404, "Not found"),
        },
        (Method::Get, "/api/scan/results") => ApiResponse::serialized(&handler.scan_results()),
        (Method::Post, path) if action_kind(path).is_some() => {
            let Some(kind) = action_kind(path) else {
                return ApiResponse::error(404, "Not found");
            };
            with_body(body, |request: SendersRequest| {
                start(handler.start_action(kind, request.senders))
            })
        }
        (Method::Post, "/api/apply-label" | "/api/remove-label") => {
            let apply = path == "/api/apply-label";
            with_body(body, |request: LabelActionRequest| {
                start(handler.start_label_action(&request.label_id, request.senders, apply))
            })
        }
        (Method::Post, "/api/mark-important") => with_body(body, |request: ImportantRequest| {
            start(handler.start_important(request.senders, request.important))
        }),
        (Method::Post, "/api/download-emails") => with_body(body, |request: SendersRequest| {
            start(handler.start_download(request.senders))
        }),
        (Method::Get, "/api/download-csv") => match handler.download_csv() {
            Some(csv) => ApiResponse::csv(csv),
            None => ApiResponse::error(404, "No CSV data available"),
        },
        (Method::Post, "/api/delete-emails") => with_body(body, |request: SenderRequest| {
            respond(handler.delete_sender_emails(&request.sender))
        }),
        (Method::Get, "/api/unread-count") => {
            respond(handler.unread_count().map(|count| json!({ "count": count })))
        }
        (Method::Get, "/api/labels") => respond(handler.labels()),
        (Method::Post, "/api/labels") => with_body(body, |request: CreateLabelRequest| {
            respond(handler.create_label(&request.name))
        }),
        (Method::Delete, path) if path.starts_with("/api/labels/") => {
            let id = &path["/api/labels/".len()..];
            respond(handler.delete_label(id).map(|()| json!({ "status": "deleted" })))
        }
        (Method::Get, "/api/action-status") => match query_value(query, "kind") {
            Some(kind) => match kind.parse::<OperationKind>() {
                Ok(kind) => ApiResponse::serialized(&handler.status(kind)),
                Err(e) => ApiResponse::error(400, e.to_string()),
            },
            None => ApiResponse::serialized(&handler.action_status()),
        },
        (Method::Get, path) if path.starts_with("/api/status/") => {
            match path["/api/status/".len()..].parse::<OperationKind>() {
                Ok(kind) => ApiResponse::serialized(&handler.status(kind)),
                Err(e) => ApiResponse::error(404, e.to_string()),
            }
        }
        (Method::Get, "/api/auth-status") => {
            ApiResponse::ok(json!({
                "authenticated": handler.is_authenticated(),
                "signing_in": handler.is_signing_in(),
            }))
        }
        (Method::Post, "/api/sign-in") => match handler.sign_in() {
            Ok(()) => ApiResponse::ok(json!({ "status": "signing_in" })),
            Err(e) => e.into(),
        },
        (Method::Post, "/api/sign-out") => match handler.sign_out() {
            Ok(()) => ApiResponse::ok(json!({ "status": "signed_out" })),
            Err(e) => ApiResponse::error(500, format!("{:#}", e)),
        },
        (_, path) if is_known_path(path) => ApiResponse::error(405, "Method not allowed"),
        _ => ApiResponse::error(404, "Not found"),
    }
}

fn is_known_path(path: &str) -> bool {
    matches!(
        path,
        "/api/scan"
            | "/api/scan/results"
            | "/api/action-status"
            | "/api/auth-status"
            | "/api/sign-in"
            | "/api/sign-out"
            | "/api/apply-label"
            | "/api/remove-label"
            | "/api/mark-important"
            | "/api/download-emails"
            | "/api/download-csv"
            | "/api/delete-emails"
            | "/api/unread-count"
            | "/api/labels"
    ) || action_kind(path).is_some()
        || status_kind(path).is_some()
        || path.starts_with("/api/status/")
        || path.starts_with("/api/labels/")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};
    use sweep::actions::{LinkKind, UnsubscribeResult};
    use sweep::{ApiError, ClientProvider, MailApi, SweepConfig, UnsubscribeClient};

    struct SignedOut {
        signed_out: AtomicBool,
    }

    impl ClientProvider for SignedOut {
        fn authenticated_client(&self) -> Result<Arc<dyn MailApi>, ApiError> {
            Err(ApiError::NotAuthenticated("no stored credentials".to_string()))
        }

        fn sign_in(&self) -> anyhow::Result<()> {
            anyhow::bail!("no browser in tests")
        }

        fn sign_out(&self) -> anyhow::Result<()> {
            self.signed_out.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    struct NoLinks;

    impl UnsubscribeClient for NoLinks {
        fn unsubscribe(&self, _link: Option<&str>, _one_click: bool) -> UnsubscribeResult {
            UnsubscribeResult {
                success: false,
                kind: LinkKind::Missing,
                message: "No unsubscribe link provided".to_string(),
            }
        }
    }

    fn handler() -> ActionHandler {
        let provider = Arc::new(SignedOut {
            signed_out: AtomicBool::new(false),
        });
        ActionHandler::new(SweepConfig::default(), provider, Arc::new(NoLinks)).unwrap()
    }

    #[test]
    fn test_unknown_route_and_wrong_method() {
        let h = handler();
        assert_eq!(route(&h, &Method::Get, "/nope", b"").status, 404);
        assert_eq!(route(&h, &Method::Get, "/api/scan", b"").status, 405);
        assert_eq!(route(&h, &Method::Delete, "/api/scan/results", b"").status, 405);
    }

    #[test]
    fn test_status_endpoints_return_idle_snapshots() {
        let h = handler();

        let response = route(&h, &Method::Get, "/api/scan/status", b"");
        assert_eq!(response.status, 200);
        assert_eq!(response.body["kind"], "scan");
        assert_eq!(response.body["done"], false);
        assert_eq!(response.body["message"], "Ready");

        let response = route(&h, &Method::Get, "/api/status/mark-read", b"");
        assert_eq!(response.body["kind"], "mark-read");

        let response = route(&h, &Method::Get, "/api/action-status?kind=delete", b"");
        assert_eq!(response.body["kind"], "delete");

        assert_eq!(route(&h, &Method::Get, "/api/status/bogus", b"").status, 404);
        assert_eq!(route(&h, &Method::Get, "/api/action-status?kind=bogus", b"").status, 400);
        assert_eq!(route(&h, &Method::Get, "/api/scan/results", b"").body, json!([]));
    }

    #[test]
    fn test_scan_requires_auth_and_valid_body() {
        let h = handler();

        assert_eq!(route(&h, &Method::Post, "/api/scan", b"{not json").status, 400);
        assert_eq!(
            route(&h, &Method::Post, "/api/scan", br#"{"limit": 0}"#).status,
            400
        );

        let response = route(
            &h,
            &Method::Post,
            "/api/scan",
            br#"{"limit": 50, "filters": {"label": "promotions"}}"#,
        );
        assert_eq!(response.status, 401);
        assert!(response.body["error"].as_str().unwrap().contains("Not authenticated"));
    }

    #[test]
    fn test_action_input_validation() {
        let h = handler();

        assert_eq!(route(&h, &Method::Post, "/api/delete", b"{}").status, 400);
        assert_eq!(
            route(&h, &Method::Post, "/api/archive", br#"{"senders": []}"#).status,
            400
        );
        assert_eq!(
            route(&h, &Method::Post, "/api/mark-read", br#"{"senders": ["a@x.com"]}"#).status,
            401
        );
    }

    #[test]
    fn test_unsubscribe_runs_without_mailbox_access() {
        let h = handler();
        let response = route(
            &h,
            &Method::Post,
            "/api/unsubscribe",
            br#"{"senders": ["news@shop.com"]}"#,
        );
        assert_eq!(response.status, 200);
        assert_eq!(response.body["status"], "started");
    }

    #[test]
    fn test_auth_endpoints() {
        let h = handler();
        let response = route(&h, &Method::Get, "/api/auth-status", b"");
        assert_eq!(response.body, json!({ "authenticated": false, "signing_in": false }));

        let response = route(&h, &Method::Post, "/api/sign-out", b"");
        assert_eq!(response.body["status"], "signed_out");
    }

    #[test]
    fn test_scan_rejects_unprintable_sender() {
        let h = handler();
        let response = route(
            &h,
            &Method::Post,
            "/api/scan",
            br#"{"filters": {"sender": "\u0007\u001b"}}"#,
        );
        assert_eq!(response.status, 400);
        assert!(response.body["error"].as_str().unwrap().contains("sender"));
    }

    #[test]
    fn test_start_error_status_codes() {
        let status = |e: StartError| ApiResponse::from(e).status;
        assert_eq!(status(StartError::SignInInProgress), 409);
        assert_eq!(status(StartError::Conflict("exists".to_string())), 409);
        assert_eq!(status(StartError::NotFound("Label not found".to_string())), 404);
        assert_eq!(status(StartError::Upstream("boom".to_string())), 502);
        assert_eq!(status(StartError::Internal("boom".to_string())), 500);
    }

    #[test]
    fn test_label_and_mailbox_routes() {
        let h = handler();

        assert_eq!(route(&h, &Method::Get, "/api/labels", b"").status, 401);
        assert_eq!(route(&h, &Method::Get, "/api/unread-count", b"").status, 401);
        assert_eq!(route(&h, &Method::Delete, "/api/labels/Label_1", b"").status, 401);
        assert_eq!(route(&h, &Method::Post, "/api/labels", br#"{"name": " "}"#).status, 400);
        assert_eq!(route(&h, &Method::Put, "/api/labels", b"").status, 405);

        let response = route(
            &h,
            &Method::Post,
            "/api/apply-label",
            br#"{"senders": ["a@x.com"]}"#,
        );
        assert_eq!(response.status, 400);
        assert_eq!(response.body["error"], "Label ID is required");
        assert_eq!(
            route(
                &h,
                &Method::Post,
                "/api/remove-label",
                br#"{"label_id": "Label_1", "senders": ["a@x.com"]}"#
            )
            .status,
            401
        );
        assert_eq!(
            route(&h, &Method::Post, "/api/mark-important", br#"{"senders": ["a@x.com"]}"#).status,
            401
        );
        assert_eq!(route(&h, &Method::Post, "/api/delete-emails", b"{}").status, 400);

        let response = route(&h, &Method::Get, "/api/label-operation-status", b"");
        assert_eq!(response.body["kind"], "label");
        let response = route(&h, &Method::Get, "/api/important-status", b"");
        assert_eq!(response.body["kind"], "important");
    }

    #[test]
    fn test_download_routes() {
        let h = handler();

        assert_eq!(
            route(&h, &Method::Post, "/api/download-emails", br#"{"senders": ["a@x.com"]}"#).status,
            401
        );
        let response = route(&h, &Method::Get, "/api/download-csv", b"");
        assert_eq!(response.status, 404);
        assert_eq!(response.body["error"], "No CSV data available");

        h.jobs().set_download_csv(Some("message_id\nm1\n".to_string()));
        let response = route(&h, &Method::Get, "/api/download-csv", b"");
        assert_eq!(response.status, 200);
        let attachment = response.attachment.unwrap();
        assert_eq!(attachment.content, "message_id\nm1\n");
        assert!(attachment.filename.starts_with("emails-backup-"));
        assert!(attachment.filename.ends_with(".csv"));

        let response = route(&h, &Method::Get, "/api/download-status", b"");
        assert_eq!(response.body["kind"], "download");
    }

    #[test]
    fn test_query_value() {
        assert_eq!(query_value("kind=archive&x=1", "kind"), Some("archive"));
        assert_eq!(query_value("x=1", "kind"), None);
        assert_eq!(query_value("", "kind"), None);
    }
}
