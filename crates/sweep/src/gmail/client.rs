//! Gmail API HTTP client
//!
//! Uses synchronous HTTP (ureq) to be executor-agnostic. Every call goes
//! through one agent carrying the configured timeout; non-2xx statuses are
//! classified into [`ApiError`] rather than surfaced as ureq errors.

use log::{debug, warn};
use std::sync::Arc;
use std::time::Duration;
use ureq::Agent;
use ureq::http::Response;

use super::api::{GmailMessage, Label, ListLabelsResponse, ListMessagesResponse};
use super::batch::{self, SubResponse};
use super::traits::{BatchOutcome, BatchReply, BatchRequest, ClientProvider, MailApi};
use super::{ApiError, GmailAuth, ItemError};
use crate::batch::random_u64;
use crate::models::MessageId;

/// Gmail API client bound to one authenticated account
pub struct GmailClient {
    auth: Arc<GmailAuth>,
    agent: Agent,
}

impl GmailClient {
    const BASE_URL: &'static str = "https://gmail.googleapis.com/gmail/v1";
    const BATCH_URL: &'static str = "https://gmail.googleapis.com/batch/gmail/v1";

    /// Largest page `messages.list` accepts
    const MAX_PAGE_SIZE: usize = 500;

    pub fn new(auth: Arc<GmailAuth>, timeout: Duration) -> Self {
        let config = Agent::config_builder()
            .timeout_global(Some(timeout))
            .http_status_as_error(false)
            .build();
        Self {
            auth,
            agent: Agent::new_with_config(config),
        }
    }

    fn bearer(&self) -> Result<String, ApiError> {
        let token = self
            .auth
            .access_token()
            .map_err(|e| ApiError::NotAuthenticated(format!("{:#}", e)))?;
        Ok(format!("Bearer {}", token))
    }

    /// Fetch one page of message ids
    fn list_page(
        &self,
        query: &str,
        page_size: usize,
        page_token: Option<&str>,
    ) -> Result<ListMessagesResponse, ApiError> {
        let mut url = format!(
            "{}/users/me/messages?maxResults={}",
            Self::BASE_URL,
            page_size.clamp(1, Self::MAX_PAGE_SIZE)
        );
        if !query.is_empty() {
            url.push_str(&format!("&q={}", urlencoding::encode(query)));
        }
        if let Some(token) = page_token {
            url.push_str(&format!("&pageToken={}", urlencoding::encode(token)));
        }

        self.get_json(&url, "list messages")
    }

    /// GET `url` and decode the JSON body
    fn get_json<T: serde::de::DeserializeOwned>(&self, url: &str, what: &str) -> Result<T, ApiError> {
        let mut response = self
            .agent
            .get(url)
            .header("Authorization", &self.bearer()?)
            .call()?;
        check_status(&mut response)?;

        response
            .body_mut()
            .read_json()
            .map_err(|e| ApiError::Decode(format!("{} response: {}", what, e)))
    }

    fn label_url(id: &str) -> String {
        format!("{}/users/me/labels/{}", Self::BASE_URL, urlencoding::encode(id))
    }
}

impl MailApi for GmailClient {
    fn list(&self, query: &str, max_results: usize) -> Result<Vec<MessageId>, ApiError> {
        let mut ids = Vec::new();
        let mut page_token: Option<String> = None;

        while ids.len() < max_results {
            let remaining = max_results - ids.len();
            let page = self.list_page(query, remaining, page_token.as_deref())?;

            if let Some(messages) = page.messages {
                ids.extend(messages.into_iter().map(|m| MessageId::new(m.id)));
            }

            match page.next_page_token {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        ids.truncate(max_results);
        debug!("Listed {} messages for query {:?}", ids.len(), query);
        Ok(ids)
    }

    fn batch(&self, requests: &[BatchRequest]) -> Result<Vec<BatchOutcome>, ApiError> {
        if requests.is_empty() {
            return Ok(Vec::new());
        }

        let boundary = format!("batch_sweep_{:016x}", random_u64());
        let body = batch::encode(requests, &boundary);

        let mut response = self
            .agent
            .post(Self::BATCH_URL)
            .header("Authorization", &self.bearer()?)
            .header("Content-Type", &batch::content_type(&boundary))
            .send(body.as_str())?;
        check_status(&mut response)?;

        let content_type = response
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        let text = response
            .body_mut()
            .read_to_string()
            .map_err(|e| ApiError::Transport(format!("reading batch response: {}", e)))?;

        let subs = batch::decode(&text, &content_type, requests.len())?;
        Ok(outcomes(requests, subs))
    }

    fn labels(&self) -> Result<Vec<Label>, ApiError> {
        let url = format!("{}/users/me/labels", Self::BASE_URL);
        let response: ListLabelsResponse = self.get_json(&url, "list labels")?;
        Ok(response.labels.unwrap_or_default())
    }

    fn label(&self, id: &str) -> Result<Label, ApiError> {
        self.get_json(&Self::label_url(id), "get label")
    }

    fn create_label(&self, name: &str) -> Result<Label, ApiError> {
        let url = format!("{}/users/me/labels", Self::BASE_URL);
        let body = serde_json::json!({
            "name": name,
            "labelListVisibility": "labelShow",
            "messageListVisibility": "show",
        })
        .to_string();

        let mut response = self
            .agent
            .post(&url)
            .header("Authorization", &self.bearer()?)
            .header("Content-Type", "application/json")
            .send(body.as_str())?;
        check_status(&mut response)?;

        response
            .body_mut()
            .read_json()
            .map_err(|e| ApiError::Decode(format!("create label response: {}", e)))
    }

    fn delete_label(&self, id: &str) -> Result<(), ApiError> {
        let mut response = self
            .agent
            .delete(&Self::label_url(id))
            .header("Authorization", &self.bearer()?)
            .call()?;
        check_status(&mut response)?;
        debug!("Deleted label {}", id);
        Ok(())
    }
}

/// Turn a non-2xx response into the matching [`ApiError`]
fn check_status(response: &mut Response<ureq::Body>) -> Result<(), ApiError> {
    let status = response.status().as_u16();
    if (200..300).contains(&status) {
        return Ok(());
    }

    let retry_after = response
        .headers()
        .get("retry-after")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs);
    let body = response.body_mut().read_to_string().unwrap_or_default();

    let error = ApiError::from_status(status, &body, retry_after);
    warn!("Gmail API returned {}: {}", status, error);
    Err(error)
}

/// Status recorded for an item the batch response never answered
const MISSING_ITEM_STATUS: u16 = 502;

/// Pair each request with its sub-response
fn outcomes(requests: &[BatchRequest], subs: Vec<Option<SubResponse>>) -> Vec<BatchOutcome> {
    requests
        .iter()
        .zip(subs)
        .map(|(request, sub)| {
            let Some(sub) = sub else {
                return Err(ItemError::new(MISSING_ITEM_STATUS, "missing from batch response"));
            };
            if !(200..300).contains(&sub.status) {
                return Err(ItemError::from_response(sub.status, &sub.body));
            }
            match request {
                BatchRequest::Get { .. } => serde_json::from_str::<GmailMessage>(&sub.body)
                    .map(|m| BatchReply::Message(Box::new(m)))
                    .map_err(|e| ItemError::new(sub.status, format!("invalid message body: {}", e))),
                BatchRequest::Modify { .. } | BatchRequest::Delete { .. } => Ok(BatchReply::Done),
            }
        })
        .collect()
}

/// [`ClientProvider`] backed by the stored OAuth credential
pub struct GmailSession {
    auth: Arc<GmailAuth>,
    timeout: Duration,
}

impl GmailSession {
    pub fn new(auth: GmailAuth, timeout: Duration) -> Self {
        Self {
            auth: Arc::new(auth),
            timeout,
        }
    }
}

impl ClientProvider for GmailSession {
    fn authenticated_client(&self) -> Result<Arc<dyn MailApi>, ApiError> {
        self.auth
            .access_token()
            .map_err(|e| ApiError::NotAuthenticated(format!("{:#}", e)))?;
        Ok(Arc::new(GmailClient::new(self.auth.clone(), self.timeout)))
    }

    fn sign_in(&self) -> anyhow::Result<()> {
        self.auth.sign_in()
    }

    fn sign_out(&self) -> anyhow::Result<()> {
        self.auth.logout()
    }
}
