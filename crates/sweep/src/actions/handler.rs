//! Entry point for starting scans and bulk actions
//!
//! Input is validated and the credential checked before anything is
//! queued, so callers get synchronous rejections. Accepted work runs on
//! the [`TaskRunner`] and reports through the shared [`JobState`]. Label
//! management, the unread count and single-sender deletes answer in the
//! caller's thread.

use anyhow::Result;
use log::{error, info, warn};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use super::operations::{self, RunSettings, SenderAction, SenderDeletion, UnsubscribeTarget};
use super::unsubscribe::UnsubscribeClient;
use crate::config::SweepConfig;
use crate::gmail::api::Label;
use crate::gmail::{ApiError, ClientProvider, MailApi, labels};
use crate::jobs::{JobContext, JobState, StatusUpdate, SubmitError, TaskRunner};
use crate::models::{MessageId, OperationKind, OperationStatus, SenderSummary};
use crate::query::{Filter, FilterError};

/// Synchronous rejection of a request
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StartError {
    #[error("{0}")]
    InvalidInput(String),
    #[error("Not authenticated: {0}")]
    NotAuthenticated(String),
    #[error("{0} is already running")]
    AlreadyRunning(OperationKind),
    #[error("Sign-in is already in progress")]
    SignInInProgress,
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Conflict(String),
    /// The provider failed the call
    #[error("{0}")]
    Upstream(String),
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<SubmitError> for StartError {
    fn from(e: SubmitError) -> Self {
        match e {
            SubmitError::AlreadyRunning(kind) => StartError::AlreadyRunning(kind),
        }
    }
}

impl From<FilterError> for StartError {
    fn from(e: FilterError) -> Self {
        StartError::InvalidInput(e.to_string())
    }
}

impl From<ApiError> for StartError {
    fn from(e: ApiError) -> Self {
        match e {
            ApiError::NotAuthenticated(message) => StartError::NotAuthenticated(message),
            ApiError::Status { status: 404, message } => StartError::NotFound(message),
            ApiError::Status { status: 409, message } => StartError::Conflict(message),
            other => StartError::Upstream(other.to_string()),
        }
    }
}

/// Labels split the way the UI shows them
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LabelOverview {
    pub system_labels: Vec<Label>,
    /// Sorted by name, case-insensitively
    pub user_labels: Vec<Label>,
}

/// Clears the sign-in flag when the flow ends, even by panic
struct SignInGuard(Arc<AtomicBool>);

impl Drop for SignInGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Coordinates validation, authorization and background execution
pub struct ActionHandler {
    jobs: Arc<JobState>,
    runner: TaskRunner,
    provider: Arc<dyn ClientProvider>,
    unsubscriber: Arc<dyn UnsubscribeClient>,
    settings: SweepConfig,
    signing_in: Arc<AtomicBool>,
}

impl ActionHandler {
    pub fn new(
        settings: SweepConfig,
        provider: Arc<dyn ClientProvider>,
        unsubscriber: Arc<dyn UnsubscribeClient>,
    ) -> Result<Self> {
        let jobs = Arc::new(JobState::new());
        let runner = TaskRunner::new(settings.workers, Arc::clone(&jobs))?;
        Ok(Self {
            jobs,
            runner,
            provider,
            unsubscriber,
            settings,
            signing_in: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn jobs(&self) -> &Arc<JobState> {
        &self.jobs
    }

    pub fn settings(&self) -> &SweepConfig {
        &self.settings
    }

    pub fn status(&self, kind: OperationKind) -> OperationStatus {
        self.jobs.get(kind)
    }

    /// Status of the most recently started action, or an idle mark-read status
    pub fn action_status(&self) -> OperationStatus {
        match self.jobs.latest_action() {
            Some(kind) => self.jobs.get(kind),
            None => OperationStatus::idle(OperationKind::MarkRead),
        }
    }

    /// Cached scan results, ranked by count descending
    pub fn scan_results(&self) -> Vec<SenderSummary> {
        self.jobs.ranked_scan_results()
    }

    /// CSV from the last completed download
    pub fn download_csv(&self) -> Option<String> {
        self.jobs.download_csv()
    }

    pub fn is_authenticated(&self) -> bool {
        self.provider.is_authenticated()
    }

    pub fn is_signing_in(&self) -> bool {
        self.signing_in.load(Ordering::SeqCst)
    }

    /// Launch the interactive sign-in flow on its own thread
    ///
    /// Only one flow runs at a time; the worker pool is never used, so a
    /// browser that never redirects cannot starve queued jobs.
    pub fn sign_in(&self) -> Result<(), StartError> {
        if self.signing_in.swap(true, Ordering::SeqCst) {
            info!("Rejected sign-in: already in progress");
            return Err(StartError::SignInInProgress);
        }
        let guard = SignInGuard(Arc::clone(&self.signing_in));
        let provider = Arc::clone(&self.provider);

        std::thread::Builder::new()
            .name("sweep-sign-in".to_string())
            .spawn(move || {
                let _guard = guard;
                match provider.sign_in() {
                    Ok(()) => info!("Sign-in completed"),
                    Err(e) => error!("Sign-in failed: {:#}", e),
                }
            })
            .map_err(|e| StartError::Internal(format!("failed to start sign-in: {}", e)))?;
        Ok(())
    }

    pub fn sign_out(&self) -> Result<()> {
        self.provider.sign_out()
    }

    fn run_settings(&self) -> RunSettings {
        RunSettings {
            policy: self.settings.retry_policy(),
            chunk_size: self.settings.chunk_size,
            max_subjects: self.settings.max_subjects,
            per_sender_limit: self.settings.max_scan_limit,
        }
    }

    fn client(&self) -> Result<Arc<dyn MailApi>, StartError> {
        self.provider
            .authenticated_client()
            .map_err(|e| StartError::NotAuthenticated(e.to_string()))
    }

    /// Start a scan of up to `limit` messages matching `filter`
    pub fn start_scan(&self, limit: Option<usize>, filter: Filter) -> Result<(), StartError> {
        let limit = limit.unwrap_or(self.settings.default_scan_limit);
        if limit == 0 || limit > self.settings.max_scan_limit {
            return Err(StartError::InvalidInput(format!(
                "limit must be between 1 and {}",
                self.settings.max_scan_limit
            )));
        }
        filter.validate()?;

        let api = self.client()?;
        let settings = self.run_settings();

        self.runner.submit(OperationKind::Scan, move |ctx| {
            operations::run_scan(ctx, api.as_ref(), &settings, limit, &filter)
        })?;
        info!("Scan started (limit {})", limit);
        Ok(())
    }

    /// Start mark-read, archive, delete or unsubscribe over `senders`
    pub fn start_action(&self, kind: OperationKind, senders: Vec<String>) -> Result<(), StartError> {
        let senders = validate_senders(senders)?;
        if kind == OperationKind::Unsubscribe {
            return self.start_unsubscribe(senders);
        }
        let action = SenderAction::for_kind(kind)
            .ok_or_else(|| StartError::InvalidInput(format!("{} is not a sender action", kind)))?;
        self.submit_sender_action(action, senders)
    }

    /// Add (`apply`) or remove the label `label_id` on every message from `senders`
    pub fn start_label_action(&self, label_id: &str, senders: Vec<String>, apply: bool) -> Result<(), StartError> {
        let label_id = label_id.trim();
        if label_id.is_empty() {
            return Err(StartError::InvalidInput("Label ID is required".to_string()));
        }
        let senders = validate_senders(senders)?;
        let action = if apply {
            SenderAction::ApplyLabel(label_id.to_string())
        } else {
            SenderAction::RemoveLabel(label_id.to_string())
        };
        self.submit_sender_action(action, senders)
    }

    /// Mark (`important`) or unmark every message from `senders` as important
    pub fn start_important(&self, senders: Vec<String>, important: bool) -> Result<(), StartError> {
        let senders = validate_senders(senders)?;
        let action = if important {
            SenderAction::MarkImportant
        } else {
            SenderAction::UnmarkImportant
        };
        self.submit_sender_action(action, senders)
    }

    fn submit_sender_action(&self, action: SenderAction, senders: Vec<String>) -> Result<(), StartError> {
        let api = self.client()?;
        let settings = self.run_settings();
        let kind = action.kind();
        let count = senders.len();

        self.runner.submit(kind, move |ctx| {
            operations::run_sender_action(ctx, api.as_ref(), &settings, &action, &senders)
        })?;
        info!("{} started for {} senders", kind, count);
        Ok(())
    }

    /// Unsubscribe needs only the links from the latest scan, not the mailbox
    fn start_unsubscribe(&self, senders: Vec<String>) -> Result<(), StartError> {
        let targets: Vec<UnsubscribeTarget> = senders
            .into_iter()
            .map(|sender| {
                let summary = self.jobs.scan_result_for(&sender);
                UnsubscribeTarget {
                    link: summary.as_ref().and_then(|s| s.action_link.clone()),
                    one_click: summary.is_some_and(|s| s.one_click),
                    sender,
                }
            })
            .collect();
        let client = Arc::clone(&self.unsubscriber);
        let count = targets.len();

        self.runner.submit(OperationKind::Unsubscribe, move |ctx| {
            operations::run_unsubscribe(ctx, client.as_ref(), &targets)
        })?;
        info!("Unsubscribe started for {} senders", count);
        Ok(())
    }

    /// Export the scanned messages of `senders` as CSV
    ///
    /// Ids are taken from the latest scan when the request is accepted.
    pub fn start_download(&self, senders: Vec<String>) -> Result<(), StartError> {
        let senders = validate_senders(senders)?;
        let api = self.client()?;
        let settings = self.run_settings();

        let mut seen = HashSet::new();
        let ids: Vec<MessageId> = senders
            .iter()
            .filter_map(|sender| self.jobs.scan_result_for(sender))
            .flat_map(|summary| summary.message_ids)
            .filter(|id| seen.insert(id.clone()))
            .collect();
        let count = ids.len();

        self.runner.submit(OperationKind::Download, move |ctx| {
            operations::run_download(ctx, api.as_ref(), &settings, &ids)
        })?;
        info!("Download started for {} emails", count);
        Ok(())
    }

    /// Trash one sender's scanned messages before returning
    ///
    /// Shares the delete status slot, so it is rejected while a bulk
    /// delete runs and vice versa.
    pub fn delete_sender_emails(&self, sender: &str) -> Result<SenderDeletion, StartError> {
        if sender.trim().is_empty() {
            return Err(StartError::InvalidInput("Sender email is required".to_string()));
        }
        let sender = validate_senders(vec![sender.to_string()])?
            .into_iter()
            .next()
            .ok_or_else(|| StartError::InvalidInput("Sender email is required".to_string()))?;
        let summary = self
            .jobs
            .scan_result_for(&sender)
            .filter(|s| !s.message_ids.is_empty())
            .ok_or_else(|| {
                StartError::InvalidInput("No scan results found for this sender. Please scan first.".to_string())
            })?;
        let api = self.client()?;

        let kind = OperationKind::Delete;
        if !self.jobs.try_start(kind) {
            return Err(StartError::AlreadyRunning(kind));
        }
        let ctx = JobContext::new(kind, Arc::clone(&self.jobs));
        match operations::trash_scanned_sender(&ctx, api.as_ref(), &self.run_settings(), &summary) {
            Ok(deletion) => {
                info!("Deleted {} emails from {}", deletion.deleted, sender);
                ctx.update(StatusUpdate::new().message(deletion.message.clone()));
                self.jobs.finish(kind, None);
                Ok(deletion)
            }
            Err(e) => {
                warn!("Delete for {} failed: {:#}", sender, e);
                self.jobs.finish(kind, Some(format!("{:#}", e)));
                Err(StartError::Upstream(format!("{:#}", e)))
            }
        }
    }

    /// Unread messages in the inbox
    pub fn unread_count(&self) -> Result<u64, StartError> {
        let inbox = self.client()?.label(labels::INBOX)?;
        Ok(inbox.messages_unread.unwrap_or(0))
    }

    /// System and user labels
    pub fn labels(&self) -> Result<LabelOverview, StartError> {
        let (system_labels, mut user_labels): (Vec<Label>, Vec<Label>) =
            self.client()?.labels()?.into_iter().partition(Label::is_system);
        user_labels.sort_by_key(|l| l.name.to_lowercase());
        Ok(LabelOverview {
            system_labels,
            user_labels,
        })
    }

    /// Create a user label named `name` (trimmed)
    pub fn create_label(&self, name: &str) -> Result<Label, StartError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(StartError::InvalidInput("Label name is required".to_string()));
        }
        let api = self.client()?;
        if api.labels()?.iter().any(|l| l.name.eq_ignore_ascii_case(name)) {
            return Err(StartError::Conflict(format!("Label '{}' already exists", name)));
        }

        let label = api.create_label(name)?;
        info!("Created label {} ({})", label.name, label.id);
        Ok(label)
    }

    /// Delete the user label `id`; system labels are refused
    pub fn delete_label(&self, id: &str) -> Result<(), StartError> {
        let id = id.trim();
        if id.is_empty() {
            return Err(StartError::InvalidInput("Label ID is required".to_string()));
        }
        let api = self.client()?;
        let label = api.label(id).map_err(|e| match StartError::from(e) {
            StartError::NotFound(_) => StartError::NotFound("Label not found".to_string()),
            other => other,
        })?;
        if label.is_system() {
            return Err(StartError::InvalidInput("Cannot delete system labels".to_string()));
        }

        api.delete_label(id)?;
        info!("Deleted label {} ({})", label.name, id);
        Ok(())
    }
}

/// Trim, de-duplicate and check that each entry is an address or a domain
///
/// Blank entries are rejected rather than skipped.
pub fn validate_senders(senders: Vec<String>) -> Result<Vec<String>, StartError> {
    let mut seen = HashSet::new();
    let mut valid = Vec::with_capacity(senders.len());

    for sender in senders {
        let sender = sender.trim();
        if sender.is_empty() {
            return Err(StartError::InvalidInput("blank sender in list".to_string()));
        }
        if !is_address_or_domain(sender) {
            return Err(StartError::InvalidInput(format!("invalid sender: {:?}", sender)));
        }
        if seen.insert(sender.to_ascii_lowercase()) {
            valid.push(sender.to_string());
        }
    }

    if valid.is_empty() {
        return Err(StartError::InvalidInput("no senders given".to_string()));
    }
    Ok(valid)
}

fn is_address_or_domain(value: &str) -> bool {
    match value.rsplit_once('@') {
        Some((local, domain)) => is_valid_local(local) && is_valid_domain(domain),
        None => is_valid_domain(value),
    }
}

fn is_valid_local(local: &str) -> bool {
    !local.is_empty()
        && local.len() <= 64
        && local
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "!#$%&'*+-/=?^_`{|}~.".contains(c))
}

fn is_valid_domain(domain: &str) -> bool {
    let labels: Vec<&str> = domain.split('.').collect();
    domain.len() <= 253
        && labels.len() >= 2
        && labels.iter().all(|label| {
            !label.is_empty()
                && label.len() <= 63
                && !label.starts_with('-')
                && !label.ends_with('-')
                && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::{LinkKind, UnsubscribeResult};
    use std::sync::Mutex;
    use std::sync::mpsc::{self, Receiver, Sender};
    use std::time::{Duration, Instant};

    /// Sign-in that waits for the test to release it, like a browser left open
    struct StalledSignIn {
        release: Mutex<Receiver<()>>,
        entered: Mutex<Sender<()>>,
    }

    impl ClientProvider for StalledSignIn {
        fn authenticated_client(&self) -> Result<Arc<dyn MailApi>, ApiError> {
            Err(ApiError::NotAuthenticated("no stored credentials".to_string()))
        }

        fn sign_in(&self) -> anyhow::Result<()> {
            self.entered.lock().unwrap().send(()).ok();
            self.release.lock().unwrap().recv().ok();
            Ok(())
        }

        fn sign_out(&self) -> anyhow::Result<()> {
            Ok(())
        }
    }

    struct AlwaysUnsubscribes;

    impl UnsubscribeClient for AlwaysUnsubscribes {
        fn unsubscribe(&self, _link: Option<&str>, _one_click: bool) -> UnsubscribeResult {
            UnsubscribeResult {
                success: true,
                kind: LinkKind::Http,
                message: "ok".to_string(),
            }
        }
    }

    fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        false
    }

    #[test]
    fn test_pending_sign_in_leaves_workers_free() {
        let (release_tx, release_rx) = mpsc::channel();
        let (entered_tx, entered_rx) = mpsc::channel();
        let provider = Arc::new(StalledSignIn {
            release: Mutex::new(release_rx),
            entered: Mutex::new(entered_tx),
        });
        let settings = SweepConfig {
            workers: 1,
            ..SweepConfig::default()
        };
        let handler = ActionHandler::new(settings, provider, Arc::new(AlwaysUnsubscribes)).unwrap();

        handler.sign_in().unwrap();
        entered_rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(handler.is_signing_in());
        assert_eq!(handler.sign_in(), Err(StartError::SignInInProgress));

        // The only worker is still available for jobs
        handler
            .start_action(OperationKind::Unsubscribe, vec!["news@shop.com".to_string()])
            .unwrap();
        assert!(wait_until(|| handler.status(OperationKind::Unsubscribe).done));
        assert_eq!(handler.status(OperationKind::Unsubscribe).affected_count, 1);

        release_tx.send(()).unwrap();
        assert!(wait_until(|| !handler.is_signing_in()));
        assert_eq!(handler.sign_in(), Ok(()));
        release_tx.send(()).unwrap();
    }

    #[test]
    fn test_validate_senders_trims_and_dedupes() {
        let senders = vec![
            " news@shop.com ".to_string(),
            "NEWS@shop.com".to_string(),
            "example.org".to_string(),
        ];
        assert_eq!(
            validate_senders(senders).unwrap(),
            vec!["news@shop.com".to_string(), "example.org".to_string()]
        );
    }

    #[test]
    fn test_validate_senders_rejects_bad_input() {
        assert!(matches!(validate_senders(Vec::new()), Err(StartError::InvalidInput(_))));
        assert!(matches!(
            validate_senders(vec!["   ".to_string()]),
            Err(StartError::InvalidInput(_))
        ));
        assert_eq!(
            validate_senders(vec!["a@x.com".to_string(), " ".to_string()]),
            Err(StartError::InvalidInput("blank sender in list".to_string()))
        );
        for bad in [
            "a@x.com OR from:*",
            "bad\"sender@x.com",
            "localhost",
            "@x.com",
            "a@-x.com",
            "a@x..com",
        ] {
            assert!(validate_senders(vec![bad.to_string()]).is_err(), "{}", bad);
        }
    }
}
