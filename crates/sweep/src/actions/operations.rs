//! Job bodies
//!
//! Each function receives everything it needs up front (ids, senders,
//! unsubscribe targets) and reports progress through its [`JobContext`].
//! All but [`trash_scanned_sender`] run on the worker pool.

use anyhow::{Context, Result, anyhow};
use log::{info, warn};
use serde::Serialize;
use std::collections::HashSet;

use super::unsubscribe::UnsubscribeClient;
use crate::batch::{BatchExecutor, ItemOp, RetryPolicy};
use crate::export::messages_to_csv;
use crate::gmail::{MailApi, labels};
use crate::jobs::{JobContext, StatusUpdate};
use crate::models::{MessageId, OperationKind, SenderSummary};
use crate::query::{Filter, build_query};
use crate::scan::{METADATA_HEADERS, aggregate};

/// Executor settings shared by every job
#[derive(Debug, Clone)]
pub struct RunSettings {
    pub policy: RetryPolicy,
    pub chunk_size: usize,
    pub max_subjects: usize,
    /// Upper bound on messages listed per sender for bulk actions
    pub per_sender_limit: usize,
}

/// List, fetch metadata, group by sender and cache the summaries
pub fn run_scan(
    ctx: &JobContext,
    api: &dyn MailApi,
    settings: &RunSettings,
    limit: usize,
    filter: &Filter,
) -> Result<String> {
    ctx.jobs().set_scan_results(Vec::new());
    ctx.update(StatusUpdate::new().message("Listing messages..."));

    let query = build_query(filter);
    info!("Scanning up to {} messages matching {:?}", limit, query);
    let ids = api.list(&query, limit).context("Failed to list messages")?;

    if ids.is_empty() {
        return Ok("No emails found".to_string());
    }
    ctx.update(StatusUpdate::new().message(format!("Fetching details for {} emails...", ids.len())));

    let op = ItemOp::FetchMetadata {
        headers: METADATA_HEADERS.iter().map(|h| h.to_string()).collect(),
    };
    let run = BatchExecutor::new(api, settings.policy.clone(), settings.chunk_size).run(ctx, &ids, &op);

    let summaries = aggregate(&run.messages, settings.max_subjects);
    let senders = summaries.len();
    ctx.jobs().set_scan_results(summaries);

    if let Some(failure) = &run.failure {
        return Err(anyhow!(
            "{} (scanned {} of {} emails)",
            failure,
            run.messages.len(),
            ids.len()
        ));
    }
    if run.failed() > 0 {
        warn!("Scan skipped {} emails that could not be fetched", run.failed());
    }
    Ok(format!("Found {} senders", senders))
}

/// Bulk change applied to every message of the chosen senders
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SenderAction {
    MarkRead,
    Archive,
    Delete,
    ApplyLabel(String),
    RemoveLabel(String),
    MarkImportant,
    UnmarkImportant,
}

impl SenderAction {
    /// Action behind a generic sender endpoint
    pub fn for_kind(kind: OperationKind) -> Option<Self> {
        match kind {
            OperationKind::MarkRead => Some(SenderAction::MarkRead),
            OperationKind::Archive => Some(SenderAction::Archive),
            OperationKind::Delete => Some(SenderAction::Delete),
            _ => None,
        }
    }

    /// Status slot the action reports to
    pub fn kind(&self) -> OperationKind {
        match self {
            SenderAction::MarkRead => OperationKind::MarkRead,
            SenderAction::Archive => OperationKind::Archive,
            SenderAction::Delete => OperationKind::Delete,
            SenderAction::ApplyLabel(_) | SenderAction::RemoveLabel(_) => OperationKind::Label,
            SenderAction::MarkImportant | SenderAction::UnmarkImportant => OperationKind::Important,
        }
    }

    /// Search filter for one sender and the per-item operation
    fn plan(&self, sender: &str) -> (Filter, ItemOp) {
        let mut filter = Filter::from_sender(sender);
        let (add, remove) = match self {
            SenderAction::MarkRead => {
                filter.unread_only = true;
                (None, Some(labels::UNREAD.to_string()))
            }
            SenderAction::Archive => {
                filter.inbox_only = true;
                (None, Some(labels::INBOX.to_string()))
            }
            SenderAction::Delete => return (filter, ItemOp::Trash),
            SenderAction::ApplyLabel(id) => (Some(id.clone()), None),
            SenderAction::RemoveLabel(id) => (None, Some(id.clone())),
            SenderAction::MarkImportant => (Some(labels::IMPORTANT.to_string()), None),
            SenderAction::UnmarkImportant => (None, Some(labels::IMPORTANT.to_string())),
        };
        let op = ItemOp::ModifyLabels {
            add: add.into_iter().collect(),
            remove: remove.into_iter().collect(),
        };
        (filter, op)
    }

    fn completion_message(&self, count: usize) -> String {
        match self {
            SenderAction::MarkRead => format!("Marked {} emails as read", count),
            SenderAction::Archive => format!("Archived {} emails", count),
            SenderAction::Delete => format!("Moved {} emails to trash", count),
            SenderAction::ApplyLabel(_) => format!("Applied label to {} emails", count),
            SenderAction::RemoveLabel(_) => format!("Removed label from {} emails", count),
            SenderAction::MarkImportant => format!("{} emails marked as important", count),
            SenderAction::UnmarkImportant => format!("{} emails unmarked as important", count),
        }
    }

    /// Senders handled by these actions no longer belong in the scan results
    fn clears_senders(&self) -> bool {
        matches!(
            self,
            SenderAction::MarkRead | SenderAction::Archive | SenderAction::Delete
        )
    }
}

/// Apply `action` to every message from `senders`
///
/// Mark-read, archive and delete drop the processed senders from the
/// cached scan results on success.
pub fn run_sender_action(
    ctx: &JobContext,
    api: &dyn MailApi,
    settings: &RunSettings,
    action: &SenderAction,
    senders: &[String],
) -> Result<String> {
    let kind = ctx.kind();
    let first = senders.first().context("No senders given")?;
    let (_, op) = action.plan(first);

    let mut seen = HashSet::new();
    let mut ids: Vec<MessageId> = Vec::new();
    for (index, sender) in senders.iter().enumerate() {
        ctx.update(
            StatusUpdate::new()
                .message(format!("Finding emails from {} ({}/{})", sender, index + 1, senders.len())),
        );
        let (filter, _) = action.plan(sender);
        let found = api
            .list(&build_query(&filter), settings.per_sender_limit)
            .with_context(|| format!("Failed to list emails from {}", sender))?;
        ids.extend(found.into_iter().filter(|id| seen.insert(id.clone())));
    }

    if ids.is_empty() {
        if action.clears_senders() {
            remove_processed(ctx, senders);
        }
        return Ok("No emails found".to_string());
    }

    info!("{}: {} emails from {} senders", kind, ids.len(), senders.len());
    let run = BatchExecutor::new(api, settings.policy.clone(), settings.chunk_size).run(ctx, &ids, &op);

    if let Some(failure) = &run.failure {
        return Err(anyhow!(
            "{} ({} of {} emails processed)",
            failure,
            run.affected(),
            ids.len()
        ));
    }

    if action.clears_senders() {
        remove_processed(ctx, senders);
    }
    let mut message = action.completion_message(run.affected());
    if run.failed() > 0 {
        message.push_str(&format!(" ({} failed)", run.failed()));
    }
    Ok(message)
}

/// Fetch full messages and keep them as CSV for download
///
/// `ids` come from the cached scan results. The previous export is cleared
/// first and only replaced when every chunk completed.
pub fn run_download(
    ctx: &JobContext,
    api: &dyn MailApi,
    settings: &RunSettings,
    ids: &[MessageId],
) -> Result<String> {
    ctx.jobs().set_download_csv(None);
    if ids.is_empty() {
        anyhow::bail!("No emails found in scan results");
    }

    ctx.update(StatusUpdate::new().message(format!("Fetching {} emails...", ids.len())));
    let run = BatchExecutor::new(api, settings.policy.clone(), settings.chunk_size).run(ctx, ids, &ItemOp::FetchFull);

    if let Some(failure) = &run.failure {
        return Err(anyhow!(
            "{} (fetched {} of {} emails)",
            failure,
            run.messages.len(),
            ids.len()
        ));
    }

    let csv = messages_to_csv(&run.messages).context("Failed to build CSV")?;
    ctx.jobs().set_download_csv(Some(csv));

    let mut message = format!("Downloaded {} emails", run.messages.len());
    if run.failed() > 0 {
        message.push_str(&format!(" ({} could not be fetched)", run.failed()));
    }
    Ok(message)
}

/// Outcome of trashing one sender's scanned messages
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SenderDeletion {
    pub deleted: usize,
    /// Estimated bytes moved to Trash
    pub size_freed: u64,
    pub message: String,
}

/// Trash the messages a scan found for one sender
///
/// Runs in the caller's thread. The sender leaves the cached scan results
/// once every chunk completed.
pub fn trash_scanned_sender(
    ctx: &JobContext,
    api: &dyn MailApi,
    settings: &RunSettings,
    summary: &SenderSummary,
) -> Result<SenderDeletion> {
    let ids = &summary.message_ids;
    let run = BatchExecutor::new(api, settings.policy.clone(), settings.chunk_size).run(ctx, ids, &ItemOp::Trash);

    if let Some(failure) = &run.failure {
        return Err(anyhow!(
            "{} ({} of {} emails moved to trash)",
            failure,
            run.affected(),
            ids.len()
        ));
    }

    let deleted = run.affected();
    let size_freed = match ids.len() {
        0 => 0,
        n => summary.total_size * deleted as u64 / n as u64,
    };
    remove_processed(ctx, std::slice::from_ref(&summary.sender_address));

    Ok(SenderDeletion {
        deleted,
        size_freed,
        message: format!("Moved {} emails to trash", deleted),
    })
}

fn remove_processed(ctx: &JobContext, senders: &[String]) {
    let keys: HashSet<String> = senders.iter().map(|s| s.to_ascii_lowercase()).collect();
    ctx.jobs().remove_senders(&keys);
}

/// Unsubscribe context captured before dispatch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnsubscribeTarget {
    pub sender: String,
    pub link: Option<String>,
    pub one_click: bool,
}

/// Visit each sender's unsubscribe link in turn
///
/// Per-sender failures are counted but never stop the run.
pub fn run_unsubscribe(
    ctx: &JobContext,
    client: &dyn UnsubscribeClient,
    targets: &[UnsubscribeTarget],
) -> Result<String> {
    let total = targets.len();
    ctx.update(StatusUpdate::new().total(total));

    let mut succeeded = 0;
    let mut last_failure = None;
    for (index, target) in targets.iter().enumerate() {
        let result = client.unsubscribe(target.link.as_deref(), target.one_click);
        if result.success {
            succeeded += 1;
        } else {
            warn!("Unsubscribe from {} failed: {}", target.sender, result.message);
            last_failure = Some(format!("{}: {}", target.sender, result.message));
        }

        let done = index + 1;
        ctx.update(
            StatusUpdate::new()
                .progress(((done * 100).div_ceil(total)).min(100) as u8)
                .message(format!("Unsubscribing {}/{}", done, total))
                .add_affected(usize::from(result.success))
                .current(done),
        );
    }

    let mut message = format!("Unsubscribed from {} of {} senders", succeeded, total);
    if let Some(failure) = last_failure {
        message.push_str(&format!("; last failure: {}", failure));
    }
    Ok(message)
}
