//! Chunked batch execution against the remote API
//!
//! Items are split into chunks no larger than the provider's batch limit and
//! submitted one chunk at a time, in order. Each item's outcome is recorded
//! independently; only chunk-level failures stop the run.

use log::{debug, info, warn};
use std::time::{Duration, Instant};

use super::RetryPolicy;
use crate::gmail::api::GmailMessage;
use crate::gmail::{ApiError, BatchReply, BatchRequest, MailApi, MessageFormat};
use crate::jobs::{JobContext, StatusUpdate};
use crate::models::MessageId;

/// Most sub-requests Gmail accepts in one batch call
pub const MAX_CHUNK_SIZE: usize = 100;

/// Operation applied to every item of a run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemOp {
    /// Fetch the listed headers
    FetchMetadata { headers: Vec<String> },
    /// Fetch the whole message including body parts
    FetchFull,
    /// Add and remove label ids
    ModifyLabels { add: Vec<String>, remove: Vec<String> },
    /// Move to Trash
    Trash,
}

impl ItemOp {
    /// Build the request for one item
    pub fn request_for(&self, id: &MessageId) -> BatchRequest {
        match self {
            ItemOp::FetchMetadata { headers } => BatchRequest::Get {
                id: id.clone(),
                format: MessageFormat::Metadata,
                headers: headers.clone(),
            },
            ItemOp::FetchFull => BatchRequest::Get {
                id: id.clone(),
                format: MessageFormat::Full,
                headers: Vec::new(),
            },
            ItemOp::ModifyLabels { add, remove } => BatchRequest::Modify {
                id: id.clone(),
                add_labels: add.clone(),
                remove_labels: remove.clone(),
            },
            ItemOp::Trash => BatchRequest::Delete { id: id.clone() },
        }
    }
}

/// Outcome for one item
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchResult {
    pub item_id: MessageId,
    pub success: bool,
    pub error: Option<String>,
}

impl BatchResult {
    fn succeeded(item_id: MessageId) -> Self {
        Self {
            item_id,
            success: true,
            error: None,
        }
    }

    fn failed(item_id: MessageId, error: impl Into<String>) -> Self {
        Self {
            item_id,
            success: false,
            error: Some(error.into()),
        }
    }
}

/// Everything a run produced
#[derive(Debug, Default)]
pub struct BatchRun {
    /// One entry per attempted item, in completion order
    pub results: Vec<BatchResult>,
    /// Messages returned by fetch operations
    pub messages: Vec<GmailMessage>,
    /// Chunk-level failure that stopped the run early
    pub failure: Option<ApiError>,
}

impl BatchRun {
    /// Number of items that succeeded
    pub fn affected(&self) -> usize {
        self.results.iter().filter(|r| r.success).count()
    }

    pub fn failed(&self) -> usize {
        self.results.len() - self.affected()
    }
}

/// Runs one operation over a list of ids in bounded chunks
pub struct BatchExecutor<'a> {
    api: &'a dyn MailApi,
    policy: RetryPolicy,
    chunk_size: usize,
}

impl<'a> BatchExecutor<'a> {
    /// `chunk_size` is clamped to `1..=MAX_CHUNK_SIZE`
    pub fn new(api: &'a dyn MailApi, policy: RetryPolicy, chunk_size: usize) -> Self {
        Self {
            api,
            policy,
            chunk_size: chunk_size.clamp(1, MAX_CHUNK_SIZE),
        }
    }

    /// Apply `op` to every id, reporting progress to `ctx` after each chunk
    ///
    /// Progress after chunk `i` of `n` is `ceil(i * 100 / n)`. A chunk that
    /// cannot be completed marks its remaining items failed, sets
    /// [`BatchRun::failure`] and stops; earlier chunks are not undone.
    pub fn run(&self, ctx: &JobContext, ids: &[MessageId], op: &ItemOp) -> BatchRun {
        let mut run = BatchRun::default();
        let total_chunks = ids.len().div_ceil(self.chunk_size);
        ctx.update(StatusUpdate::new().total(ids.len()));

        let mut processed = 0;
        for (index, chunk) in ids.chunks(self.chunk_size).enumerate() {
            let requests: Vec<BatchRequest> = chunk.iter().map(|id| op.request_for(id)).collect();

            let mut successes = 0;
            let outcome = self.run_chunk(requests, &mut run, &mut successes);
            let update = StatusUpdate::new().add_affected(successes).total(ids.len());

            if let Err(e) = outcome {
                warn!(
                    "{} aborted at chunk {}/{} after {} successes: {}",
                    ctx.kind(),
                    index + 1,
                    total_chunks,
                    successes,
                    e
                );
                ctx.update(update);
                run.failure = Some(e);
                break;
            }

            processed += chunk.len();
            let done = index + 1;
            let progress = (done * 100).div_ceil(total_chunks).min(100) as u8;
            debug!(
                "{} chunk {}/{}: {} of {} succeeded",
                ctx.kind(),
                done,
                total_chunks,
                successes,
                chunk.len()
            );
            ctx.update(
                update
                    .progress(progress)
                    .message(format!("Processed chunk {}/{}", done, total_chunks))
                    .current(processed),
            );
        }

        info!(
            "{} batch run: {} succeeded, {} failed",
            ctx.kind(),
            run.affected(),
            run.failed()
        );
        run
    }

    /// Submit one chunk until every item has a final outcome
    ///
    /// Rate-limited items are resubmitted after a pause; the chunk is never
    /// skipped. `successes` counts items that succeeded, including those
    /// settled before a later call in the same chunk fails.
    fn run_chunk(
        &self,
        mut pending: Vec<BatchRequest>,
        run: &mut BatchRun,
        successes: &mut usize,
    ) -> Result<(), ApiError> {
        let started = Instant::now();
        let mut transport_failures = 0u32;
        let mut rate_limit_waits = 0u32;

        while !pending.is_empty() {
            let outcomes = match self.api.batch(&pending) {
                Ok(outcomes) if outcomes.len() == pending.len() => outcomes,
                Ok(outcomes) => {
                    let e = ApiError::Decode(format!(
                        "expected {} batch outcomes, got {}",
                        pending.len(),
                        outcomes.len()
                    ));
                    fail_pending(run, &pending, &e);
                    return Err(e);
                }
                Err(ApiError::RateLimited { retry_after }) => {
                    if let Err(e) = self.pause_for_rate_limit(started, &mut rate_limit_waits, retry_after) {
                        fail_pending(run, &pending, &e);
                        return Err(e);
                    }
                    continue;
                }
                Err(e) if e.is_retryable() => {
                    transport_failures += 1;
                    if transport_failures >= self.policy.max_attempts {
                        fail_pending(run, &pending, &e);
                        return Err(e);
                    }
                    let delay = self.policy.backoff(transport_failures - 1);
                    warn!(
                        "Batch call failed (attempt {}/{}), retrying in {:?}: {}",
                        transport_failures, self.policy.max_attempts, delay, e
                    );
                    std::thread::sleep(delay);
                    continue;
                }
                Err(e) => {
                    fail_pending(run, &pending, &e);
                    return Err(e);
                }
            };

            let mut throttled = Vec::new();
            for (request, outcome) in std::mem::take(&mut pending).into_iter().zip(outcomes) {
                let id = request.id().clone();
                match outcome {
                    Ok(reply) => {
                        *successes += 1;
                        if let BatchReply::Message(message) = reply {
                            run.messages.push(*message);
                        }
                        run.results.push(BatchResult::succeeded(id));
                    }
                    Err(e) if e.is_rate_limited() => throttled.push(request),
                    Err(e) => run.results.push(BatchResult::failed(id, e.to_string())),
                }
            }

            pending = throttled;
            if !pending.is_empty() {
                debug!("{} items rate limited, resubmitting", pending.len());
                if let Err(e) = self.pause_for_rate_limit(started, &mut rate_limit_waits, None) {
                    fail_pending(run, &pending, &e);
                    return Err(e);
                }
            }
        }

        Ok(())
    }

    /// Sleep before resubmitting a rate-limited chunk, or give up past the ceiling
    fn pause_for_rate_limit(
        &self,
        started: Instant,
        waits: &mut u32,
        retry_after: Option<Duration>,
    ) -> Result<(), ApiError> {
        let elapsed = started.elapsed();
        let ceiling = self.policy.rate_limit_ceiling;
        if elapsed >= ceiling {
            return Err(ApiError::RateLimited { retry_after });
        }

        let delay = self
            .policy
            .rate_limit_delay(*waits, retry_after)
            .min(ceiling - elapsed);
        *waits += 1;
        warn!("Rate limited, pausing {:?} before retrying chunk", delay);
        std::thread::sleep(delay);
        Ok(())
    }
}

fn fail_pending(run: &mut BatchRun, pending: &[BatchRequest], error: &ApiError) {
    let message = error.to_string();
    run.results.extend(
        pending
            .iter()
            .map(|request| BatchResult::failed(request.id().clone(), message.clone())),
    );
}
