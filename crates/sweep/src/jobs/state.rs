//! Thread-safe in-memory operation status store

use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard, RwLock};

use crate::models::{OperationKind, OperationStatus, SenderSummary, rank_by_count};

/// Partial status change applied atomically by [`JobState::update`]
///
/// Absent fields are left untouched.
#[derive(Debug, Clone, Default)]
pub struct StatusUpdate {
    pub progress: Option<u8>,
    pub message: Option<String>,
    pub affected_count: Option<usize>,
    pub add_affected: usize,
    pub current_index: Option<usize>,
    pub total: Option<usize>,
}

impl StatusUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn progress(mut self, progress: u8) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn affected(mut self, count: usize) -> Self {
        self.affected_count = Some(count);
        self
    }

    pub fn add_affected(mut self, count: usize) -> Self {
        self.add_affected += count;
        self
    }

    pub fn current(mut self, index: usize) -> Self {
        self.current_index = Some(index);
        self
    }

    pub fn total(mut self, total: usize) -> Self {
        self.total = Some(total);
        self
    }
}

struct Slot {
    status: OperationStatus,
    running: bool,
}

/// Shared status for all operation kinds
///
/// Each kind has its own lock so updates to different kinds never contend.
/// Every read returns an owned copy; nothing hands out references into the
/// internal storage.
pub struct JobState {
    slots: Vec<Mutex<Slot>>,
    scan_results: RwLock<Vec<SenderSummary>>,
    latest_action: Mutex<Option<OperationKind>>,
    download_csv: RwLock<Option<String>>,
}

impl JobState {
    pub fn new() -> Self {
        Self {
            slots: OperationKind::ALL
                .iter()
                .map(|&kind| {
                    Mutex::new(Slot {
                        status: OperationStatus::idle(kind),
                        running: false,
                    })
                })
                .collect(),
            scan_results: RwLock::new(Vec::new()),
            latest_action: Mutex::new(None),
            download_csv: RwLock::new(None),
        }
    }

    fn slot(&self, kind: OperationKind) -> MutexGuard<'_, Slot> {
        // Bookkeeping never panics while holding the lock, but recover anyway
        self.slots[kind.index()]
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Reset and mark running only if no run of `kind` is in flight
    ///
    /// Returns `false`, leaving the in-flight status untouched, otherwise.
    pub fn try_start(&self, kind: OperationKind) -> bool {
        let mut slot = self.slot(kind);
        if slot.running {
            return false;
        }
        slot.status = OperationStatus::starting(kind);
        slot.running = true;
        drop(slot);
        self.note_started(kind);
        true
    }

    fn note_started(&self, kind: OperationKind) {
        if kind.is_action() {
            *self
                .latest_action
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(kind);
        }
    }

    /// Merge `update` into the status of `kind`
    ///
    /// Ignored once the run is done. Progress never moves backwards.
    pub fn update(&self, kind: OperationKind, update: StatusUpdate) {
        let mut slot = self.slot(kind);
        let status = &mut slot.status;
        if status.done {
            return;
        }

        if let Some(progress) = update.progress {
            status.progress = status.progress.max(progress.min(100));
        }
        if let Some(message) = update.message {
            status.message = message;
        }
        if let Some(count) = update.affected_count {
            status.affected_count = count;
        }
        status.affected_count += update.add_affected;
        if let Some(index) = update.current_index {
            status.current_index = index;
        }
        if let Some(total) = update.total {
            status.total = total;
        }
    }

    /// Mark the run of `kind` done, recording `error` if it failed
    ///
    /// A successful finish reports 100% progress; a failed one keeps the
    /// partial progress reached so far.
    pub fn finish(&self, kind: OperationKind, error: Option<String>) {
        let mut slot = self.slot(kind);
        slot.running = false;
        let status = &mut slot.status;
        if status.done {
            return;
        }
        status.done = true;
        match error {
            Some(error) => status.error = Some(error),
            None => status.progress = 100,
        }
    }

    /// Snapshot of the status for `kind`
    pub fn get(&self, kind: OperationKind) -> OperationStatus {
        self.slot(kind).status.clone()
    }

    pub fn is_running(&self, kind: OperationKind) -> bool {
        self.slot(kind).running
    }

    /// Most recently started action kind (anything but scan)
    pub fn latest_action(&self) -> Option<OperationKind> {
        *self
            .latest_action
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Replace the cached scan results
    pub fn set_scan_results(&self, results: Vec<SenderSummary>) {
        *self
            .scan_results
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = results;
    }

    /// Copy of the cached scan results in first-seen order
    pub fn scan_results(&self) -> Vec<SenderSummary> {
        self.scan_results
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Copy of the cached scan results ranked by count descending
    pub fn ranked_scan_results(&self) -> Vec<SenderSummary> {
        rank_by_count(self.scan_results())
    }

    /// Look up one sender's summary by address (case-insensitive)
    pub fn scan_result_for(&self, sender: &str) -> Option<SenderSummary> {
        self.scan_results
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .iter()
            .find(|s| s.sender_address.eq_ignore_ascii_case(sender))
            .cloned()
    }

    /// Drop the given senders from the cached scan results
    pub fn remove_senders(&self, senders: &HashSet<String>) {
        self.scan_results
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .retain(|s| !senders.contains(&s.sender_address));
    }

    /// Replace (or clear) the last export
    pub fn set_download_csv(&self, csv: Option<String>) {
        *self
            .download_csv
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = csv;
    }

    /// Copy of the last completed export
    pub fn download_csv(&self) -> Option<String> {
        self.download_csv
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

impl Default for JobState {
    fn default() -> Self {
        Self::new()
    }
}
