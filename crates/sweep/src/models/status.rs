//! Background operation kinds and their pollable status

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The unit of background work tracked by the job state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OperationKind {
    Scan,
    MarkRead,
    Archive,
    Delete,
    Unsubscribe,
    /// Apply or remove a user label
    Label,
    /// Mark or unmark as important
    Important,
    /// Export full messages to CSV
    Download,
}

impl OperationKind {
    pub const COUNT: usize = 8;

    pub const ALL: [OperationKind; Self::COUNT] = [
        OperationKind::Scan,
        OperationKind::MarkRead,
        OperationKind::Archive,
        OperationKind::Delete,
        OperationKind::Unsubscribe,
        OperationKind::Label,
        OperationKind::Important,
        OperationKind::Download,
    ];

    /// Slot index into per-kind storage
    pub fn index(self) -> usize {
        match self {
            OperationKind::Scan => 0,
            OperationKind::MarkRead => 1,
            OperationKind::Archive => 2,
            OperationKind::Delete => 3,
            OperationKind::Unsubscribe => 4,
            OperationKind::Label => 5,
            OperationKind::Important => 6,
            OperationKind::Download => 7,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            OperationKind::Scan => "scan",
            OperationKind::MarkRead => "mark-read",
            OperationKind::Archive => "archive",
            OperationKind::Delete => "delete",
            OperationKind::Unsubscribe => "unsubscribe",
            OperationKind::Label => "label",
            OperationKind::Important => "important",
            OperationKind::Download => "download",
        }
    }

    /// Whether this kind works on a sender list picked from scan results
    pub fn is_action(self) -> bool {
        !matches!(self, OperationKind::Scan)
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown operation kind: {0}")]
pub struct UnknownKind(pub String);

impl FromStr for OperationKind {
    type Err = UnknownKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        OperationKind::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| UnknownKind(s.to_string()))
    }
}

/// Snapshot of one operation's progress as seen by pollers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationStatus {
    pub kind: OperationKind,
    pub done: bool,
    pub error: Option<String>,
    /// Percentage in 0..=100, non-decreasing within one run
    pub progress: u8,
    pub message: String,
    pub affected_count: usize,
    pub current_index: usize,
    pub total: usize,
}

impl OperationStatus {
    /// Status of a kind that has never been started
    pub fn idle(kind: OperationKind) -> Self {
        Self {
            kind,
            done: false,
            error: None,
            progress: 0,
            message: "Ready".to_string(),
            affected_count: 0,
            current_index: 0,
            total: 0,
        }
    }

    /// Fresh status for a run that is about to begin
    pub fn starting(kind: OperationKind) -> Self {
        Self {
            message: "Starting...".to_string(),
            ..Self::idle(kind)
        }
    }
}
