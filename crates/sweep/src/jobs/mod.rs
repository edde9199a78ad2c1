//! Background job bookkeeping
//!
//! [`JobState`] holds the pollable status of every operation kind plus the
//! latest scan results. [`TaskRunner`] executes operations on a worker pool
//! and guarantees at most one in-flight run per kind.

mod runner;
mod state;

pub use runner::{JobContext, SubmitError, TaskRunner};
pub use state::{JobState, StatusUpdate};
