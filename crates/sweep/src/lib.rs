//! Sweep crate - bulk mailbox hygiene over the Gmail API
//!
//! This crate provides:
//! - Shared job state and a worker pool for long-running operations
//! - A Gmail search-query builder with safe escaping
//! - A chunked batch executor with retry and rate-limit backoff
//! - Sender aggregation for scan results
//! - Gmail OAuth, REST client and multipart batch codec
//! - Action handlers for scans, bulk label changes, trash, unsubscribe,
//!   label management and CSV export
//!
//! The core only talks to the provider through [`gmail::MailApi`] and
//! [`gmail::ClientProvider`], so everything above the client can be driven
//! by an in-process fake.

pub mod actions;
pub mod batch;
pub mod config;
pub mod export;
pub mod gmail;
pub mod jobs;
pub mod models;
pub mod query;
pub mod scan;

pub use actions::{ActionHandler, HttpUnsubscriber, StartError, UnsubscribeClient};
pub use batch::{BatchExecutor, BatchResult, BatchRun, ItemOp, RetryPolicy};
pub use config::{GmailCredentials, SweepConfig};
pub use gmail::{ApiError, ClientProvider, GmailAuth, GmailClient, GmailSession, MailApi};
pub use jobs::{JobContext, JobState, StatusUpdate, TaskRunner};
pub use models::{EmailAddress, MessageId, OperationKind, OperationStatus, SenderSummary};
pub use query::{Category, Filter, build_query};
pub use scan::{SenderAggregator, aggregate};
