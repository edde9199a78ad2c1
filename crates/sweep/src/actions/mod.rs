//! Scans and bulk mailbox actions

mod handler;
mod operations;
mod unsubscribe;

pub use handler::{ActionHandler, LabelOverview, StartError, validate_senders};
pub use operations::{
    RunSettings, SenderAction, SenderDeletion, UnsubscribeTarget, run_download, run_scan, run_sender_action,
    run_unsubscribe, trash_scanned_sender,
};
pub use unsubscribe::{
    HttpUnsubscriber, LinkKind, UnsubscribeClient, UnsubscribeResult, check_link, ensure_public_target,
};
