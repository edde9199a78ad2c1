//! Sweep - bulk inbox cleanup over a local JSON API
//!
//! Scans the mailbox, groups messages by sender and runs bulk actions
//! (mark read, archive, trash, label, unsubscribe, export) in the background.

use anyhow::{Context, Result};
use log::{error, info, warn};
use std::sync::Arc;
use sweep::{ActionHandler, GmailAuth, GmailCredentials, GmailSession, HttpUnsubscriber, SweepConfig};

mod limits;
mod routes;
mod server;

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    if let Err(e) = config::init() {
        error!("Failed to initialize config directory: {}", e);
    }

    if let Err(e) = run() {
        error!("{:#}", e);
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let settings = SweepConfig::load().context("Failed to load settings")?;

    let creds = match GmailCredentials::load() {
        Ok(creds) => creds,
        Err(e) => {
            warn!("Gmail credentials not found: {}", e);
            if let Some(path) = GmailCredentials::default_credentials_path() {
                warn!(
                    "To configure Gmail access, either:\n\
                     1. Place your Google OAuth credentials at: {}\n\
                     2. Or set environment variables: GMAIL_CLIENT_ID and GMAIL_CLIENT_SECRET",
                    path.display()
                );
            }
            return Err(e);
        }
    };

    let timeout = settings.request_timeout();
    let auth = GmailAuth::new(&creds)?.with_timeout(timeout);
    if auth.has_stored_token() {
        info!("Found stored Gmail token");
    } else {
        info!("No stored Gmail token; POST /api/sign-in to authorize");
    }

    let provider = Arc::new(GmailSession::new(auth, timeout));
    let unsubscriber = Arc::new(HttpUnsubscriber::new(timeout));

    let bind_addr = settings.bind_addr.clone();
    let http_threads = settings.http_threads;
    let handler = ActionHandler::new(settings, provider, unsubscriber)?;

    server::serve(&handler, &bind_addr, http_threads)
}
