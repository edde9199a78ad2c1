//! Gmail OAuth2 authentication
//!
//! Implements the installed-app authorization code flow. The interactive
//! part ([`GmailAuth::sign_in`]) is kept apart from token retrieval so
//! background work never blocks on a browser prompt.

use anyhow::{Context, Result};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{BufRead, BufReader, ErrorKind, Write};
use std::net::TcpListener;
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};
use ureq::Agent;

use crate::batch::random_u64;
use crate::config::GmailCredentials;

/// Seconds of remaining validity required before a cached token is reused
const EXPIRY_MARGIN_SECS: i64 = 300;

/// Default bound on token endpoint calls
const TOKEN_TIMEOUT: Duration = Duration::from_secs(30);

/// How long the loopback listener waits for the browser redirect
const CALLBACK_TIMEOUT: Duration = Duration::from_secs(300);

/// OAuth2 configuration and token management for Gmail
pub struct GmailAuth {
    client_id: String,
    client_secret: String,
    token_path: PathBuf,
    token_url: String,
    agent: Agent,
    cached: Mutex<Option<StoredToken>>,
}

/// Stored token data
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredToken {
    access_token: String,
    refresh_token: Option<String>,
    expires_at: Option<i64>,
}

impl StoredToken {
    fn is_fresh(&self, now: i64) -> bool {
        self.expires_at
            .is_some_and(|expires_at| expires_at > now + EXPIRY_MARGIN_SECS)
    }
}

/// Token response from Google
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: Option<String>,
    expires_in: Option<u64>,
}

impl GmailAuth {
    const AUTH_URL: &'static str = "https://accounts.google.com/o/oauth2/v2/auth";
    const TOKEN_URL: &'static str = "https://oauth2.googleapis.com/token";

    /// Modify allows reading, relabeling and trashing; nothing more is needed
    const GMAIL_MODIFY_SCOPE: &'static str = "https://www.googleapis.com/auth/gmail.modify";

    /// Port range to try for the loopback callback server
    const PORT_RANGE_START: u16 = 8080;
    const PORT_RANGE_END: u16 = 8090;

    /// Create an authenticator storing tokens in the default config directory
    pub fn new(credentials: &GmailCredentials) -> Result<Self> {
        let token_path =
            config::config_path("gmail-tokens.json").context("Could not determine config directory")?;
        Ok(Self::with_token_path(credentials, token_path))
    }

    /// Create an authenticator storing tokens at `token_path`
    pub fn with_token_path(credentials: &GmailCredentials, token_path: PathBuf) -> Self {
        Self {
            client_id: credentials.client_id.clone(),
            client_secret: credentials.client_secret.clone(),
            token_path,
            token_url: Self::TOKEN_URL.to_string(),
            agent: token_agent(TOKEN_TIMEOUT),
            cached: Mutex::new(None),
        }
    }

    /// Bound every token endpoint call by `timeout`
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.agent = token_agent(timeout);
        self
    }

    /// Get a valid access token without user interaction
    ///
    /// Returns the cached token while it stays valid, otherwise refreshes it.
    /// Fails when no stored credential exists or the refresh is rejected.
    /// The cache lock is not held during the refresh call.
    pub fn access_token(&self) -> Result<String> {
        let token = {
            let mut cached = self.lock_cache();
            if cached.is_none() {
                *cached = self.load_token().ok();
            }
            cached
                .clone()
                .context("No stored credentials; sign in first")?
        };

        let now = chrono::Utc::now().timestamp();
        if token.is_fresh(now) {
            return Ok(token.access_token);
        }

        let refresh_token = token
            .refresh_token
            .context("Access token expired and no refresh token is stored")?;

        debug!("Refreshing Gmail access token");
        let response = self.refresh_access_token(&refresh_token)?;

        let mut cached = self.lock_cache();
        if cached.is_none() {
            anyhow::bail!("Signed out while the access token was refreshing");
        }
        let stored = self.save_token_response(&response)?;
        let access_token = stored.access_token.clone();
        *cached = Some(stored);
        Ok(access_token)
    }

    /// Whether a token file exists (it may still need a refresh)
    pub fn has_stored_token(&self) -> bool {
        self.token_path.exists()
    }

    /// Run the interactive authorization code flow and persist the result
    ///
    /// Blocks until the browser redirects back to the loopback listener, or
    /// fails once the callback wait times out.
    pub fn sign_in(&self) -> Result<()> {
        let (listener, port) = self.start_local_server()?;
        let redirect_uri = format!("http://localhost:{}", port);
        let state = format!("{:016x}", random_u64());

        let auth_url = format!(
            "{}?client_id={}&redirect_uri={}&response_type=code&scope={}&access_type=offline&prompt=consent&state={}",
            Self::AUTH_URL,
            urlencoding::encode(&self.client_id),
            urlencoding::encode(&redirect_uri),
            urlencoding::encode(Self::GMAIL_MODIFY_SCOPE),
            state,
        );

        info!("Opening browser for Gmail authentication");
        info!("If the browser doesn't open, visit: {}", auth_url);
        if let Err(e) = open::that(&auth_url) {
            warn!("Failed to open browser: {}. Please open the URL manually.", e);
        }

        let code = wait_for_callback(listener, &state, CALLBACK_TIMEOUT)?;

        debug!("Exchanging authorization code for tokens");
        let mut response = self
            .agent
            .post(&self.token_url)
            .send_form([
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("code", code.as_str()),
                ("grant_type", "authorization_code"),
                ("redirect_uri", redirect_uri.as_str()),
            ])
            .context("Failed to exchange authorization code")?;

        let token: TokenResponse = response
            .body_mut()
            .read_json()
            .context("Failed to parse token response")?;

        let stored = self.save_token_response(&token)?;
        *self.lock_cache() = Some(stored);
        info!("Gmail authentication successful");
        Ok(())
    }

    /// Clear stored tokens
    pub fn logout(&self) -> Result<()> {
        *self.lock_cache() = None;
        if self.token_path.exists() {
            fs::remove_file(&self.token_path).context("Failed to remove token file")?;
        }
        info!("Signed out of Gmail");
        Ok(())
    }

    fn lock_cache(&self) -> MutexGuard<'_, Option<StoredToken>> {
        self.cached.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Start a local TCP server on an available port
    fn start_local_server(&self) -> Result<(TcpListener, u16)> {
        for port in Self::PORT_RANGE_START..=Self::PORT_RANGE_END {
            if let Ok(listener) = TcpListener::bind(format!("127.0.0.1:{}", port)) {
                return Ok((listener, port));
            }
        }
        anyhow::bail!(
            "Could not bind to any port in range {}-{}",
            Self::PORT_RANGE_START,
            Self::PORT_RANGE_END
        )
    }

    /// Refresh an access token using a refresh token
    fn refresh_access_token(&self, refresh_token: &str) -> Result<TokenResponse> {
        let response = self
            .agent
            .post(&self.token_url)
            .send_form([
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("refresh_token", refresh_token),
                ("grant_type", "refresh_token"),
            ])
            .context("Failed to refresh access token")?;

        let mut token: TokenResponse = response
            .into_body()
            .read_json()
            .context("Failed to parse refresh token response")?;

        // Google omits the refresh token on refresh
        if token.refresh_token.is_none() {
            token.refresh_token = Some(refresh_token.to_string());
        }

        Ok(token)
    }

    fn load_token(&self) -> Result<StoredToken> {
        let content = fs::read_to_string(&self.token_path)?;
        let token: StoredToken = serde_json::from_str(&content)?;
        Ok(token)
    }

    fn save_token_response(&self, token: &TokenResponse) -> Result<StoredToken> {
        let stored = StoredToken {
            access_token: token.access_token.clone(),
            refresh_token: token.refresh_token.clone(),
            expires_at: token
                .expires_in
                .map(|d| chrono::Utc::now().timestamp() + d as i64),
        };
        config::save_json_file(&self.token_path, &stored).context("Failed to save token")?;
        Ok(stored)
    }
}

fn token_agent(timeout: Duration) -> Agent {
    let config = Agent::config_builder().timeout_global(Some(timeout)).build();
    Agent::new_with_config(config)
}

/// Wait up to `timeout` for the OAuth redirect and extract the authorization code
fn wait_for_callback(listener: TcpListener, expected_state: &str, timeout: Duration) -> Result<String> {
    listener
        .set_nonblocking(true)
        .context("Failed to configure callback listener")?;
    let deadline = Instant::now() + timeout;

    let mut stream = loop {
        match listener.accept() {
            Ok((stream, _)) => break stream,
            Err(e) if e.kind() == ErrorKind::WouldBlock => {
                if Instant::now() >= deadline {
                    anyhow::bail!("Timed out after {:?} waiting for the OAuth callback", timeout);
                }
                std::thread::sleep(Duration::from_millis(100));
            }
            Err(e) => return Err(e).context("Failed to accept connection"),
        }
    };
    stream
        .set_nonblocking(false)
        .and_then(|()| stream.set_read_timeout(Some(Duration::from_secs(10))))
        .context("Failed to configure callback connection")?;

    let mut reader = BufReader::new(&stream);
    let mut request_line = String::new();
    reader
        .read_line(&mut request_line)
        .context("Failed to read request")?;

    // GET /?code=AUTH_CODE&state=...&scope=... HTTP/1.1
    let target = request_line.split_whitespace().nth(1).unwrap_or("/");
    let code = query_param(target, "code");
    let error = query_param(target, "error");
    let state_ok = query_param(target, "state").as_deref() == Some(expected_state);

    let (status, body) = if code.is_some() && state_ok {
        ("200 OK", "Authentication successful! You can close this window.")
    } else {
        ("400 Bad Request", "Authentication failed. Please try again.")
    };
    let response = format!(
        "HTTP/1.1 {}\r\nContent-Type: text/html\r\nConnection: close\r\n\r\n<html><body><h1>{}</h1></body></html>",
        status, body
    );
    stream.write_all(response.as_bytes()).ok();

    if let Some(err) = error {
        anyhow::bail!("OAuth error: {}", err);
    }
    if !state_ok {
        anyhow::bail!("OAuth state mismatch");
    }
    code.context("No authorization code received")
}

/// Percent-decoded value of `name` in a request target like `/?a=1&b=2`
fn query_param(target: &str, name: &str) -> Option<String> {
    let url = url::Url::parse(&format!("http://localhost{}", target)).ok()?;
    url.query_pairs()
        .find(|(key, _)| key == name)
        .map(|(_, value)| value.into_owned())
}
