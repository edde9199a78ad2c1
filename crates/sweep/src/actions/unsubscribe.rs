//! Visiting List-Unsubscribe links
//!
//! Only http(s) targets are visited. `mailto:` links need the user's mail
//! client, and targets resolving to loopback, private, link-local or
//! unspecified addresses are refused before any request is made.

use log::{debug, info, warn};
use serde::Serialize;
use std::net::{IpAddr, ToSocketAddrs};
use std::time::Duration;
use ureq::Agent;
use url::Url;

use crate::scan::is_http;

/// Longest failure message reported back to the UI
const MAX_MESSAGE_LEN: usize = 100;

/// Body for RFC 8058 one-click unsubscribe
const ONE_CLICK_BODY: &str = "List-Unsubscribe=One-Click";

/// Kind of link that was handled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkKind {
    Http,
    Mailto,
    Missing,
}

/// Outcome of unsubscribing from one sender
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnsubscribeResult {
    pub success: bool,
    pub kind: LinkKind,
    pub message: String,
}

impl UnsubscribeResult {
    fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            kind: LinkKind::Http,
            message: message.into(),
        }
    }

    fn failed(kind: LinkKind, message: impl Into<String>) -> Self {
        Self {
            success: false,
            kind,
            message: truncate(message.into()),
        }
    }
}

/// Follows an unsubscribe link on the sender's behalf
pub trait UnsubscribeClient: Send + Sync {
    fn unsubscribe(&self, link: Option<&str>, one_click: bool) -> UnsubscribeResult;
}

/// [`UnsubscribeClient`] issuing real HTTP requests
pub struct HttpUnsubscriber {
    agent: Agent,
}

impl HttpUnsubscriber {
    const USER_AGENT: &'static str = concat!("sweep/", env!("CARGO_PKG_VERSION"));

    pub fn new(timeout: Duration) -> Self {
        let config = Agent::config_builder()
            .timeout_global(Some(timeout))
            .http_status_as_error(false)
            .max_redirects(0)
            .build();
        Self {
            agent: Agent::new_with_config(config),
        }
    }

    fn post(&self, url: &str, one_click: bool) -> Result<u16, String> {
        let request = self.agent.post(url).header("User-Agent", Self::USER_AGENT);
        let response = if one_click {
            request
                .header("Content-Type", "application/x-www-form-urlencoded")
                .send(ONE_CLICK_BODY)
        } else {
            request.send_empty()
        };
        response
            .map(|r| r.status().as_u16())
            .map_err(|e| e.to_string())
    }

    fn get(&self, url: &str) -> Result<u16, String> {
        self.agent
            .get(url)
            .header("User-Agent", Self::USER_AGENT)
            .call()
            .map(|r| r.status().as_u16())
            .map_err(|e| e.to_string())
    }
}

impl UnsubscribeClient for HttpUnsubscriber {
    fn unsubscribe(&self, link: Option<&str>, one_click: bool) -> UnsubscribeResult {
        let url = match check_link(link) {
            Ok(url) => url,
            Err(result) => return result,
        };
        info!("Visiting unsubscribe link on {}", url.host_str().unwrap_or("?"));
        visit(
            || self.post(url.as_str(), one_click),
            || self.get(url.as_str()),
        )
    }
}

/// Validate `link` into a URL that is safe to request
pub fn check_link(link: Option<&str>) -> Result<Url, UnsubscribeResult> {
    let link = link.map(str::trim).filter(|l| !l.is_empty()).ok_or_else(|| {
        UnsubscribeResult::failed(LinkKind::Missing, "No unsubscribe link provided")
    })?;

    if link.to_ascii_lowercase().starts_with("mailto:") {
        return Err(UnsubscribeResult::failed(
            LinkKind::Mailto,
            "Unsubscribe requires sending an email; open the link in your email client",
        ));
    }
    if !is_http(link) {
        return Err(UnsubscribeResult::failed(LinkKind::Http, "Unsupported unsubscribe link"));
    }

    let url = Url::parse(link)
        .map_err(|e| UnsubscribeResult::failed(LinkKind::Http, format!("Invalid link: {}", e)))?;
    ensure_public_target(&url)
        .map_err(|e| UnsubscribeResult::failed(LinkKind::Http, format!("Security Error: {}", e)))?;
    Ok(url)
}

/// Reject URLs whose host is, or resolves to, a non-public address
pub fn ensure_public_target(url: &Url) -> Result<(), String> {
    let host = url.host().ok_or_else(|| "link has no host".to_string())?;
    let addresses: Vec<IpAddr> = match host {
        url::Host::Ipv4(ip) => vec![IpAddr::V4(ip)],
        url::Host::Ipv6(ip) => vec![IpAddr::V6(ip)],
        url::Host::Domain(domain) => {
            let port = url.port_or_known_default().unwrap_or(443);
            (domain, port)
                .to_socket_addrs()
                .map_err(|e| format!("could not resolve {}: {}", domain, e))?
                .map(|addr| addr.ip())
                .collect()
        }
    };

    if addresses.is_empty() {
        return Err("host resolved to no addresses".to_string());
    }
    match addresses.into_iter().find(is_restricted) {
        Some(ip) => Err(format!("Blocked restricted IP: {}", ip)),
        None => Ok(()),
    }
}

fn is_restricted(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            v4.is_loopback()
                || v4.is_private()
                || v4.is_link_local()
                || v4.is_unspecified()
                || v4.is_broadcast()
                // 100.64.0.0/10 carrier-grade NAT
                || (v4.octets()[0] == 100 && (v4.octets()[1] & 0xc0) == 64)
        }
        IpAddr::V6(v6) => {
            if let Some(mapped) = v6.to_ipv4_mapped() {
                return is_restricted(&IpAddr::V4(mapped));
            }
            let first = v6.segments()[0];
            v6.is_loopback()
                || v6.is_unspecified()
                || (first & 0xfe00) == 0xfc00 // unique local
                || (first & 0xffc0) == 0xfe80 // link local
        }
    }
}

/// POST first, falling back to GET when the POST is refused or fails
fn visit(
    post: impl FnOnce() -> Result<u16, String>,
    get: impl FnOnce() -> Result<u16, String>,
) -> UnsubscribeResult {
    match post() {
        Ok(status) if (200..300).contains(&status) => {
            return UnsubscribeResult::ok("Unsubscribed successfully");
        }
        Ok(status) => debug!("Unsubscribe POST returned {}, trying GET", status),
        Err(e) => debug!("Unsubscribe POST failed ({}), trying GET", e),
    }

    match get() {
        Ok(status) if (200..400).contains(&status) => {
            UnsubscribeResult::ok("Unsubscribe link opened; confirmation may be needed")
        }
        Ok(status) => {
            warn!("Unsubscribe GET returned {}", status);
            UnsubscribeResult::failed(LinkKind::Http, format!("Failed to unsubscribe: status {}", status))
        }
        Err(e) => {
            warn!("Unsubscribe GET failed: {}", e);
            UnsubscribeResult::failed(LinkKind::Http, format!("Failed to unsubscribe: {}", e))
        }
    }
}

fn truncate(message: String) -> String {
    if message.chars().count() <= MAX_MESSAGE_LEN {
        return message;
    }
    let mut cut: String = message.chars().take(MAX_MESSAGE_LEN - 3).collect();
    cut.push_str("...");
    cut
}
