//! Per-client request rate limits
//!
//! Each endpoint falls into a class with its own budget per minute. Budgets
//! are tracked per class and client address over a sliding window.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tiny_http::Method;

const WINDOW: Duration = Duration::from_secs(60);

/// Endpoint class sharing one budget
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RateClass {
    /// Status polls and other reads
    Status,
    /// Label changes, unsubscribe, downloads
    Action,
    /// Sign in, sign out, auth checks
    Auth,
    /// Scans and bulk mailbox mutations
    Heavy,
}

impl RateClass {
    /// Requests allowed per minute
    pub fn limit(self) -> usize {
        match self {
            RateClass::Status => 120,
            RateClass::Action => 30,
            RateClass::Auth => 10,
            RateClass::Heavy => 10,
        }
    }

    pub fn for_request(method: &Method, path: &str) -> Self {
        match path {
            "/api/sign-in" | "/api/sign-out" | "/api/auth-status" => RateClass::Auth,
            "/api/scan" | "/api/mark-read" | "/api/archive" | "/api/delete" | "/api/delete-emails"
                if *method == Method::Post =>
            {
                RateClass::Heavy
            }
            _ if *method == Method::Get => RateClass::Status,
            _ => RateClass::Action,
        }
    }
}

/// Sliding-window counter keyed by class and client address
pub struct RateLimiter {
    hits: Mutex<HashMap<(RateClass, IpAddr), Vec<Instant>>>,
    window: Duration,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(WINDOW)
    }
}

impl RateLimiter {
    pub fn new(window: Duration) -> Self {
        Self {
            hits: Mutex::new(HashMap::new()),
            window,
        }
    }

    /// Record a request; `Err` carries the seconds until a slot frees up
    pub fn check(&self, class: RateClass, client: IpAddr) -> Result<(), u64> {
        self.check_at(class, client, Instant::now())
    }

    fn check_at(&self, class: RateClass, client: IpAddr, now: Instant) -> Result<(), u64> {
        let mut hits = self.hits.lock().unwrap_or_else(|e| e.into_inner());
        let window = self.window;
        let stamps = hits.entry((class, client)).or_default();
        stamps.retain(|t| now.duration_since(*t) < window);

        if stamps.len() >= class.limit() {
            let oldest = stamps.first().copied().unwrap_or(now);
            let wait = window.saturating_sub(now.duration_since(oldest));
            return Err(wait.as_secs().max(1));
        }
        stamps.push(now);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    const CLIENT: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

    #[test]
    fn test_classes() {
        assert_eq!(RateClass::for_request(&Method::Post, "/api/scan"), RateClass::Heavy);
        assert_eq!(RateClass::for_request(&Method::Post, "/api/delete-emails"), RateClass::Heavy);
        assert_eq!(RateClass::for_request(&Method::Post, "/api/apply-label"), RateClass::Action);
        assert_eq!(RateClass::for_request(&Method::Post, "/api/download-emails"), RateClass::Action);
        assert_eq!(RateClass::for_request(&Method::Delete, "/api/labels/Label_1"), RateClass::Action);
        assert_eq!(RateClass::for_request(&Method::Get, "/api/auth-status"), RateClass::Auth);
        assert_eq!(RateClass::for_request(&Method::Get, "/api/scan/status"), RateClass::Status);
        assert_eq!(RateClass::for_request(&Method::Get, "/api/labels"), RateClass::Status);
    }

    #[test]
    fn test_limit_per_class_and_client() {
        let limiter = RateLimiter::default();
        let now = Instant::now();

        for _ in 0..10 {
            assert_eq!(limiter.check_at(RateClass::Heavy, CLIENT, now), Ok(()));
        }
        assert_eq!(limiter.check_at(RateClass::Heavy, CLIENT, now), Err(60));

        // Other classes and other clients keep their own budget
        assert_eq!(limiter.check_at(RateClass::Status, CLIENT, now), Ok(()));
        let other = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2));
        assert_eq!(limiter.check_at(RateClass::Heavy, other, now), Ok(()));
    }

    #[test]
    fn test_window_slides() {
        let limiter = RateLimiter::default();
        let start = Instant::now();

        for _ in 0..RateClass::Auth.limit() {
            limiter.check_at(RateClass::Auth, CLIENT, start).unwrap();
        }
        let later = start + Duration::from_secs(45);
        assert_eq!(limiter.check_at(RateClass::Auth, CLIENT, later), Err(15));

        let after = start + WINDOW;
        assert_eq!(limiter.check_at(RateClass::Auth, CLIENT, after), Ok(()));
    }
}
