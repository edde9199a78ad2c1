//! Blocking HTTP front end

use anyhow::{Result, anyhow};
use log::{debug, error, info, warn};
use std::io::Read;
use std::time::Instant;
use tiny_http::{Header, Request, Response, Server};

use crate::limits::{RateClass, RateLimiter};
use crate::routes::{self, ApiResponse};
use sweep::ActionHandler;

/// Largest request body accepted
const MAX_BODY_BYTES: u64 = 1024 * 1024;

/// Bind `addr` and serve requests on `threads` accept loops until the process exits
pub fn serve(handler: &ActionHandler, addr: &str, threads: usize) -> Result<()> {
    let server = Server::http(addr).map_err(|e| anyhow!("Failed to bind {}: {}", addr, e))?;
    info!("Listening on http://{}", addr);
    let limiter = RateLimiter::default();

    std::thread::scope(|scope| {
        for _ in 0..threads.max(1) {
            scope.spawn(|| accept_loop(&server, handler, &limiter));
        }
    });
    Ok(())
}

fn accept_loop(server: &Server, handler: &ActionHandler, limiter: &RateLimiter) {
    loop {
        match server.recv() {
            Ok(request) => handle(request, handler, limiter),
            Err(e) => {
                error!("Failed to accept request: {}", e);
                return;
            }
        }
    }
}

fn handle(mut request: Request, handler: &ActionHandler, limiter: &RateLimiter) {
    let started = Instant::now();
    let method = request.method().clone();
    let url = request.url().to_string();
    let path = url.split('?').next().unwrap_or_default().trim_end_matches('/');

    let class = RateClass::for_request(&method, path);
    let client = request.remote_addr().ip();
    if let Err(retry_after) = limiter.check(class, client) {
        warn!("Rate limited {} {} from {}", method, url, client);
        let response = ApiResponse::error(429, "Too many requests, please slow down");
        let mut http = to_http(response);
        if let Ok(header) = Header::from_bytes(&b"Retry-After"[..], retry_after.to_string().as_bytes()) {
            http = http.with_header(header);
        }
        if let Err(e) = request.respond(http) {
            warn!("Failed to send response for {} {}: {}", method, url, e);
        }
        return;
    }

    let response = match read_body(&mut request) {
        Ok(body) => routes::route(handler, &method, &url, &body),
        Err(response) => response,
    };

    debug!("{} {} -> {} in {:?}", method, url, response.status, started.elapsed());
    if response.status >= 500 {
        warn!("{} {} failed: {}", method, url, response.body);
    }

    if let Err(e) = request.respond(to_http(response)) {
        warn!("Failed to send response for {} {}: {}", method, url, e);
    }
}

fn read_body(request: &mut Request) -> Result<Vec<u8>, ApiResponse> {
    let mut body = Vec::new();
    request
        .as_reader()
        .take(MAX_BODY_BYTES + 1)
        .read_to_end(&mut body)
        .map_err(|e| ApiResponse::error(400, format!("Failed to read body: {}", e)))?;
    if body.len() as u64 > MAX_BODY_BYTES {
        return Err(ApiResponse::error(413, "Request body too large"));
    }
    Ok(body)
}

fn to_http(response: ApiResponse) -> Response<std::io::Cursor<Vec<u8>>> {
    let Some(attachment) = response.attachment else {
        let http = Response::from_string(response.body.to_string()).with_status_code(response.status);
        return with_headers(http, &[("Content-Type", "application/json".to_string())]);
    };

    let http = Response::from_string(attachment.content).with_status_code(response.status);
    with_headers(
        http,
        &[
            ("Content-Type", "text/csv; charset=utf-8".to_string()),
            (
                "Content-Disposition",
                format!("attachment; filename={}", attachment.filename),
            ),
        ],
    )
}

fn with_headers(
    mut http: Response<std::io::Cursor<Vec<u8>>>,
    headers: &[(&str, String)],
) -> Response<std::io::Cursor<Vec<u8>>> {
    for (name, value) in headers {
        match Header::from_bytes(name.as_bytes(), value.as_bytes()) {
            Ok(header) => http = http.with_header(header),
            Err(()) => warn!("Dropping invalid {} header", name),
        }
    }
    http
}
