//! Minimal HTTP/1.0 request parsing and static-file responses.
//!
//! Request-line + headers only; no chunked encoding, no persistent
//! connections, no pipelining. Every response carries
//! `Connection: close`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// A parsed request: method, path, version, headers.
#[derive(Debug)]
pub struct Request {
    pub method: String,
    pub path: String,
    pub version: String,
    pub headers: HashMap<String, String>,
}

impl Request {
    /// Parse the request head from raw bytes. `None` when the
    /// request line is absent or malformed.
    pub fn parse(raw: &[u8]) -> Option<Request> {
        let text = String::from_utf8_lossy(raw);
        let mut lines = text.split("\r\n");
        let request_line = lines.next()?;
        let mut parts = request_line.split_whitespace();
        let method = parts.next()?.to_string();
        let path = parts.next()?.to_string();
        let version = parts.next().unwrap_or("HTTP/1.0").to_string();

        let mut headers = HashMap::new();
        for line in lines {
            if line.is_empty() {
                break;
            }
            if let Some((key, value)) = line.split_once(": ") {
                headers.insert(key.to_string(), value.to_string());
            }
        }
        Some(Request {
            method,
            path,
            version,
            headers,
        })
    }
}

/// Map a request path to a file under `root`. Rejects traversal.
pub fn resolve_path(root: &Path, request_path: &str) -> Option<PathBuf> {
    // Strip the query string, nothing dynamic is served.
    let path = request_path.split('?').next().unwrap_or(request_path);
    if path.contains("..") {
        return None;
    }
    let relative = if path == "/" {
        "index.html"
    } else {
        path.trim_start_matches('/')
    };
    Some(root.join(relative))
}

fn content_type(path: &Path) -> &'static str {
    match path.extension().and_then(|e| e.to_str()) {
        Some("html") | Some("htm") => "text/html; charset=utf-8",
        Some("css") => "text/css",
        Some("js") => "application/javascript",
        Some("json") => "application/json",
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("svg") => "image/svg+xml",
        Some("txt") => "text/plain; charset=utf-8",
        _ => "application/octet-stream",
    }
}

fn response_head(status: &str, kind: &str, length: usize) -> String {
    format!(
        "HTTP/1.0 {}\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        status, kind, length
    )
}

/// A full response for a file hit.
pub fn ok_response(path: &Path, body: &[u8]) -> Vec<u8> {
    let mut out = response_head("200 OK", content_type(path), body.len()).into_bytes();
    out.extend_from_slice(body);
    out
}

pub fn not_found_response() -> Vec<u8> {
    let body = b"<html><body><h1>404 Not Found</h1></body></html>";
    let mut out =
        response_head("404 Not Found", "text/html; charset=utf-8", body.len()).into_bytes();
    out.extend_from_slice(body);
    out
}

pub fn method_not_allowed_response() -> Vec<u8> {
    let body = b"<html><body><h1>405 Method Not Allowed</h1></body></html>";
    let mut out = response_head(
        "405 Method Not Allowed",
        "text/html; charset=utf-8",
        body.len(),
    )
    .into_bytes();
    out.extend_from_slice(body);
    out
}
