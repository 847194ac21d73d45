//! Minimal HTTP/1.x request parsing and response framing
//!
//! Only what the device serves: `GET` on a fixed set of paths, one request per
//! connection, `Connection: close` on every response.

use alloc::string::String;
use alloc::vec::Vec;
use core::fmt::Write;

use serde::Serialize;

use crate::error::ProtocolFault;
use crate::storage::ExportFormat;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Live,
    History,
    Stats,
    Health,
    Export(ExportFormat),
    Test,
}

impl Route {
    /// Match a request target, ignoring any query string.
    pub fn from_path(target: &str) -> Option<Self> {
        let path = target.split_once('?').map_or(target, |(path, _)| path);
        match path {
            "/api/live" => Some(Self::Live),
            "/api/history" => Some(Self::History),
            "/api/stats" => Some(Self::Stats),
            "/api/health" => Some(Self::Health),
            "/export.csv" => Some(Self::Export(ExportFormat::Csv)),
            "/export.json" => Some(Self::Export(ExportFormat::Json)),
            "/test" => Some(Self::Test),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Ok,
    BadRequest,
    NotFound,
    MethodNotAllowed,
    HeadersTooLarge,
    InternalError,
    ServiceUnavailable,
    VersionNotSupported,
}

impl Status {
    pub const fn code(self) -> u16 {
        match self {
            Self::Ok => 200,
            Self::BadRequest => 400,
            Self::NotFound => 404,
            Self::MethodNotAllowed => 405,
            Self::HeadersTooLarge => 431,
            Self::InternalError => 500,
            Self::ServiceUnavailable => 503,
            Self::VersionNotSupported => 505,
        }
    }

    pub const fn reason(self) -> &'static str {
        match self {
            Self::Ok => "OK",
            Self::BadRequest => "Bad Request",
            Self::NotFound => "Not Found",
            Self::MethodNotAllowed => "Method Not Allowed",
            Self::HeadersTooLarge => "Request Header Fields Too Large",
            Self::InternalError => "Internal Server Error",
            Self::ServiceUnavailable => "Service Unavailable",
            Self::VersionNotSupported => "HTTP Version Not Supported",
        }
    }
}

impl From<ProtocolFault> for Status {
    fn from(fault: ProtocolFault) -> Self {
        match fault {
            ProtocolFault::NotUtf8 | ProtocolFault::MalformedRequestLine => Self::BadRequest,
            ProtocolFault::NotFound => Self::NotFound,
            ProtocolFault::MethodNotAllowed => Self::MethodNotAllowed,
            ProtocolFault::HeadersTooLarge => Self::HeadersTooLarge,
            ProtocolFault::UnsupportedVersion => Self::VersionNotSupported,
        }
    }
}

/// Sent to a connection beyond the session limit before closing it.
pub const BUSY_RESPONSE: &[u8] = b"HTTP/1.1 503 Service Unavailable\r\n\
Content-Type: text/plain\r\n\
Content-Length: 5\r\n\
Retry-After: 5\r\n\
Connection: close\r\n\
\r\n\
busy\n";

/// Length of the header block including its blank line, once complete.
pub fn find_header_end(buf: &[u8]) -> Option<usize> {
    if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
        return Some(pos + 4);
    }
    buf.windows(2).position(|w| w == b"\n\n").map(|pos| pos + 2)
}

/// Parse the request head (request line plus headers) into a route.
pub fn parse_request(head: &[u8]) -> Result<Route, ProtocolFault> {
    let text = core::str::from_utf8(head).map_err(|_| ProtocolFault::NotUtf8)?;
    let request_line = text.lines().next().unwrap_or("");

    let mut parts = request_line.split_whitespace();
    let (Some(method), Some(target), Some(version), None) = (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(ProtocolFault::MalformedRequestLine);
    };

    if !method.bytes().all(|b| b.is_ascii_uppercase()) || !target.starts_with('/') {
        return Err(ProtocolFault::MalformedRequestLine);
    }
    match version {
        "HTTP/1.0" | "HTTP/1.1" => {}
        v if v.starts_with("HTTP/") => return Err(ProtocolFault::UnsupportedVersion),
        _ => return Err(ProtocolFault::MalformedRequestLine),
    }
    if method != "GET" {
        return Err(ProtocolFault::MethodNotAllowed);
    }

    Route::from_path(target).ok_or(ProtocolFault::NotFound)
}

/// Append a status line and headers. Without `content_length` the body runs
/// until the connection closes.
pub fn write_head(
    out: &mut Vec<u8>,
    status: Status,
    content_type: &str,
    content_length: Option<usize>,
    attachment: Option<&str>,
) {
    let mut head = String::new();
    // Writing to a String cannot fail.
    let _ = write!(
        head,
        "HTTP/1.1 {} {}\r\nContent-Type: {}\r\nCache-Control: no-store\r\nConnection: close\r\n",
        status.code(),
        status.reason(),
        content_type
    );
    if let Some(length) = content_length {
        let _ = write!(head, "Content-Length: {length}\r\n");
    }
    if let Some(name) = attachment {
        let _ = write!(head, "Content-Disposition: attachment; filename=\"{name}\"\r\n");
    }
    head.push_str("\r\n");
    out.extend_from_slice(head.as_bytes());
}

/// Complete response with a body of known length.
pub fn response(status: Status, content_type: &str, body: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(body.len() + 128);
    write_head(&mut out, status, content_type, Some(body.len()), None);
    out.extend_from_slice(body);
    out
}

pub fn json_response(body: &[u8]) -> Vec<u8> {
    response(Status::Ok, "application/json", body)
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    error: u16,
    message: &'a str,
}

/// JSON error body, e.g. `{"error":404,"message":"no such resource"}`.
pub fn error_response(status: Status, message: &str) -> Vec<u8> {
    let body = ErrorBody {
        error: status.code(),
        message,
    };
    match serde_json::to_vec(&body) {
        Ok(json) => response(status, "application/json", &json),
        Err(_) => response(status, "text/plain", status.reason().as_bytes()),
    }
}
