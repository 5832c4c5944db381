//! Request and response descriptors carried across the simulated network.
//!
//! # Design
//! Both descriptors are plain data. A `RequestDescriptor` is built once by
//! `FakeRequest::send` and never mutated afterwards; a `ResponseDescriptor` is
//! produced exactly once per request, either by a server handler or by the
//! transport itself when a leg fails.
//!
//! Request headers are a map (a later `set_request_header` overwrites an
//! earlier one). Response headers are an ordered list of pairs so that
//! `Set-Cookie` can appear more than once. Header names are compared
//! case-sensitively.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

/// Outgoing request headers, overwrite-by-key.
pub type Headers = BTreeMap<String, String>;

pub const COOKIE: &str = "Cookie";
pub const SET_COOKIE: &str = "Set-Cookie";
pub const CONTENT_TYPE: &str = "Content-Type";
pub const CONTENT_TYPE_JSON: &str = "application/json";
/// Explicit user id header accepted by the servers alongside the session cookie.
pub const USER_ID: &str = "UserId";

/// Status codes used by the simulated stack.
pub mod status {
    pub const NETWORK_ERROR: u16 = 0;
    pub const OK: u16 = 200;
    pub const CREATED: u16 = 201;
    pub const BAD_REQUEST: u16 = 400;
    pub const UNAUTHORIZED: u16 = 401;
    pub const NOT_FOUND: u16 = 404;
    pub const CONFLICT: u16 = 409;
    pub const INTERNAL_ERROR: u16 = 500;
}

/// Human-readable text for a status code, `"Unknown"` outside the table.
pub fn status_text(code: u16) -> &'static str {
    match code {
        status::OK => "OK",
        status::CREATED => "Created",
        status::BAD_REQUEST => "Bad Request",
        status::UNAUTHORIZED => "Unauthorized",
        status::NOT_FOUND => "Not Found",
        status::CONFLICT => "Conflict",
        status::INTERNAL_ERROR => "Internal Server Error",
        _ => "Unknown",
    }
}

/// HTTP method for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Delete,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Delete => "DELETE",
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a method string is not one of GET/POST/PUT/DELETE.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unsupported HTTP method: {0}")]
pub struct UnknownMethod(pub String);

impl FromStr for HttpMethod {
    type Err = UnknownMethod;

    /// Case-insensitive, so `"post"` opens the same request as `"POST"`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Ok(HttpMethod::Get),
            "POST" => Ok(HttpMethod::Post),
            "PUT" => Ok(HttpMethod::Put),
            "DELETE" => Ok(HttpMethod::Delete),
            _ => Err(UnknownMethod(s.to_string())),
        }
    }
}

/// One request attempt as it travels through the network.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestDescriptor {
    pub method: HttpMethod,
    pub url: String,
    pub headers: Headers,
    pub body: Option<String>,
    pub issued_at: Instant,
}

impl RequestDescriptor {
    /// The URL without its query component.
    pub fn path(&self) -> &str {
        self.url.split_once('?').map_or(self.url.as_str(), |(path, _)| path)
    }

    /// The raw query string, if the URL carries one.
    pub fn query(&self) -> Option<&str> {
        self.url.split_once('?').map(|(_, query)| query)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }
}

/// A response produced by a handler or synthesized by the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseDescriptor {
    pub status: u16,
    pub status_text: String,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl ResponseDescriptor {
    /// Build a response whose `status_text` comes from the status table.
    pub fn new(status: u16, headers: Vec<(String, String)>, body: impl Into<String>) -> Self {
        Self {
            status,
            status_text: status_text(status).to_string(),
            headers,
            body: body.into(),
        }
    }

    /// Every value recorded under `name`, in order.
    pub fn header_values<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.headers
            .iter()
            .filter(move |(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    /// First value recorded under `name`.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}
