//! Request and response envelopes exchanged with the backend.
//!
//! # Design
//! These types describe one round-trip as plain data. `Request` serializes to
//! the exact frame the backend expects (`body`, `headers`, `url`, `method`, in
//! that order). `ApiResponse` is the typed view of a decoded response frame:
//! a status code at or above 400 is a business failure, not an error, so it
//! is carried as `ApiResponse::Failure` rather than through `SendError`.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Status codes at or above this value are business failures.
pub const FAILURE_STATUS: u16 = 400;

/// Request method carried in the `method` field of a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
    Patch,
}

impl Method {
    pub fn as_str(self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
            Method::Patch => "PATCH",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when text does not name one of the five supported methods.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown request method: {0}")]
pub struct UnknownMethod(pub String);

impl FromStr for Method {
    type Err = UnknownMethod;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "GET" => Ok(Method::Get),
            "POST" => Ok(Method::Post),
            "PUT" => Ok(Method::Put),
            "DELETE" => Ok(Method::Delete),
            "PATCH" => Ok(Method::Patch),
            _ => Err(UnknownMethod(s.to_string())),
        }
    }
}

/// One request frame.
///
/// Field order matters: serde emits struct fields in declaration order and
/// the backend has only ever seen `body, headers, url, method`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    #[serde(default)]
    pub body: Map<String, Value>,
    #[serde(default)]
    pub headers: Map<String, Value>,
    pub url: String,
    pub method: Method,
}

impl Request {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            body: Map::new(),
            headers: Map::new(),
            url: url.into(),
            method,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::Get, url)
    }

    pub fn post(url: impl Into<String>) -> Self {
        Self::new(Method::Post, url)
    }

    pub fn with_body(mut self, body: Map<String, Value>) -> Self {
        self.body = body;
        self
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    pub fn with_headers(mut self, headers: Map<String, Value>) -> Self {
        self.headers.extend(headers);
        self
    }
}

/// The hello frame written once right after connecting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Greeting {
    pub role: String,
    pub message: String,
}

impl Greeting {
    pub const DEFAULT_MESSAGE: &'static str = "Hello from the client!";

    pub fn frontend(message: impl Into<String>) -> Self {
        Self {
            role: "frontend".to_string(),
            message: message.into(),
        }
    }
}

impl Default for Greeting {
    fn default() -> Self {
        Self::frontend(Self::DEFAULT_MESSAGE)
    }
}

/// A decoded, well-formed response frame.
#[derive(Debug, Clone, PartialEq)]
pub enum ApiResponse {
    /// `status_code < 400`.
    ///
    /// `data` is the extracted result; `payload` is the whole response object
    /// as received, so `headers` (the session token after sign-in) and
    /// `status_code` stay reachable.
    Success {
        status_code: u16,
        headers: Map<String, Value>,
        data: Value,
        payload: Value,
    },
    /// `status_code >= 400`: a domain-level failure the caller branches on.
    Failure { status_code: u16, message: String },
}

impl ApiResponse {
    pub fn is_success(&self) -> bool {
        matches!(self, ApiResponse::Success { .. })
    }

    pub fn status_code(&self) -> u16 {
        match self {
            ApiResponse::Success { status_code, .. } | ApiResponse::Failure { status_code, .. } => {
                *status_code
            }
        }
    }
}
