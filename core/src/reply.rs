//! The `{success, data?, message?}` shape handed to the UI layer.
//!
//! On success `data` is the whole parsed response, `{status_code, headers,
//! body}`, so screens read `data.body` and sign-in reads `data.headers.token`.
//! Business failures keep their own message so screens can show it as is
//! ("Email already exists"). Transport, protocol and timeout errors all
//! surface as the same generic message; their distinct kind is logged here
//! and nowhere else.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::SendError;
use crate::http::ApiResponse;

/// What the user sees when the request never produced a usable response.
pub const TECHNICAL_ISSUE: &str = "Technical issue";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reply {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl Reply {
    pub fn ok(data: Value) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: None,
        }
    }

    pub fn fail(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            message: Some(message.into()),
        }
    }

    pub fn from_outcome(outcome: Result<ApiResponse, SendError>) -> Self {
        match outcome {
            Ok(response) => response.into(),
            Err(err) => {
                tracing::warn!(kind = err.kind().as_str(), error = %err, "request did not complete");
                Self::fail(TECHNICAL_ISSUE)
            }
        }
    }
}

impl From<ApiResponse> for Reply {
    fn from(response: ApiResponse) -> Self {
        match response {
            ApiResponse::Success { payload, .. } => Self::ok(payload),
            ApiResponse::Failure { message, .. } => Self::fail(message),
        }
    }
}
