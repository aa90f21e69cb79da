use serde::{Deserialize, Serialize};

/// Fallback message when a failed response carries no parseable error body.
pub const GENERIC_REQUEST_FAILED: &str = "request failed";

/// Error body every server endpoint returns on a non-success status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}

impl ErrorBody {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            error: message.into(),
        }
    }
}
