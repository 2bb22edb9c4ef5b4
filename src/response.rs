use serde::{Deserialize, Serialize};

/// JSON envelope used by every operational endpoint.
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T> ApiResponse<T> {
    pub fn data(data: T) -> Self {
        Self {
            success: true,
            message: None,
            data: Some(data),
        }
    }

    pub fn with_message(message: impl Into<String>, data: T) -> Self {
        Self {
            success: true,
            message: Some(message.into()),
            data: Some(data),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ClearQueueResponse {
    pub cleared_count: usize,
}

/// Body of a 429 issued before a request reaches the throttler.
#[derive(Debug, Serialize, Deserialize)]
pub struct BackpressureResponse {
    pub error: String,
    pub message: String,
    pub retry_after: u64,
}

impl BackpressureResponse {
    pub fn queue_full(retry_after: u64) -> Self {
        Self {
            error: "Too Many Requests".to_string(),
            message: "Transaction queue is full. Please try again later.".to_string(),
            retry_after,
        }
    }
}
