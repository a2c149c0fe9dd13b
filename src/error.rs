use crate::timestamp::MalformedTimestamp;

/// Failure of a call to the chat platform.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("slack api {method} returned error: {code}")]
    Platform { method: &'static str, code: String },

    #[error("slack api {method} failed with status {status}: {body}")]
    Status {
        method: &'static str,
        status: u16,
        body: String,
    },

    #[error("slack api {method} request failed: {source}")]
    Transport {
        method: &'static str,
        #[source]
        source: reqwest::Error,
    },

    #[error("slack api {method} returned an unusable response: {detail}")]
    Decode { method: &'static str, detail: String },
}

impl ApiError {
    pub fn platform(method: &'static str, code: Option<String>) -> Self {
        ApiError::Platform {
            method,
            code: code.unwrap_or_else(|| "unknown error".to_string()),
        }
    }
}

/// Failure while relaying a single message or thread.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error(transparent)]
    MalformedTimestamp(#[from] MalformedTimestamp),

    #[error(transparent)]
    Api(#[from] ApiError),

    #[error("user lookup failed for {user_id}: {source}")]
    UserLookupFailed {
        user_id: String,
        #[source]
        source: ApiError,
    },
}
