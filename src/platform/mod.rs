pub mod slack;

#[cfg(test)]
pub mod fake;

use async_trait::async_trait;

use crate::error::ApiError;
use crate::model::Message;

/// Read side of the source workspace.
#[async_trait]
pub trait MessageSource: Send + Sync {
    /// Messages newer than `oldest` (exclusive), newest first.
    async fn fetch_history(
        &self,
        channel: &str,
        oldest: &str,
        limit: usize,
    ) -> Result<Vec<Message>, ApiError>;

    /// The whole thread, oldest first, root included.
    async fn fetch_replies(
        &self,
        channel: &str,
        thread_id: &str,
        limit: usize,
    ) -> Result<Vec<Message>, ApiError>;
}

/// Resolves a source user id to a human-readable name.
#[async_trait]
pub trait UserLookup: Send + Sync {
    async fn lookup(&self, user_id: &str) -> Result<String, ApiError>;
}

/// Write side of the target workspace.
#[async_trait]
pub trait Delivery: Send + Sync {
    /// Post `text`, inside `thread_id` when given. Returns the posted message id.
    async fn post(
        &self,
        channel: &str,
        text: &str,
        thread_id: Option<&str>,
    ) -> Result<String, ApiError>;
}
