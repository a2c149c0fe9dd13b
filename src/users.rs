use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::warn;

use crate::error::RelayError;
use crate::platform::UserLookup;

pub const DEFAULT_UNKNOWN_SENDER: &str = "Unknown User";

/// Cached display names of source workspace users.
///
/// Names are assumed stable for the process lifetime, so successful lookups
/// are kept forever. Failures are not cached.
pub struct SenderNames {
    lookup: Arc<dyn UserLookup>,
    cache: Mutex<HashMap<String, String>>,
    unknown_sender: String,
}

impl SenderNames {
    pub fn new(lookup: Arc<dyn UserLookup>, unknown_sender: &str) -> Self {
        Self {
            lookup,
            cache: Mutex::new(HashMap::new()),
            unknown_sender: unknown_sender.to_string(),
        }
    }

    pub async fn resolve(&self, user_id: &str) -> Result<String, RelayError> {
        if let Some(name) = self.cache.lock().await.get(user_id) {
            return Ok(name.clone());
        }

        let name = self
            .lookup
            .lookup(user_id)
            .await
            .map_err(|source| RelayError::UserLookupFailed {
                user_id: user_id.to_string(),
                source,
            })?;

        self.cache
            .lock()
            .await
            .insert(user_id.to_string(), name.clone());
        Ok(name)
    }

    /// Display name for a sender, or the placeholder when it cannot be found.
    pub async fn display_name(&self, user_id: Option<&str>) -> String {
        let Some(user_id) = user_id else {
            return self.unknown_sender.clone();
        };
        match self.resolve(user_id).await {
            Ok(name) => name,
            Err(e) => {
                warn!("{}; relaying as {:?}", e, self.unknown_sender);
                self.unknown_sender.clone()
            }
        }
    }
}
