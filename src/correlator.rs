use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{Mutex, OnceCell};
use tracing::debug;

use crate::error::ApiError;

/// Outcome of resolving a source thread to its target thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub target_thread_id: String,
    /// True when this call posted the root message.
    pub created: bool,
}

/// Maps source thread ids to the thread anchors created in the target channel.
///
/// Each source thread gets its own slot. The map lock only covers finding or
/// inserting that slot; posting the root happens inside the slot, so callers
/// racing on the same thread wait for one root post while other threads
/// proceed untouched. A slot whose root post failed stays empty and the next
/// caller tries again. Entries are never removed or remapped, so the map grows
/// for the lifetime of the process.
#[derive(Default)]
pub struct ThreadCorrelator {
    threads: Mutex<HashMap<String, Arc<OnceCell<String>>>>,
}

impl ThreadCorrelator {
    pub fn new() -> Self {
        Self::default()
    }

    async fn slot(&self, source_thread_id: &str) -> Arc<OnceCell<String>> {
        let mut threads = self.threads.lock().await;
        threads
            .entry(source_thread_id.to_string())
            .or_default()
            .clone()
    }

    /// Return the target thread for `source_thread_id`, posting its root on
    /// first use. `render` and `post_root` are not called when a mapping
    /// already exists.
    pub async fn resolve_target<R, P, Fut>(
        &self,
        source_thread_id: &str,
        render: R,
        post_root: P,
    ) -> Result<Resolution, ApiError>
    where
        R: FnOnce() -> String,
        P: FnOnce(String) -> Fut,
        Fut: Future<Output = Result<String, ApiError>>,
    {
        let slot = self.slot(source_thread_id).await;
        if let Some(target) = slot.get() {
            return Ok(Resolution {
                target_thread_id: target.clone(),
                created: false,
            });
        }

        let created = AtomicBool::new(false);
        let target = slot
            .get_or_try_init(|| {
                let created = &created;
                async move {
                    created.store(true, Ordering::Relaxed);
                    post_root(render()).await
                }
            })
            .await?;

        let created = created.load(Ordering::Relaxed);
        if created {
            debug!(
                "Opened target thread {} for source thread {}",
                target, source_thread_id
            );
        }
        Ok(Resolution {
            target_thread_id: target.clone(),
            created,
        })
    }

    /// Record an already-posted message as the anchor for `source_id`, unless
    /// the thread is mapped already. Returns true when the entry was created.
    pub async fn record_root(&self, source_id: &str, target_id: &str) -> bool {
        let slot = self.slot(source_id).await;
        slot.set(target_id.to_string()).is_ok()
    }

    #[cfg(test)]
    pub async fn get(&self, source_thread_id: &str) -> Option<String> {
        let threads = self.threads.lock().await;
        threads
            .get(source_thread_id)
            .and_then(|slot| slot.get().cloned())
    }

    /// Number of source threads with a target anchor.
    #[cfg(test)]
    pub async fn len(&self) -> usize {
        let threads = self.threads.lock().await;
        threads.values().filter(|slot| slot.initialized()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    #[tokio::test]
    async fn test_first_resolution_posts_root() {
        let correlator = ThreadCorrelator::new();

        let resolution = correlator
            .resolve_target("100", || "root".to_string(), |text| async move {
                assert_eq!(text, "root");
                Ok("900.1".to_string())
            })
            .await
            .unwrap();

        assert_eq!(
            resolution,
            Resolution {
                target_thread_id: "900.1".to_string(),
                created: true
            }
        );
        assert_eq!(correlator.get("100").await.as_deref(), Some("900.1"));
        assert_eq!(correlator.len().await, 1);
    }

    #[tokio::test]
    async fn test_existing_mapping_skips_render_and_post() {
        let correlator = ThreadCorrelator::new();
        correlator
            .resolve_target("100", || "root".to_string(), |_| async {
                Ok("900.1".to_string())
            })
            .await
            .unwrap();

        let calls = AtomicUsize::new(0);
        let resolution = correlator
            .resolve_target(
                "100",
                || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    "root".to_string()
                },
                |_| async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok("900.9".to_string())
                },
            )
            .await
            .unwrap();

        assert_eq!(resolution.target_thread_id, "900.1");
        assert!(!resolution.created);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_concurrent_resolution_posts_one_root() {
        let correlator = Arc::new(ThreadCorrelator::new());
        let posts = Arc::new(AtomicUsize::new(0));

        let resolve = |correlator: Arc<ThreadCorrelator>, posts: Arc<AtomicUsize>| async move {
            correlator
                .resolve_target("100", || "root".to_string(), |_| async move {
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    let n = posts.fetch_add(1, Ordering::SeqCst) + 1;
                    Ok(format!("900.{n}"))
                })
                .await
                .unwrap()
        };

        let (a, b) = tokio::join!(
            tokio::spawn(resolve(correlator.clone(), posts.clone())),
            tokio::spawn(resolve(correlator.clone(), posts.clone())),
        );
        let (a, b) = (a.unwrap(), b.unwrap());

        assert_eq!(posts.load(Ordering::SeqCst), 1);
        assert_eq!(a.target_thread_id, b.target_thread_id);
        assert!(a.created ^ b.created);
    }

    #[tokio::test]
    async fn test_failed_root_post_is_retried() {
        let correlator = ThreadCorrelator::new();

        let err = correlator
            .resolve_target("100", || "root".to_string(), |_| async {
                Err(ApiError::platform("chat.postMessage", Some("ratelimited".into())))
            })
            .await
            .unwrap_err();
        assert!(err.to_string().contains("ratelimited"));
        assert_eq!(correlator.get("100").await, None);
        assert_eq!(correlator.len().await, 0);

        let resolution = correlator
            .resolve_target("100", || "root".to_string(), |_| async {
                Ok("900.2".to_string())
            })
            .await
            .unwrap();
        assert!(resolution.created);
        assert_eq!(resolution.target_thread_id, "900.2");
    }

    #[tokio::test]
    async fn test_unrelated_threads_get_distinct_targets() {
        let correlator = ThreadCorrelator::new();
        let a = correlator
            .resolve_target("100", String::new, |_| async { Ok("900.1".to_string()) })
            .await
            .unwrap();
        let b = correlator
            .resolve_target("200", String::new, |_| async { Ok("900.2".to_string()) })
            .await
            .unwrap();
        assert_ne!(a.target_thread_id, b.target_thread_id);
        assert_eq!(correlator.len().await, 2);
    }

    #[tokio::test]
    async fn test_record_root_never_remaps() {
        let correlator = ThreadCorrelator::new();
        assert!(correlator.record_root("100", "900.1").await);
        assert!(!correlator.record_root("100", "900.9").await);
        assert_eq!(correlator.get("100").await.as_deref(), Some("900.1"));

        let resolution = correlator
            .resolve_target("100", String::new, |_| async {
                Ok("900.5".to_string())
            })
            .await
            .unwrap();
        assert_eq!(resolution.target_thread_id, "900.1");
        assert!(!resolution.created);
    }
}
