use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::debug;

use crate::correlator::{Resolution, ThreadCorrelator};
use crate::error::ApiError;
use crate::platform::Delivery;
use crate::timestamp::SlackTs;

/// Replies already posted into one target thread, by source id.
type ReplyLedger = Arc<Mutex<BTreeSet<SlackTs>>>;

/// Posting side shared by the poller and the webhook, so both ingress paths
/// see the same thread anchors and the same delivered replies.
pub struct Relay {
    delivery: Arc<dyn Delivery>,
    correlator: Arc<ThreadCorrelator>,
    target_channel: String,
    delivered_replies: Mutex<HashMap<String, ReplyLedger>>,
}

impl Relay {
    pub fn new(
        delivery: Arc<dyn Delivery>,
        correlator: Arc<ThreadCorrelator>,
        target_channel: &str,
    ) -> Self {
        Self {
            delivery,
            correlator,
            target_channel: target_channel.to_string(),
            delivered_replies: Mutex::new(HashMap::new()),
        }
    }

    /// Post a top-level message and keep it as the anchor for a thread that
    /// may later form under `source_id`.
    pub async fn post_standalone(&self, source_id: &str, text: &str) -> Result<String, ApiError> {
        let posted = self
            .delivery
            .post(&self.target_channel, text, None)
            .await?;
        self.correlator.record_root(source_id, &posted).await;
        debug!("Relayed {} as {}", source_id, posted);
        Ok(posted)
    }

    /// Find the target thread for `source_thread_id`, posting the rendered
    /// root if none exists yet.
    pub async fn open_thread<R>(&self, source_thread_id: &str, render: R) -> Result<Resolution, ApiError>
    where
        R: FnOnce() -> String,
    {
        self.correlator
            .resolve_target(source_thread_id, render, |text| async move {
                self.delivery.post(&self.target_channel, &text, None).await
            })
            .await
    }

    async fn ledger(&self, source_thread_id: &str) -> ReplyLedger {
        let mut ledgers = self.delivered_replies.lock().await;
        ledgers
            .entry(source_thread_id.to_string())
            .or_default()
            .clone()
    }

    pub async fn reply_delivered(&self, source_thread_id: &str, reply_ts: &SlackTs) -> bool {
        let ledger = self.ledger(source_thread_id).await;
        let delivered = ledger.lock().await;
        delivered.contains(reply_ts)
    }

    /// Post a reply into `target_thread_id` unless that source reply already
    /// went out. Returns the posted id, or `None` for a duplicate.
    ///
    /// The thread's ledger stays locked across the post, so two ingress paths
    /// racing on the same reply post it once.
    pub async fn post_reply(
        &self,
        source_thread_id: &str,
        target_thread_id: &str,
        reply_ts: &SlackTs,
        text: &str,
    ) -> Result<Option<String>, ApiError> {
        let ledger = self.ledger(source_thread_id).await;
        let mut delivered = ledger.lock().await;
        if delivered.contains(reply_ts) {
            debug!("Reply {} in {} already relayed", reply_ts, source_thread_id);
            return Ok(None);
        }
        let posted = self
            .delivery
            .post(&self.target_channel, text, Some(target_thread_id))
            .await?;
        delivered.insert(reply_ts.clone());
        Ok(Some(posted))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::fake::FakeDelivery;
    use std::time::Duration;

    fn relay() -> (Arc<FakeDelivery>, Arc<Relay>) {
        let delivery = Arc::new(FakeDelivery::default());
        let relay = Arc::new(Relay::new(
            delivery.clone(),
            Arc::new(ThreadCorrelator::new()),
            "CTARGET",
        ));
        (delivery, relay)
    }

    fn ts(raw: &str) -> SlackTs {
        SlackTs::parse(raw).unwrap()
    }

    #[tokio::test]
    async fn test_reply_posted_once_per_source_id() {
        let (delivery, relay) = relay();
        let first = relay.post_reply("100", "9000.1", &ts("101"), "a").await.unwrap();
        assert!(first.is_some());
        let again = relay.post_reply("100", "9000.1", &ts("101.000"), "a").await.unwrap();
        assert_eq!(again, None);

        assert!(relay.reply_delivered("100", &ts("101")).await);
        assert!(!relay.reply_delivered("200", &ts("101")).await);
        assert_eq!(delivery.texts(), vec!["a"]);
    }

    #[tokio::test]
    async fn test_failed_reply_stays_pending() {
        let (delivery, relay) = relay();
        delivery.fail_matching("boom");
        assert!(relay.post_reply("100", "9000.1", &ts("101"), "boom").await.is_err());
        assert!(!relay.reply_delivered("100", &ts("101")).await);

        delivery.clear_failures();
        let posted = relay.post_reply("100", "9000.1", &ts("101"), "boom").await.unwrap();
        assert!(posted.is_some());
    }

    #[tokio::test]
    async fn test_racing_replies_post_once() {
        let (delivery, relay) = relay();
        delivery.set_delay(Duration::from_millis(20));
        let reply = ts("101");
        let (a, b) = tokio::join!(
            relay.post_reply("100", "9000.1", &reply, "same"),
            relay.post_reply("100", "9000.1", &reply, "same")
        );
        let posted = [a.unwrap(), b.unwrap()];
        assert_eq!(posted.iter().filter(|p| p.is_some()).count(), 1);
        assert_eq!(delivery.posts().len(), 1);
    }
}
