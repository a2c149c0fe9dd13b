use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::error::{ApiError, RelayError};
use crate::format::MessageFormatter;
use crate::model::Message;
use crate::platform::MessageSource;
use crate::relay::Relay;
use crate::timestamp::SlackTs;
use crate::users::SenderNames;

#[derive(Debug, Clone)]
pub struct PollerSettings {
    pub source_channel: String,
    pub history_limit: usize,
    pub replies_limit: usize,
}

/// Counters for one completed poll cycle.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PollCycleReport {
    pub fetched: usize,
    /// Messages posted to the target, thread roots included.
    pub relayed: usize,
    /// Messages dropped because their id could not be parsed.
    pub skipped: usize,
    /// Messages or threads whose relay failed part way.
    pub failed: usize,
}

#[derive(Debug)]
pub enum PollOutcome {
    Completed(PollCycleReport),
    /// History could not be fetched; the watermark did not move.
    FetchFailed(ApiError),
    /// A previous cycle was still running, so this tick did nothing.
    Overlapped,
}

#[derive(Default)]
struct PollerState {
    watermark: Option<SlackTs>,
}

/// Polls the source channel and relays whatever is newer than the watermark.
pub struct ChannelPoller {
    source: Arc<dyn MessageSource>,
    senders: Arc<SenderNames>,
    formatter: MessageFormatter,
    relay: Arc<Relay>,
    settings: PollerSettings,
    state: Mutex<PollerState>,
}

impl ChannelPoller {
    pub fn new(
        source: Arc<dyn MessageSource>,
        senders: Arc<SenderNames>,
        formatter: MessageFormatter,
        relay: Arc<Relay>,
        settings: PollerSettings,
    ) -> Self {
        Self {
            source,
            senders,
            formatter,
            relay,
            settings,
            state: Mutex::new(PollerState::default()),
        }
    }

    pub async fn watermark(&self) -> Option<SlackTs> {
        self.state.lock().await.watermark.clone()
    }

    /// Run one poll cycle. Cycles never overlap: the state lock is held for
    /// the whole cycle and a tick that cannot take it is skipped.
    pub async fn poll_once(&self) -> PollOutcome {
        let Ok(mut state) = self.state.try_lock() else {
            debug!("Previous poll cycle still running, skipping tick");
            return PollOutcome::Overlapped;
        };

        let channel = self.settings.source_channel.as_str();
        let oldest = state.watermark.clone().unwrap_or_else(SlackTs::epoch);
        let batch = match self
            .source
            .fetch_history(channel, oldest.as_str(), self.settings.history_limit)
            .await
        {
            Ok(batch) => batch,
            Err(e) => {
                warn!(
                    "Failed to fetch history of {} since {}: {}",
                    channel, oldest, e
                );
                return PollOutcome::FetchFailed(e);
            }
        };

        let mut report = PollCycleReport {
            fetched: batch.len(),
            ..Default::default()
        };

        let mut pending = Vec::with_capacity(batch.len());
        for message in batch {
            match SlackTs::parse(&message.id) {
                Ok(ts) => pending.push((ts, message)),
                Err(e) => {
                    warn!("Skipping source message: {}", RelayError::from(e));
                    report.skipped += 1;
                }
            }
        }

        // Advance before relaying, so a message that fails below is not
        // fetched again by the next cycle.
        if let Some(newest) = pending.iter().map(|(ts, _)| ts).max() {
            let advance = match &state.watermark {
                Some(current) => newest > current,
                None => true,
            };
            if advance {
                debug!("Watermark for {} advanced to {}", channel, newest);
                state.watermark = Some(newest.clone());
            }
        }

        pending.sort_by(|a, b| a.0.cmp(&b.0));

        let mut threads_seen = HashSet::new();
        for (ts, message) in &pending {
            let result = match &message.thread_id {
                None => self.relay_standalone(ts, message, &mut report.relayed).await,
                Some(thread_id) => {
                    // The whole thread went out with its first message in this batch.
                    if !threads_seen.insert(thread_id.clone()) {
                        continue;
                    }
                    self.relay_thread(thread_id, message, &mut report.relayed)
                        .await
                }
            };
            if let Err(e) = result {
                report.failed += 1;
                warn!("Failed to relay source message {}: {}", message.id, e);
            }
        }

        PollOutcome::Completed(report)
    }

    async fn relay_standalone(
        &self,
        ts: &SlackTs,
        message: &Message,
        relayed: &mut usize,
    ) -> Result<(), RelayError> {
        let sender = self.senders.display_name(message.sender_id.as_deref()).await;
        let text = self.formatter.render_message(&sender, ts, message);
        self.relay.post_standalone(&message.id, &text).await?;
        *relayed += 1;
        Ok(())
    }

    /// Relay a thread: open (or reuse) its target thread, then post every
    /// reply not yet delivered, oldest first. Stops at the first reply that
    /// fails to post; it and the replies after it stay pending.
    async fn relay_thread(
        &self,
        thread_id: &str,
        trigger: &Message,
        relayed: &mut usize,
    ) -> Result<(), RelayError> {
        let replies = self
            .source
            .fetch_replies(
                &self.settings.source_channel,
                thread_id,
                self.settings.replies_limit,
            )
            .await?;

        let root = replies
            .iter()
            .find(|m| m.id == thread_id)
            .unwrap_or(trigger);
        let root_ts = SlackTs::parse(&root.id)?;
        let root_sender = self.senders.display_name(root.sender_id.as_deref()).await;
        let resolution = self
            .relay
            .open_thread(thread_id, || {
                self.formatter.render_message(&root_sender, &root_ts, root)
            })
            .await?;
        if resolution.created {
            *relayed += 1;
        }

        let mut pending = Vec::with_capacity(replies.len());
        for reply in replies.iter().filter(|m| m.id != thread_id) {
            match SlackTs::parse(&reply.id) {
                Ok(ts) => pending.push((ts, reply)),
                Err(e) => warn!(
                    "Skipping reply in thread {}: {}",
                    thread_id,
                    RelayError::from(e)
                ),
            }
        }
        pending.sort_by(|a, b| a.0.cmp(&b.0));

        for (ts, reply) in pending {
            if self.relay.reply_delivered(thread_id, &ts).await {
                continue;
            }
            let sender = self.senders.display_name(reply.sender_id.as_deref()).await;
            let text = self.formatter.render_message(&sender, &ts, reply);
            let posted = self
                .relay
                .post_reply(thread_id, &resolution.target_thread_id, &ts, &text)
                .await?;
            if posted.is_some() {
                *relayed += 1;
            }
        }

        Ok(())
    }
}
