//! In-memory ports for exercising the relay without a Slack workspace.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use super::{Delivery, MessageSource, UserLookup};
use crate::error::ApiError;
use crate::model::Message;
use crate::timestamp::SlackTs;

pub fn message(id: &str, sender: &str, body: &str, thread_id: Option<&str>) -> Message {
    Message {
        id: id.to_string(),
        sender_id: Some(sender.to_string()),
        body: Some(body.to_string()),
        attachment_url: None,
        thread_id: thread_id.map(str::to_string),
    }
}

#[derive(Default)]
pub struct FakeSource {
    channel: Mutex<Vec<Message>>,
    threads: Mutex<HashMap<String, Vec<Message>>>,
    fail_history: AtomicBool,
    failing_threads: Mutex<HashSet<String>>,
    pub history_requests: Mutex<Vec<String>>,
    pub replies_requests: Mutex<Vec<String>>,
}

impl FakeSource {
    /// Add a message visible in the channel history.
    pub fn push(&self, message: Message) {
        self.channel.lock().unwrap().push(message);
    }

    /// Set the full reply list of a thread, root first.
    pub fn set_thread(&self, thread_id: &str, messages: Vec<Message>) {
        self.threads
            .lock()
            .unwrap()
            .insert(thread_id.to_string(), messages);
    }

    pub fn fail_history(&self, fail: bool) {
        self.fail_history.store(fail, Ordering::SeqCst);
    }

    pub fn fail_thread(&self, thread_id: &str) {
        self.failing_threads
            .lock()
            .unwrap()
            .insert(thread_id.to_string());
    }
}

#[async_trait]
impl MessageSource for FakeSource {
    async fn fetch_history(
        &self,
        _channel: &str,
        oldest: &str,
        limit: usize,
    ) -> Result<Vec<Message>, ApiError> {
        self.history_requests
            .lock()
            .unwrap()
            .push(oldest.to_string());
        if self.fail_history.load(Ordering::SeqCst) {
            return Err(ApiError::platform("conversations.history", Some("ratelimited".into())));
        }

        let oldest = SlackTs::parse(oldest).unwrap_or_else(|_| SlackTs::epoch());
        let mut newer: Vec<Message> = self
            .channel
            .lock()
            .unwrap()
            .iter()
            .filter(|m| SlackTs::parse(&m.id).map(|ts| ts > oldest).unwrap_or(true))
            .cloned()
            .collect();
        newer.sort_by(|a, b| {
            let a = SlackTs::parse(&a.id).unwrap_or_else(|_| SlackTs::epoch());
            let b = SlackTs::parse(&b.id).unwrap_or_else(|_| SlackTs::epoch());
            b.cmp(&a)
        });
        newer.truncate(limit);
        Ok(newer)
    }

    async fn fetch_replies(
        &self,
        _channel: &str,
        thread_id: &str,
        limit: usize,
    ) -> Result<Vec<Message>, ApiError> {
        self.replies_requests
            .lock()
            .unwrap()
            .push(thread_id.to_string());
        if self.failing_threads.lock().unwrap().contains(thread_id) {
            return Err(ApiError::platform("conversations.replies", Some("thread_not_found".into())));
        }
        let mut replies = self
            .threads
            .lock()
            .unwrap()
            .get(thread_id)
            .cloned()
            .unwrap_or_default();
        replies.truncate(limit);
        Ok(replies)
    }
}

#[derive(Default)]
pub struct FakeUsers {
    names: Mutex<HashMap<String, String>>,
    pub calls: AtomicUsize,
}

impl FakeUsers {
    pub fn with(names: &[(&str, &str)]) -> Self {
        let users = Self::default();
        for (id, name) in names {
            users
                .names
                .lock()
                .unwrap()
                .insert(id.to_string(), name.to_string());
        }
        users
    }
}

#[async_trait]
impl UserLookup for FakeUsers {
    async fn lookup(&self, user_id: &str) -> Result<String, ApiError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.names
            .lock()
            .unwrap()
            .get(user_id)
            .cloned()
            .ok_or_else(|| ApiError::platform("users.info", Some("user_not_found".into())))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Posted {
    pub id: String,
    pub channel: String,
    pub text: String,
    pub thread_id: Option<String>,
}

#[derive(Default)]
pub struct FakeDelivery {
    posts: Mutex<Vec<Posted>>,
    next_id: AtomicUsize,
    fail_matching: Mutex<Vec<String>>,
    delay: Mutex<Option<Duration>>,
    pub attempts: AtomicUsize,
}

impl FakeDelivery {
    pub fn posts(&self) -> Vec<Posted> {
        self.posts.lock().unwrap().clone()
    }

    pub fn texts(&self) -> Vec<String> {
        self.posts().into_iter().map(|p| p.text).collect()
    }

    /// Reject every post whose text contains `needle`.
    pub fn fail_matching(&self, needle: &str) {
        self.fail_matching.lock().unwrap().push(needle.to_string());
    }

    pub fn clear_failures(&self) {
        self.fail_matching.lock().unwrap().clear();
    }

    /// Hold every post for `delay` before it completes.
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }
}

#[async_trait]
impl Delivery for FakeDelivery {
    async fn post(
        &self,
        channel: &str,
        text: &str,
        thread_id: Option<&str>,
    ) -> Result<String, ApiError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let rejected = self
            .fail_matching
            .lock()
            .unwrap()
            .iter()
            .any(|needle| text.contains(needle.as_str()));
        if rejected {
            return Err(ApiError::platform("chat.postMessage", Some("channel_not_found".into())));
        }

        let n = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let id = format!("9000.{n:06}");
        self.posts.lock().unwrap().push(Posted {
            id: id.clone(),
            channel: channel.to_string(),
            text: text.to_string(),
            thread_id: thread_id.map(str::to_string),
        });
        Ok(id)
    }
}
