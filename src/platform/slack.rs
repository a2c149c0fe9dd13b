//! Slack Web API client backing the relay ports.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use super::{Delivery, MessageSource, UserLookup};
use crate::config::SlackApiConfig;
use crate::error::ApiError;
use crate::model::{Message, SlackMessage};

const RETRY_ATTEMPT_HEADER: &str = "x-slack-relay-retry-attempt";

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    ok: bool,
    #[serde(default)]
    messages: Vec<SlackMessage>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UsersInfoResponse {
    ok: bool,
    #[serde(default)]
    user: Option<SlackUser>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SlackUser {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    real_name: Option<String>,
    #[serde(default)]
    profile: Option<SlackUserProfile>,
}

#[derive(Debug, Default, Deserialize)]
struct SlackUserProfile {
    #[serde(default)]
    real_name: Option<String>,
    #[serde(default)]
    display_name: Option<String>,
}

impl SlackUser {
    /// Real name first, then the profile names, then the handle.
    fn display_name(self) -> Option<String> {
        let profile = self.profile.unwrap_or_default();
        [
            self.real_name,
            profile.real_name,
            profile.display_name,
            self.name,
        ]
        .into_iter()
        .flatten()
        .find(|name| !name.trim().is_empty())
    }
}

#[derive(Debug, Deserialize)]
struct PostMessageResponse {
    ok: bool,
    #[serde(default)]
    ts: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

/// Client for one workspace, authenticated with that workspace's bot token.
#[derive(Clone)]
pub struct SlackApiClient {
    http: reqwest::Client,
    api_base: String,
    token: String,
    retry_max_attempts: usize,
    retry_base_delay_ms: u64,
}

impl SlackApiClient {
    pub fn new(config: &SlackApiConfig, token: &str) -> Result<Self> {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            reqwest::header::USER_AGENT,
            reqwest::header::HeaderValue::from_static("slack-relay"),
        );
        headers.insert(
            reqwest::header::ACCEPT,
            reqwest::header::HeaderValue::from_static("application/json"),
        );
        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_millis(config.request_timeout_ms.max(1)))
            .build()
            .context("Failed to create Slack API client")?;

        Ok(Self {
            http,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            token: token.trim().to_string(),
            retry_max_attempts: config.retry_max_attempts.max(1),
            retry_base_delay_ms: config.retry_base_delay_ms.max(1),
        })
    }

    fn url(&self, method: &str) -> String {
        format!("{}/{}", self.api_base, method)
    }

    async fn list_messages(
        &self,
        method: &'static str,
        params: &[(&str, &str)],
    ) -> Result<Vec<Message>, ApiError> {
        let response: MessagesResponse = self
            .request_json(method, || {
                self.http
                    .get(self.url(method))
                    .bearer_auth(&self.token)
                    .query(params)
            })
            .await?;
        if !response.ok {
            return Err(ApiError::platform(method, response.error));
        }
        Ok(response.messages.into_iter().map(Message::from).collect())
    }

    /// Send a request, retrying rate limits, server errors and transient
    /// transport failures with exponential backoff.
    async fn request_json<T, F>(&self, method: &'static str, mut builder: F) -> Result<T, ApiError>
    where
        T: DeserializeOwned,
        F: FnMut() -> reqwest::RequestBuilder,
    {
        let mut attempt = 0_usize;
        loop {
            attempt = attempt.saturating_add(1);
            let response = builder()
                .header(RETRY_ATTEMPT_HEADER, attempt.saturating_sub(1).to_string())
                .send()
                .await;
            match response {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        return response.json::<T>().await.map_err(|e| ApiError::Decode {
                            method,
                            detail: e.to_string(),
                        });
                    }

                    let retry_after = parse_retry_after(response.headers());
                    if attempt < self.retry_max_attempts && is_retryable_status(status.as_u16()) {
                        let delay = retry_delay(self.retry_base_delay_ms, attempt, retry_after);
                        debug!(
                            "Slack {} returned {}, retrying in {:?}",
                            method, status, delay
                        );
                        tokio::time::sleep(delay).await;
                        continue;
                    }

                    let body = response.text().await.unwrap_or_default();
                    return Err(ApiError::Status {
                        method,
                        status: status.as_u16(),
                        body: truncate_for_error(&body, 800),
                    });
                }
                Err(error) => {
                    if attempt < self.retry_max_attempts && is_retryable_transport_error(&error) {
                        tokio::time::sleep(retry_delay(self.retry_base_delay_ms, attempt, None))
                            .await;
                        continue;
                    }
                    return Err(ApiError::Transport {
                        method,
                        source: error,
                    });
                }
            }
        }
    }
}

#[async_trait]
impl MessageSource for SlackApiClient {
    async fn fetch_history(
        &self,
        channel: &str,
        oldest: &str,
        limit: usize,
    ) -> Result<Vec<Message>, ApiError> {
        let limit = limit.to_string();
        self.list_messages(
            "conversations.history",
            &[("channel", channel), ("oldest", oldest), ("limit", &limit)],
        )
        .await
    }

    async fn fetch_replies(
        &self,
        channel: &str,
        thread_id: &str,
        limit: usize,
    ) -> Result<Vec<Message>, ApiError> {
        let limit = limit.to_string();
        self.list_messages(
            "conversations.replies",
            &[("channel", channel), ("ts", thread_id), ("limit", &limit)],
        )
        .await
    }
}

#[async_trait]
impl UserLookup for SlackApiClient {
    async fn lookup(&self, user_id: &str) -> Result<String, ApiError> {
        const METHOD: &str = "users.info";
        let response: UsersInfoResponse = self
            .request_json(METHOD, || {
                self.http
                    .get(self.url(METHOD))
                    .bearer_auth(&self.token)
                    .query(&[("user", user_id)])
            })
            .await?;
        if !response.ok {
            return Err(ApiError::platform(METHOD, response.error));
        }
        response
            .user
            .and_then(SlackUser::display_name)
            .ok_or_else(|| ApiError::Decode {
                method: METHOD,
                detail: format!("no name for user {user_id}"),
            })
    }
}

#[async_trait]
impl Delivery for SlackApiClient {
    async fn post(
        &self,
        channel: &str,
        text: &str,
        thread_id: Option<&str>,
    ) -> Result<String, ApiError> {
        const METHOD: &str = "chat.postMessage";
        let mut payload = json!({
            "channel": channel,
            "text": text,
        });
        if let Some(thread_id) = thread_id {
            payload["thread_ts"] = Value::String(thread_id.to_string());
        }

        let response: PostMessageResponse = self
            .request_json(METHOD, || {
                self.http
                    .post(self.url(METHOD))
                    .bearer_auth(&self.token)
                    .json(&payload)
            })
            .await?;
        if !response.ok {
            return Err(ApiError::platform(METHOD, response.error));
        }
        response
            .ts
            .filter(|ts| !ts.trim().is_empty())
            .ok_or_else(|| ApiError::Decode {
                method: METHOD,
                detail: "response missing ts".to_string(),
            })
    }
}

fn parse_retry_after(headers: &reqwest::header::HeaderMap) -> Option<u64> {
    headers
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse::<u64>().ok())
}

fn retry_delay(base_delay_ms: u64, attempt: usize, retry_after_seconds: Option<u64>) -> Duration {
    if let Some(retry_after_seconds) = retry_after_seconds {
        return Duration::from_secs(retry_after_seconds);
    }
    let exponent = attempt.saturating_sub(1).min(6) as u32;
    Duration::from_millis(base_delay_ms.max(1).saturating_mul(2_u64.pow(exponent)))
}

fn is_retryable_status(status: u16) -> bool {
    status == 429 || (500..600).contains(&status)
}

fn is_retryable_transport_error(error: &reqwest::Error) -> bool {
    error.is_timeout() || error.is_connect() || error.is_request() || error.is_body()
}

fn truncate_for_error(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    let mut truncated: String = value.chars().take(max_chars).collect();
    truncated.push_str("...");
    truncated
}
