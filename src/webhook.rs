//! Slack Events API ingress.
//!
//! Each callback is decoded once into a [`WebhookPayload`]. The URL
//! verification handshake is answered with the challenge itself; message
//! events are acknowledged at once and relayed in a background task through
//! the same formatter, correlator and delivery as the poller. Relay failures
//! are logged and never change the response, so Slack does not start
//! redelivering.

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, warn};

use crate::error::RelayError;
use crate::format::MessageFormatter;
use crate::model::{Message, SlackMessage};
use crate::relay::Relay;
use crate::timestamp::SlackTs;
use crate::users::SenderNames;

/// Subtypes describing edits, deletions and thread bookkeeping rather than
/// new content.
const IGNORED_SUBTYPES: &[&str] = &["message_changed", "message_deleted", "message_replied"];

#[derive(Debug, Clone, PartialEq)]
pub enum WebhookPayload {
    Challenge(String),
    MessageEvent(MessageEvent),
    Unrecognized,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MessageEvent {
    pub channel: Option<String>,
    pub subtype: Option<String>,
    pub message: Message,
}

/// A decoded callback body.
#[derive(Debug, Clone, PartialEq)]
pub struct WebhookRequest {
    pub token: Option<String>,
    pub payload: WebhookPayload,
}

#[derive(Debug, Deserialize)]
struct RawEnvelope {
    #[serde(default)]
    token: Option<String>,
    #[serde(default)]
    challenge: Option<String>,
    #[serde(default)]
    event: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct RawEvent {
    #[serde(rename = "type")]
    event_type: String,
    #[serde(default)]
    channel: Option<String>,
    #[serde(flatten)]
    message: SlackMessage,
}

impl WebhookRequest {
    /// Fails only when the body is not a JSON object.
    pub fn decode(body: &[u8]) -> Result<Self, serde_json::Error> {
        let envelope: RawEnvelope = serde_json::from_slice(body)?;

        let payload = if let Some(challenge) = envelope.challenge {
            WebhookPayload::Challenge(challenge)
        } else if let Some(event) = envelope.event {
            match serde_json::from_value::<RawEvent>(event) {
                Ok(raw) if raw.event_type == "message" => {
                    WebhookPayload::MessageEvent(MessageEvent {
                        channel: raw.channel,
                        subtype: raw.message.subtype.clone(),
                        message: raw.message.into(),
                    })
                }
                Ok(raw) => {
                    debug!("Ignoring {} event", raw.event_type);
                    WebhookPayload::Unrecognized
                }
                Err(e) => {
                    debug!("Event did not decode as a message: {}", e);
                    WebhookPayload::Unrecognized
                }
            }
        } else {
            WebhookPayload::Unrecognized
        };

        Ok(Self {
            token: envelope.token,
            payload,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookReply {
    Challenge(String),
    Ack,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventOutcome {
    Relayed,
    Ignored,
}

/// Push-driven counterpart of the poller: one event per call, no watermark.
pub struct EventRelay {
    senders: Arc<SenderNames>,
    formatter: MessageFormatter,
    relay: Arc<Relay>,
    source_channel: String,
    verification_token: Option<String>,
}

impl EventRelay {
    pub fn new(
        senders: Arc<SenderNames>,
        formatter: MessageFormatter,
        relay: Arc<Relay>,
        source_channel: &str,
        verification_token: Option<String>,
    ) -> Self {
        Self {
            senders,
            formatter,
            relay,
            source_channel: source_channel.to_string(),
            verification_token,
        }
    }

    pub fn accepts_token(&self, token: Option<&str>) -> bool {
        match &self.verification_token {
            Some(expected) => token == Some(expected.as_str()),
            None => true,
        }
    }

    /// Answer a callback. Message events are relayed after the reply, since
    /// Slack retries any callback not acknowledged within three seconds.
    pub fn handle(self: &Arc<Self>, payload: WebhookPayload) -> WebhookReply {
        match payload {
            WebhookPayload::Challenge(challenge) => WebhookReply::Challenge(challenge),
            WebhookPayload::MessageEvent(event) => {
                let relay = self.clone();
                tokio::spawn(async move { relay.process(&event).await });
                WebhookReply::Ack
            }
            WebhookPayload::Unrecognized => WebhookReply::Ack,
        }
    }

    /// Relay one event and log how it went.
    pub async fn process(&self, event: &MessageEvent) {
        match self.relay_event(event).await {
            Ok(EventOutcome::Relayed) => debug!("Relayed event {}", event.message.id),
            Ok(EventOutcome::Ignored) => {}
            Err(e) => warn!("Failed to relay event {}: {}", event.message.id, e),
        }
    }

    pub async fn relay_event(&self, event: &MessageEvent) -> Result<EventOutcome, RelayError> {
        if let Some(subtype) = event.subtype.as_deref() {
            if IGNORED_SUBTYPES.contains(&subtype) {
                debug!("Ignoring {} event {}", subtype, event.message.id);
                return Ok(EventOutcome::Ignored);
            }
        }
        if let Some(channel) = event.channel.as_deref() {
            if channel != self.source_channel {
                debug!("Ignoring event from channel {}", channel);
                return Ok(EventOutcome::Ignored);
            }
        }

        let message = &event.message;
        let ts = SlackTs::parse(&message.id)?;
        let sender = self.senders.display_name(message.sender_id.as_deref()).await;
        let text = self.formatter.render_message(&sender, &ts, message);

        match message.thread_id.as_deref() {
            None => {
                self.relay.post_standalone(&message.id, &text).await?;
            }
            Some(thread_id) => {
                let resolution = self.relay.open_thread(thread_id, || text.clone()).await?;
                // A root is its own anchor, whether it was posted just now or earlier.
                if !message.is_thread_root() {
                    let posted = self
                        .relay
                        .post_reply(thread_id, &resolution.target_thread_id, &ts, &text)
                        .await?;
                    if posted.is_none() {
                        return Ok(EventOutcome::Ignored);
                    }
                }
            }
        }

        Ok(EventOutcome::Relayed)
    }
}

pub fn router(relay: Arc<EventRelay>, path: &str) -> Router {
    Router::new()
        .route(path, post(handle_event))
        .with_state(relay)
}

async fn handle_event(State(relay): State<Arc<EventRelay>>, body: Bytes) -> Response {
    let request = match WebhookRequest::decode(&body) {
        Ok(request) => request,
        Err(e) => {
            warn!("Rejected webhook body: {}", e);
            return (StatusCode::BAD_REQUEST, "invalid payload").into_response();
        }
    };

    if !relay.accepts_token(request.token.as_deref()) {
        warn!("Rejected webhook with a mismatched verification token");
        return StatusCode::UNAUTHORIZED.into_response();
    }

    match relay.handle(request.payload) {
        WebhookReply::Challenge(challenge) => challenge.into_response(),
        WebhookReply::Ack => Json(json!({ "status": "ok" })).into_response(),
    }
}
