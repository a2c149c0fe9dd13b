use crate::model::Message;
use crate::timestamp::{ClockZone, SlackTs};

pub const DEFAULT_NO_TEXT_PLACEHOLDER: &str = "[No Text]";

/// Renders relayed messages as `*sender* _HH:MM:SS_` followed by the content.
#[derive(Debug, Clone)]
pub struct MessageFormatter {
    zone: ClockZone,
    no_text_placeholder: String,
}

impl MessageFormatter {
    pub fn new(zone: ClockZone, no_text_placeholder: &str) -> Self {
        Self {
            zone,
            no_text_placeholder: no_text_placeholder.to_string(),
        }
    }

    /// An attachment link replaces the body entirely, even when both exist.
    pub fn render(
        &self,
        sender_display_name: &str,
        ts: &SlackTs,
        body: Option<&str>,
        attachment_url: Option<&str>,
    ) -> String {
        let content = match (attachment_url, body) {
            (Some(url), _) => url,
            (None, Some(text)) if !text.trim().is_empty() => text,
            (None, _) => self.no_text_placeholder.as_str(),
        };
        format!(
            "*{}* _{}_\n {}",
            sender_display_name,
            ts.to_clock_time(&self.zone),
            content
        )
    }

    pub fn render_message(&self, sender_display_name: &str, ts: &SlackTs, message: &Message) -> String {
        self.render(
            sender_display_name,
            ts,
            message.body.as_deref(),
            message.attachment_url.as_deref(),
        )
    }
}
