use serde::Deserialize;

/// A message read from the source channel, by either ingress path.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Message {
    /// Source timestamp string, unique within the source channel.
    pub id: String,
    pub sender_id: Option<String>,
    pub body: Option<String>,
    /// When present, rendered instead of `body`.
    pub attachment_url: Option<String>,
    /// Id of the thread root, for replies and for roots that have replies.
    pub thread_id: Option<String>,
}

impl Message {
    /// True when this message is itself the root of its thread.
    pub fn is_thread_root(&self) -> bool {
        self.thread_id.as_deref() == Some(self.id.as_str())
    }
}

/// Message object as Slack returns it from `conversations.history`,
/// `conversations.replies` and inside Events API callbacks.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SlackMessage {
    pub ts: String,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub thread_ts: Option<String>,
    #[serde(default)]
    pub subtype: Option<String>,
    #[serde(default)]
    pub files: Vec<SlackFile>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SlackFile {
    #[serde(default)]
    pub url_private: Option<String>,
}

impl From<SlackMessage> for Message {
    fn from(raw: SlackMessage) -> Self {
        // Last file with a link wins; the text is dropped when any file is present.
        let attachment_url = raw
            .files
            .into_iter()
            .filter_map(|file| file.url_private)
            .filter(|url| !url.trim().is_empty())
            .last();

        Message {
            id: raw.ts,
            sender_id: raw.user.filter(|user| !user.trim().is_empty()),
            body: raw.text,
            attachment_url,
            thread_id: raw.thread_ts.filter(|ts| !ts.trim().is_empty()),
        }
    }
}
