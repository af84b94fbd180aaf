// ABOUTME: Cross-channel Activity wire model: messages, typing, events, attachments.
// ABOUTME: Immutable records; outgoing sends are correlated via channelData.clientActivityId.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

/// Kind of chat event carried by an [`Activity`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum ActivityType {
    /// A user or bot message
    Message,
    /// Typing indicator
    Typing,
    /// Named out-of-band event with an arbitrary payload
    Event,
    /// The remote side closed the conversation
    EndOfConversation,
    /// Any type this client does not recognize; passed through untouched
    #[serde(other)]
    Unknown,
}

/// A participant reference on an activity.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChannelAccount {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl ChannelAccount {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: None,
        }
    }
}

/// A card or file attached to a message activity.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    pub content_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_url: Option<String>,
    /// Inline card payload for content-typed cards
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thumbnail_url: Option<String>,
}

/// A single chat event exchanged between user and bot.
///
/// Activities are never mutated after creation. A successful send produces a
/// replacement record from the service; the two are matched through
/// `channelData.clientActivityId`, which the client stamps onto every
/// outgoing activity.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Activity {
    #[serde(rename = "type")]
    pub activity_type: ActivityType,
    /// Server-assigned id; absent on locally created activities
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from: Option<ChannelAccount>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<Attachment>,
    /// Event name, for `event` activities
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Event payload, for `event` activities
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    /// Opaque channel payload, passed through unmodified
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel_data: Option<Value>,
}

impl Activity {
    fn empty(activity_type: ActivityType) -> Self {
        Self {
            activity_type,
            id: None,
            timestamp: None,
            from: None,
            text: None,
            attachments: Vec::new(),
            name: None,
            value: None,
            channel_data: None,
        }
    }

    /// A plain text message. The sender is stamped on by the client at post
    /// time when the config names a local user; use [`Activity::with_from`]
    /// to set it explicitly.
    pub fn message(text: impl Into<String>) -> Self {
        let mut activity = Self::empty(ActivityType::Message);
        activity.text = Some(text.into());
        activity
    }

    /// A typing indicator.
    pub fn typing() -> Self {
        Self::empty(ActivityType::Typing)
    }

    /// A named event with an arbitrary payload.
    pub fn event(name: impl Into<String>, value: Value) -> Self {
        let mut activity = Self::empty(ActivityType::Event);
        activity.name = Some(name.into());
        activity.value = Some(value);
        activity
    }

    pub fn with_from(mut self, from: ChannelAccount) -> Self {
        self.from = Some(from);
        self
    }

    pub fn with_attachment(mut self, attachment: Attachment) -> Self {
        self.attachments.push(attachment);
        self
    }

    /// Correlation id linking an optimistically displayed outgoing message
    /// to its server-confirmed counterpart.
    pub fn client_activity_id(&self) -> Option<&str> {
        self.channel_data.as_ref()?.get("clientActivityId")?.as_str()
    }

    /// Stamp a fresh clientActivityId unless one is already present.
    /// Returns the id in effect.
    pub(crate) fn ensure_client_activity_id(&mut self) -> String {
        if let Some(existing) = self.client_activity_id() {
            return existing.to_string();
        }
        let id = Uuid::new_v4().to_string();
        match self.channel_data.as_mut() {
            Some(Value::Object(map)) => {
                map.insert("clientActivityId".to_string(), Value::String(id.clone()));
            }
            // Non-object channelData belongs to the caller; leave it alone
            Some(_) => {}
            None => {
                self.channel_data = Some(json!({ "clientActivityId": id }));
            }
        }
        id
    }
}

/// One page of polled activities plus the cursor for the next poll.
#[derive(Debug, Clone, Deserialize)]
pub struct ActivitySet {
    #[serde(default)]
    pub activities: Vec<Activity>,
    /// Opaque cursor marking the last-seen activity. Empty polls may omit
    /// it; the previous cursor stays in effect.
    #[serde(default)]
    pub watermark: Option<String>,
}

// =============================================================================
// Tests
// =============================================================================
