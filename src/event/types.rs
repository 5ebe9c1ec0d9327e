//! Event payload definitions.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::SystemTime;

/// Kind of chat an event originated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatKind {
    Private,
    Group,
    Supergroup,
    Channel,
}

/// A chat (private conversation, group or channel).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Chat {
    pub id: i64,
    pub kind: ChatKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

impl Chat {
    pub fn private(id: i64) -> Self {
        Self {
            id,
            kind: ChatKind::Private,
            title: None,
        }
    }

    pub fn group(id: i64) -> Self {
        Self {
            id,
            kind: ChatKind::Group,
            title: None,
        }
    }
}

/// A platform user.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct User {
    pub id: i64,
    #[serde(default)]
    pub is_bot: bool,
    pub first_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
}

impl User {
    pub fn new(id: i64, first_name: impl Into<String>) -> Self {
        Self {
            id,
            is_bot: false,
            first_name: first_name.into(),
            username: None,
        }
    }
}

/// Media attached to a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Photo,
    Video,
    Audio,
    Document,
    Voice,
    Sticker,
}

/// A chat message (new or edited).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Message {
    pub message_id: i64,
    pub chat: Chat,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<User>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caption: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media: Option<MediaKind>,
    #[serde(default)]
    pub forwarded: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to_message_id: Option<i64>,
}

impl Message {
    /// Plain text message from `from` in `chat`.
    pub fn text(message_id: i64, chat: Chat, from: User, text: impl Into<String>) -> Self {
        Self {
            message_id,
            chat,
            from: Some(from),
            text: Some(text.into()),
            caption: None,
            media: None,
            forwarded: false,
            reply_to_message_id: None,
        }
    }
}

/// An inline keyboard button press.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct CallbackQuery {
    pub id: String,
    pub from: User,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<Message>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
}

/// An inline query typed in the input field.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct InlineQuery {
    pub id: String,
    pub from: User,
    pub query: String,
    #[serde(default)]
    pub offset: String,
}

/// A change of membership status in a chat.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ChatMemberUpdate {
    pub chat: Chat,
    pub from: User,
    pub old_status: String,
    pub new_status: String,
}

/// Tagged event payload.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum EventKind {
    Message(Message),
    EditedMessage(Message),
    CallbackQuery(CallbackQuery),
    InlineQuery(InlineQuery),
    ChatMemberUpdate(ChatMemberUpdate),
}

/// Payload-free discriminant of [`EventKind`], used for priority tiers and filters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateKind {
    Message,
    EditedMessage,
    CallbackQuery,
    InlineQuery,
    ChatMemberUpdate,
}

impl UpdateKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            UpdateKind::Message => "message",
            UpdateKind::EditedMessage => "edited_message",
            UpdateKind::CallbackQuery => "callback_query",
            UpdateKind::InlineQuery => "inline_query",
            UpdateKind::ChatMemberUpdate => "chat_member_update",
        }
    }
}

impl fmt::Display for UpdateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One inbound occurrence from the messaging platform.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Event {
    /// Platform-assigned, monotonically increasing id.
    pub sequence_id: u64,
    /// Wall-clock time the event was received.
    #[serde(default = "SystemTime::now")]
    pub arrival_time: SystemTime,
    pub kind: EventKind,
}

impl Event {
    /// Create an event stamped with the current time.
    pub fn new(sequence_id: u64, kind: EventKind) -> Self {
        Self {
            sequence_id,
            arrival_time: SystemTime::now(),
            kind,
        }
    }

    pub fn update_kind(&self) -> UpdateKind {
        match &self.kind {
            EventKind::Message(_) => UpdateKind::Message,
            EventKind::EditedMessage(_) => UpdateKind::EditedMessage,
            EventKind::CallbackQuery(_) => UpdateKind::CallbackQuery,
            EventKind::InlineQuery(_) => UpdateKind::InlineQuery,
            EventKind::ChatMemberUpdate(_) => UpdateKind::ChatMemberUpdate,
        }
    }

    /// The message carried by this event, if any.
    ///
    /// For callback queries this is the message the pressed button belongs to.
    pub fn message(&self) -> Option<&Message> {
        match &self.kind {
            EventKind::Message(m) | EventKind::EditedMessage(m) => Some(m),
            EventKind::CallbackQuery(q) => q.message.as_ref(),
            EventKind::InlineQuery(_) | EventKind::ChatMemberUpdate(_) => None,
        }
    }

    /// Text of a new or edited message.
    pub fn text(&self) -> Option<&str> {
        match &self.kind {
            EventKind::Message(m) | EventKind::EditedMessage(m) => m.text.as_deref(),
            _ => None,
        }
    }

    /// Caption of a new or edited media message.
    pub fn caption(&self) -> Option<&str> {
        match &self.kind {
            EventKind::Message(m) | EventKind::EditedMessage(m) => m.caption.as_deref(),
            _ => None,
        }
    }

    pub fn chat(&self) -> Option<&Chat> {
        match &self.kind {
            EventKind::ChatMemberUpdate(u) => Some(&u.chat),
            _ => self.message().map(|m| &m.chat),
        }
    }

    /// The user that caused the event.
    pub fn user(&self) -> Option<&User> {
        match &self.kind {
            EventKind::Message(m) | EventKind::EditedMessage(m) => m.from.as_ref(),
            EventKind::CallbackQuery(q) => Some(&q.from),
            EventKind::InlineQuery(q) => Some(&q.from),
            EventKind::ChatMemberUpdate(u) => Some(&u.from),
        }
    }

    pub fn callback_data(&self) -> Option<&str> {
        match &self.kind {
            EventKind::CallbackQuery(q) => q.data.as_deref(),
            _ => None,
        }
    }
}
