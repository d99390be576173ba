//! Core types: canonical message, reply and keyboard, long-poll session identity, reply addressing.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// Base of multi-party conversation peer ids: peer `CHAT_OFFSET + n` is chat `n`.
pub const CHAT_OFFSET: i64 = 2_000_000_000;

pub const ACTION_CHAT_INVITE_USER: &str = "chat_invite_user";
pub const ACTION_CHAT_INVITE_USER_BY_LINK: &str = "chat_invite_user_by_link";
pub const ACTION_CHAT_KICK_USER: &str = "chat_kick_user";
/// Fired by the reconciliation loop for every accepted incoming relationship request.
pub const ACTION_FRIEND_ADD: &str = "friend_add";
/// Fired by the reconciliation loop for every removed outgoing relationship request.
pub const ACTION_FRIEND_DELETE: &str = "friend_delete";

/// Whether the client runs as an individual user or as a group (community) account.
/// Selects the session acquisition call and the long-poll wire shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountMode {
    User,
    Group,
}

impl fmt::Display for AccountMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AccountMode::User => write!(f, "user"),
            AccountMode::Group => write!(f, "group"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ReadState {
    #[default]
    Unread,
    Read,
}

/// A normalized inbound message. Built once by the normalizer and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Message {
    /// Global message id. Community chat messages may arrive with 0 here.
    pub id: i64,
    /// Per-conversation sequence number; identifies a message together with `peer_id`.
    pub conversation_message_id: Option<i64>,
    pub body: String,
    pub sender_id: i64,
    /// Chat id for multi-party conversations; `None` for direct messages.
    pub conversation_id: Option<i64>,
    /// Raw destination id; preferred address when replying.
    pub peer_id: i64,
    /// The account's own message echoed back by the platform.
    pub is_outbound: bool,
    pub read_state: ReadState,
    pub action: Option<String>,
    pub action_target_id: Option<i64>,
    pub forwarded: Vec<Message>,
    /// Unix seconds.
    pub timestamp: i64,
}

impl Message {
    /// Synthetic action message used for events that do not arrive through the long poll
    /// (relationship changes found by the reconciliation loop).
    pub fn action_event(action: &str, user_id: i64) -> Self {
        Self {
            sender_id: user_id,
            action: Some(action.to_string()),
            action_target_id: Some(user_id),
            ..Self::default()
        }
    }

    pub fn is_direct(&self) -> bool {
        self.conversation_id.is_none()
    }

    /// Returns the action name when it is present and non-empty.
    pub fn action_name(&self) -> Option<&str> {
        self.action.as_deref().filter(|a| !a.is_empty())
    }

    pub fn sent_at(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.timestamp, 0)
    }

    /// User references of the form `[id123|Name]` found in the body, in order of appearance.
    /// Unterminated or non-numeric references are skipped.
    pub fn mentions(&self) -> Vec<Mention> {
        let mut found = Vec::new();
        let mut rest = self.body.as_str();
        while let Some(start) = rest.find("[id") {
            let after = &rest[start + 3..];
            let digits = after
                .find(|c: char| !c.is_ascii_digit())
                .unwrap_or(after.len());
            let tail = &after[digits..];
            if digits == 0 || !tail.starts_with('|') {
                rest = after;
                continue;
            }
            let Some(end) = tail.find(']') else {
                break;
            };
            if let Ok(id) = after[..digits].parse() {
                found.push(Mention {
                    id,
                    name: tail[1..end].to_string(),
                });
            }
            rest = &tail[end + 1..];
        }
        found
    }

    /// Where a reply to this message goes: raw peer id first, then chat id, then sender.
    pub fn reply_target(&self) -> ReplyTarget {
        if self.peer_id != 0 {
            ReplyTarget::Peer(self.peer_id)
        } else if let Some(chat_id) = self.conversation_id {
            ReplyTarget::Chat(chat_id)
        } else {
            ReplyTarget::User(self.sender_id)
        }
    }
}

/// A user referenced in a message body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mention {
    pub id: i64,
    pub name: String,
}

/// Address of an outgoing message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyTarget {
    Peer(i64),
    Chat(i64),
    User(i64),
}

/// Handler output. The default value means "no reply".
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Reply {
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keyboard: Option<Keyboard>,
}

impl Reply {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            keyboard: None,
        }
    }

    pub fn with_keyboard(mut self, keyboard: Keyboard) -> Self {
        self.keyboard = Some(keyboard);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty() && self.keyboard.is_none()
    }
}

impl From<&str> for Reply {
    fn from(text: &str) -> Self {
        Reply::text(text)
    }
}

impl From<String> for Reply {
    fn from(text: String) -> Self {
        Reply::text(text)
    }
}

/// Bot keyboard attached to a reply; serialized as the `keyboard` send parameter.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Keyboard {
    pub one_time: bool,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub inline: bool,
    pub buttons: Vec<Vec<Button>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Button {
    pub action: ButtonAction,
    pub color: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ButtonAction {
    #[serde(rename = "type")]
    pub kind: String,
    pub label: String,
    /// JSON-encoded payload echoed back when the button is pressed.
    pub payload: String,
}

impl Button {
    /// Text button with the default color. `payload` is JSON-encoded; `None` sends `{}`.
    pub fn text(label: impl Into<String>, payload: Option<&serde_json::Value>) -> Self {
        let payload = payload
            .and_then(|p| serde_json::to_string(p).ok())
            .unwrap_or_else(|| "{}".to_string());
        Self {
            action: ButtonAction {
                kind: "text".to_string(),
                label: label.into(),
                payload,
            },
            color: "default".to_string(),
        }
    }

    pub fn with_color(mut self, color: impl Into<String>) -> Self {
        self.color = color.into();
        self
    }
}

/// Long-poll position marker. User sessions use integers, group sessions use strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Cursor {
    Number(i64),
    Text(String),
}

impl Default for Cursor {
    fn default() -> Self {
        Cursor::Number(0)
    }
}

impl Cursor {
    /// Numeric value when the cursor is a number or a numeric string.
    pub fn numeric(&self) -> Option<i64> {
        match self {
            Cursor::Number(n) => Some(*n),
            Cursor::Text(s) => s.trim().parse().ok(),
        }
    }

    /// Moves the cursor to `next` unless that would move it backwards.
    /// Returns false when the move was rejected.
    pub fn advance(&mut self, next: Cursor) -> bool {
        let backwards = matches!(
            (self.numeric(), next.numeric()),
            (Some(current), Some(candidate)) if candidate.cmp(&current) == Ordering::Less
        );
        if backwards {
            return false;
        }
        *self = next;
        true
    }
}

impl fmt::Display for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cursor::Number(n) => write!(f, "{}", n),
            Cursor::Text(s) => f.write_str(s),
        }
    }
}

/// Long-poll server identity returned by session acquisition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionInfo {
    pub server: String,
    pub key: String,
    #[serde(rename = "ts")]
    pub cursor: Cursor,
}

/// Parameters of one long-poll request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LongPollRequest {
    pub account_mode: AccountMode,
    pub server: String,
    pub key: String,
    pub cursor: Cursor,
    pub wait: u32,
    pub mode: u32,
    pub version: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelationshipDirection {
    Incoming,
    Outgoing,
}
