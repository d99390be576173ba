//! Update normalization: raw long-poll updates into canonical [`Message`]s.
//!
//! User sessions deliver positional arrays (`[4, id, flags, peer_id, ts, text, extra, …]`),
//! group sessions deliver `{type, object}` envelopes. The shape is picked once per session via
//! [`WireFormat::for_mode`]; each [`RawUpdate`] variant has its own conversion.
//! Normalization is pure: no I/O, no retries. A malformed update is an error for that update
//! only; [`normalize_batch`] skips it and keeps going.

use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::warn;
use vkbot_core::{AccountMode, BotError, Message, ReadState, Result, CHAT_OFFSET};

/// Positional event type of a new message.
pub const EVENT_NEW_MESSAGE: i64 = 4;
/// Object event type of a new message.
pub const EVENT_MESSAGE_NEW: &str = "message_new";
/// Positional flag bit set on the account's own messages.
pub const FLAG_OUTBOX: i64 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireFormat {
    Positional,
    Object,
}

impl WireFormat {
    pub fn for_mode(mode: AccountMode) -> Self {
        match mode {
            AccountMode::User => WireFormat::Positional,
            AccountMode::Group => WireFormat::Object,
        }
    }
}

/// One update from the poll envelope, tagged with the wire shape it must be read as.
#[derive(Debug, Clone, PartialEq)]
pub enum RawUpdate {
    Positional(Value),
    Object(Value),
}

#[derive(Debug, Deserialize)]
struct UpdatesEnvelope {
    updates: Vec<Value>,
}

/// Splits a successful poll body into raw updates. An unreadable envelope is a
/// [`BotError::MalformedResponse`] for the whole batch.
pub fn parse_updates(format: WireFormat, body: &[u8]) -> Result<Vec<RawUpdate>> {
    let envelope: UpdatesEnvelope = serde_json::from_slice(body)
        .map_err(|e| BotError::MalformedResponse(format!("long poll updates: {}", e)))?;
    Ok(envelope
        .updates
        .into_iter()
        .map(|update| match format {
            WireFormat::Positional => RawUpdate::Positional(update),
            WireFormat::Object => RawUpdate::Object(update),
        })
        .collect())
}

/// Converts one update. `Ok(None)` means the update is not a new message.
pub fn normalize(update: &RawUpdate) -> Result<Option<Message>> {
    match update {
        RawUpdate::Positional(value) => normalize_positional(value),
        RawUpdate::Object(value) => normalize_object(value),
    }
}

/// Converts every update, skipping non-message events and logging malformed ones.
pub fn normalize_batch(updates: &[RawUpdate]) -> Vec<Message> {
    updates
        .iter()
        .filter_map(|update| match normalize(update) {
            Ok(message) => message,
            Err(e) => {
                warn!(error = %e, update = ?update, "Skipping malformed update");
                None
            }
        })
        .collect()
}

/// Integer from a JSON number or a numeric string.
fn coerce_i64(value: Option<&Value>) -> Option<i64> {
    match value? {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn required_i64(fields: &[Value], offset: usize, name: &str) -> Result<i64> {
    coerce_i64(fields.get(offset)).ok_or_else(|| {
        BotError::Normalization(format!("positional update has no {} at offset {}", name, offset))
    })
}

fn conversation_id(sender_id: i64, peer_id: i64) -> Option<i64> {
    if sender_id == peer_id {
        None
    } else {
        Some(peer_id - CHAT_OFFSET)
    }
}

fn normalize_positional(value: &Value) -> Result<Option<Message>> {
    let fields = value
        .as_array()
        .ok_or_else(|| BotError::Normalization("positional update is not an array".to_string()))?;
    let kind = required_i64(fields, 0, "event type")?;
    if kind != EVENT_NEW_MESSAGE {
        return Ok(None);
    }

    let id = required_i64(fields, 1, "message id")?;
    let flags = required_i64(fields, 2, "flags")?;
    let peer_id = required_i64(fields, 3, "peer id")?;
    let timestamp = required_i64(fields, 4, "timestamp")?;
    let body = fields
        .get(5)
        .and_then(Value::as_str)
        .ok_or_else(|| BotError::Normalization("positional update has no text at offset 5".to_string()))?
        .to_string();

    let extra: Option<&Map<String, Value>> = fields.get(6).and_then(Value::as_object);
    let sender_id = extra
        .and_then(|e| coerce_i64(e.get("from")))
        .filter(|id| *id != 0)
        .unwrap_or(peer_id);
    let action = extra
        .and_then(|e| e.get("source_act"))
        .and_then(Value::as_str)
        .filter(|a| !a.is_empty())
        .map(str::to_string);
    let action_target_id = extra.and_then(|e| coerce_i64(e.get("source_mid")));

    Ok(Some(Message {
        id,
        conversation_message_id: None,
        body,
        sender_id,
        conversation_id: conversation_id(sender_id, peer_id),
        peer_id,
        is_outbound: flags & FLAG_OUTBOX != 0,
        read_state: ReadState::Unread,
        action,
        action_target_id,
        forwarded: Vec::new(),
        timestamp,
    }))
}

fn normalize_object(value: &Value) -> Result<Option<Message>> {
    let kind = value
        .get("type")
        .and_then(Value::as_str)
        .ok_or_else(|| BotError::Normalization("object update has no type".to_string()))?;
    if kind != EVENT_MESSAGE_NEW {
        return Ok(None);
    }
    let object = value
        .get("object")
        .ok_or_else(|| BotError::Normalization("message_new update has no object".to_string()))?;
    // Newer API versions nest the message under `object.message`.
    let message = object
        .get("message")
        .filter(|m| m.is_object())
        .unwrap_or(object);
    parse_message_object(message).map(Some)
}

fn parse_message_object(obj: &Value) -> Result<Message> {
    if !obj.is_object() {
        return Err(BotError::Normalization("message is not an object".to_string()));
    }
    let body = match obj.get("text") {
        Some(Value::String(text)) => text.clone(),
        _ => {
            return Err(BotError::Normalization(
                "message object has no text field".to_string(),
            ))
        }
    };

    let from_id = coerce_i64(obj.get("from_id")).filter(|id| *id != 0);
    let peer = coerce_i64(obj.get("peer_id")).filter(|id| *id != 0);
    // Forwarded messages carry no peer id; they are addressed like direct messages.
    let (sender_id, peer_id) = match (from_id, peer) {
        (Some(sender), Some(peer)) => (sender, peer),
        (Some(sender), None) => (sender, sender),
        (None, Some(peer)) => (peer, peer),
        (None, None) => {
            return Err(BotError::Normalization(
                "message object has neither from_id nor peer_id".to_string(),
            ))
        }
    };

    let action = obj.get("action");
    let action_name = action
        .and_then(|a| a.get("type"))
        .and_then(Value::as_str)
        .filter(|a| !a.is_empty())
        .map(str::to_string);
    let action_target_id = action.and_then(|a| coerce_i64(a.get("member_id")));

    let forwarded = obj
        .get("fwd_messages")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|item| match parse_message_object(item) {
                    Ok(message) => Some(message),
                    Err(e) => {
                        warn!(error = %e, "Skipping malformed forwarded message");
                        None
                    }
                })
                .collect()
        })
        .unwrap_or_default();

    Ok(Message {
        id: coerce_i64(obj.get("id")).unwrap_or(0),
        conversation_message_id: coerce_i64(obj.get("conversation_message_id")),
        body,
        sender_id,
        conversation_id: conversation_id(sender_id, peer_id),
        peer_id,
        is_outbound: coerce_i64(obj.get("out")).unwrap_or(0) == 1,
        read_state: ReadState::Unread,
        action: action_name,
        action_target_id,
        forwarded,
        timestamp: coerce_i64(obj.get("date")).unwrap_or(0),
    })
}
