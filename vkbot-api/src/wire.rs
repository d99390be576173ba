//! Response shapes of the remote methods and the method-call envelope decoder.

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use vkbot_core::{BotError, Result};

const BODY_PREVIEW_LEN: usize = 200;

#[derive(Debug, Deserialize)]
struct RemoteErrorBody {
    error_code: i64,
    #[serde(default)]
    error_msg: String,
}

/// Decodes `{"response": …}` into `T`; `{"error": …}` becomes [`BotError::Remote`],
/// anything that is not such an envelope becomes [`BotError::MalformedResponse`].
pub fn decode_envelope<T: DeserializeOwned>(body: &str) -> Result<T> {
    let value: Value = serde_json::from_str(body).map_err(|_| {
        BotError::MalformedResponse(format!("response is not json: {}", preview(body)))
    })?;

    if let Some(error) = value.get("error") {
        let error: RemoteErrorBody = serde_json::from_value(error.clone()).map_err(|e| {
            BotError::MalformedResponse(format!("unreadable error object: {}", e))
        })?;
        return Err(BotError::Remote {
            code: error.error_code,
            message: error.error_msg,
        });
    }

    let response = value
        .get("response")
        .cloned()
        .ok_or_else(|| BotError::MalformedResponse(format!("no response field: {}", preview(body))))?;
    serde_json::from_value(response).map_err(|e| BotError::MalformedResponse(e.to_string()))
}

fn preview(body: &str) -> &str {
    match body.char_indices().nth(BODY_PREVIEW_LEN) {
        Some((idx, _)) => &body[..idx],
        None => body,
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct UserInfo {
    pub id: i64,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    #[serde(default)]
    pub screen_name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GroupInfo {
    pub id: i64,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub screen_name: Option<String>,
}

/// `groups.getById` returns a bare array before 5.194 and `{"groups": [...]}` after.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum GroupsById {
    List(Vec<GroupInfo>),
    Wrapped { groups: Vec<GroupInfo> },
}

impl GroupsById {
    pub fn into_first(self) -> Option<GroupInfo> {
        match self {
            GroupsById::List(groups) | GroupsById::Wrapped { groups } => groups.into_iter().next(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct FriendRequests {
    #[serde(default)]
    pub items: Vec<i64>,
}

#[derive(Debug, Deserialize)]
pub struct FriendDelete {
    #[serde(default)]
    pub success: i64,
}
