//! [`VkApiClient`]: form-encoded method calls and long-poll requests over reqwest.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use tracing::{debug, info, instrument, warn};
use vkbot_core::{
    AccountMode, BotError, LongPollRequest, RelationshipDirection, RemoteApi, Reply, ReplyTarget,
    Result, SessionInfo,
};

use crate::config::ApiConfig;
use crate::wire::{decode_envelope, FriendDelete, FriendRequests, GroupInfo, GroupsById, UserInfo};

const METHOD_USERS_GET: &str = "users.get";
const METHOD_GROUPS_GET_BY_ID: &str = "groups.getById";
const METHOD_MESSAGES_GET_LONG_POLL_SERVER: &str = "messages.getLongPollServer";
const METHOD_GROUPS_GET_LONG_POLL_SERVER: &str = "groups.getLongPollServer";
const METHOD_MESSAGES_SEND: &str = "messages.send";
const METHOD_MESSAGES_MARK_AS_READ: &str = "messages.markAsRead";
const METHOD_FRIENDS_GET_REQUESTS: &str = "friends.getRequests";
const METHOD_FRIENDS_ADD: &str = "friends.add";
const METHOD_FRIENDS_DELETE: &str = "friends.delete";

/// Extra time on top of the long-poll `wait` before the HTTP request is abandoned.
const LONG_POLL_TIMEOUT_MARGIN: Duration = Duration::from_secs(10);

/// Who the token belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Identity {
    pub mode: AccountMode,
    pub id: i64,
}

/// HTTP implementation of [`RemoteApi`].
#[derive(Debug, Clone)]
pub struct VkApiClient {
    client: Client,
    config: ApiConfig,
}

impl VkApiClient {
    pub fn new(config: ApiConfig) -> Result<Self> {
        let client = Client::builder()
            .build()
            .map_err(|e| BotError::Config(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self { client, config })
    }

    pub fn config(&self) -> &ApiConfig {
        &self.config
    }

    /// Calls `method` and decodes its `response` field into `T`.
    pub async fn call_method<T: DeserializeOwned>(
        &self,
        method: &str,
        params: &[(&str, String)],
    ) -> Result<T> {
        let body = self.call(method, params).await?;
        decode_envelope(&body)
    }

    /// Raw method call. Sleeps `request_interval` afterwards whatever the outcome.
    async fn call(&self, method: &str, params: &[(&str, String)]) -> Result<String> {
        let mut form: Vec<(&str, String)> = params.to_vec();
        form.push(("access_token", self.config.token.clone()));
        form.push(("v", self.config.version.clone()));
        if let Some(lang) = &self.config.lang {
            form.push(("lang", lang.clone()));
        }
        if self.config.https {
            form.push(("https", "1".to_string()));
        }

        debug!(method = %method, "step: api call");
        let outcome = match self
            .client
            .post(format!("{}{}", self.config.api_url, method))
            .form(&form)
            .send()
            .await
        {
            Ok(response) => response
                .text()
                .await
                .map_err(|e| BotError::Network(e.to_string())),
            Err(e) => Err(BotError::Network(e.to_string())),
        };
        tokio::time::sleep(self.config.request_interval).await;

        match &outcome {
            Ok(body) => debug!(method = %method, body_len = body.len(), "step: api call done"),
            Err(e) => warn!(method = %method, error = %e, "api call failed"),
        }
        outcome
    }

    pub async fn me(&self) -> Result<UserInfo> {
        let users: Vec<UserInfo> = self
            .call_method(METHOD_USERS_GET, &[("fields", "screen_name".to_string())])
            .await?;
        users
            .into_iter()
            .next()
            .ok_or_else(|| BotError::MalformedResponse("users.get returned no users".to_string()))
    }

    pub async fn current_group(&self) -> Result<GroupInfo> {
        let groups: GroupsById = self
            .call_method(METHOD_GROUPS_GET_BY_ID, &[("fields", "screen_name".to_string())])
            .await?;
        groups.into_first().ok_or_else(|| {
            BotError::MalformedResponse("groups.getById returned no groups".to_string())
        })
    }

    /// Detects whether the token is a group or a user token and remembers the group id.
    /// A configured group id wins without any remote call.
    #[instrument(skip(self))]
    pub async fn detect_identity(&mut self) -> Result<Identity> {
        if let Some(group_id) = self.config.group_id {
            return Ok(Identity {
                mode: AccountMode::Group,
                id: group_id,
            });
        }
        match self.current_group().await {
            Ok(group) if group.id != 0 => {
                info!(group_id = group.id, name = %group.name, "Token belongs to a group");
                self.config.group_id = Some(group.id);
                return Ok(Identity {
                    mode: AccountMode::Group,
                    id: group.id,
                });
            }
            Ok(_) => {}
            Err(e) => debug!(error = %e, "groups.getById failed, trying users.get"),
        }
        let user = self.me().await?;
        info!(user_id = user.id, "Token belongs to a user");
        Ok(Identity {
            mode: AccountMode::User,
            id: user.id,
        })
    }

    fn random_id() -> String {
        // 31 bits: the remote expects a signed 32-bit value.
        ((uuid::Uuid::new_v4().as_u128() >> 97) as u32).to_string()
    }

    fn long_poll_url(request: &LongPollRequest) -> String {
        if request.server.starts_with("http://") || request.server.starts_with("https://") {
            request.server.clone()
        } else {
            format!("https://{}", request.server)
        }
    }
}

#[async_trait]
impl RemoteApi for VkApiClient {
    async fn acquire_session(&self, mode: AccountMode) -> Result<SessionInfo> {
        match mode {
            AccountMode::User => {
                let need_pts = if self.config.need_pts { "1" } else { "0" };
                self.call_method(
                    METHOD_MESSAGES_GET_LONG_POLL_SERVER,
                    &[
                        ("need_pts", need_pts.to_string()),
                        ("lp_version", self.config.lp_version.to_string()),
                    ],
                )
                .await
            }
            AccountMode::Group => {
                let group_id = self.config.group_id.ok_or_else(|| {
                    BotError::Config("group account mode requires a group id".to_string())
                })?;
                self.call_method(
                    METHOD_GROUPS_GET_LONG_POLL_SERVER,
                    &[("group_id", group_id.to_string())],
                )
                .await
            }
        }
    }

    async fn long_poll(&self, request: &LongPollRequest) -> Result<Vec<u8>> {
        let mut query: Vec<(&str, String)> = vec![
            ("act", "a_check".to_string()),
            ("key", request.key.clone()),
            ("ts", request.cursor.to_string()),
            ("wait", request.wait.to_string()),
        ];
        if request.account_mode == AccountMode::User {
            query.push(("mode", request.mode.to_string()));
            query.push(("version", request.version.to_string()));
        }

        let timeout = Duration::from_secs(u64::from(request.wait)) + LONG_POLL_TIMEOUT_MARGIN;
        let response = self
            .client
            .get(Self::long_poll_url(request))
            .query(&query)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| BotError::Network(e.to_string()))?;

        let status = response.status();
        if status.is_server_error() {
            return Err(BotError::Network(format!("long poll server returned {}", status)));
        }
        let body = response
            .bytes()
            .await
            .map_err(|e| BotError::Network(e.to_string()))?;
        Ok(body.to_vec())
    }

    async fn send_reply(&self, target: &ReplyTarget, reply: &Reply) -> Result<i64> {
        let (key, id) = match target {
            ReplyTarget::Peer(id) => ("peer_id", *id),
            ReplyTarget::Chat(id) => ("chat_id", *id),
            ReplyTarget::User(id) => ("user_id", *id),
        };
        let mut params = vec![
            (key, id.to_string()),
            ("message", reply.text.clone()),
            ("dont_parse_links", "1".to_string()),
            ("random_id", Self::random_id()),
        ];
        if let Some(keyboard) = &reply.keyboard {
            params.push(("keyboard", serde_json::to_string(keyboard)?));
        }
        self.call_method(METHOD_MESSAGES_SEND, &params).await
    }

    async fn mark_read(&self, message_id: i64) -> Result<()> {
        let _: i64 = self
            .call_method(
                METHOD_MESSAGES_MARK_AS_READ,
                &[("message_ids", message_id.to_string())],
            )
            .await?;
        Ok(())
    }

    async fn pending_relationships(&self, direction: RelationshipDirection) -> Result<Vec<i64>> {
        let mut params = Vec::new();
        if direction == RelationshipDirection::Outgoing {
            params.push(("out", "1".to_string()));
        }
        let requests: FriendRequests = self
            .call_method(METHOD_FRIENDS_GET_REQUESTS, &params)
            .await?;
        Ok(requests.items)
    }

    async fn accept_relationship(&self, user_id: i64) -> Result<bool> {
        // 1: request sent, 2: request approved, 4: repeated request
        let status: i64 = self
            .call_method(METHOD_FRIENDS_ADD, &[("user_id", user_id.to_string())])
            .await?;
        Ok(status == 1 || status == 2)
    }

    async fn remove_relationship(&self, user_id: i64) -> Result<bool> {
        let result: FriendDelete = self
            .call_method(METHOD_FRIENDS_DELETE, &[("user_id", user_id.to_string())])
            .await?;
        Ok(result.success == 1)
    }
}
