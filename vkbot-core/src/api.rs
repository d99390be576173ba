//! Remote API abstraction consumed by the long-poll session and the scheduler.
//!
//! [`RemoteApi`] is transport-agnostic; `vkbot-api` provides the HTTP implementation and tests
//! substitute scripted doubles.

use crate::error::Result;
use crate::types::{
    AccountMode, LongPollRequest, RelationshipDirection, Reply, ReplyTarget, SessionInfo,
};
use async_trait::async_trait;

/// Named remote calls the engine needs. Every call returns a decoded result or a classified
/// [`crate::BotError`] (`Network`, `MalformedResponse`, `Remote`).
#[async_trait]
pub trait RemoteApi: Send + Sync {
    /// Obtains a long-poll server, key and starting cursor for the given account mode.
    async fn acquire_session(&self, mode: AccountMode) -> Result<SessionInfo>;

    /// Performs one long-poll request and returns the raw response body.
    /// The remote holds the request open for up to `request.wait` seconds.
    async fn long_poll(&self, request: &LongPollRequest) -> Result<Vec<u8>>;

    /// Sends a reply and returns the id of the created message.
    async fn send_reply(&self, target: &ReplyTarget, reply: &Reply) -> Result<i64>;

    async fn mark_read(&self, message_id: i64) -> Result<()>;

    /// Ids of users with pending relationship requests in the given direction.
    async fn pending_relationships(&self, direction: RelationshipDirection) -> Result<Vec<i64>>;

    async fn accept_relationship(&self, user_id: i64) -> Result<bool>;

    async fn remove_relationship(&self, user_id: i64) -> Result<bool>;
}
