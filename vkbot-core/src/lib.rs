//! # vkbot-core
//!
//! Core types and traits for the long-poll bot engine: [`Message`], [`Reply`], [`Cursor`],
//! the [`RemoteApi`] trait, the [`BotError`] taxonomy and tracing initialization.
//! Transport-agnostic; used by vkbot-api, vkbot-longpoll, vkbot-router and vkbot.

pub mod api;
pub mod error;
pub mod logger;
pub mod types;

pub use api::RemoteApi;
pub use error::{BotError, Result};
pub use logger::init_tracing;
pub use types::{
    AccountMode, Button, ButtonAction, Cursor, Keyboard, LongPollRequest, Mention, Message,
    ReadState, RelationshipDirection, Reply, ReplyTarget, SessionInfo, ACTION_CHAT_INVITE_USER,
    ACTION_CHAT_INVITE_USER_BY_LINK, ACTION_CHAT_KICK_USER, ACTION_FRIEND_ADD,
    ACTION_FRIEND_DELETE, CHAT_OFFSET,
};
