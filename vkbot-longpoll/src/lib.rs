//! # vkbot-longpoll
//!
//! Ingestion side of the engine: the long-poll [`LongPollSession`] state machine, the update
//! [`normalize`] functions for both wire shapes, and the [`DedupCache`] duplicate filter.

pub mod dedup;
pub mod normalize;
pub mod session;

pub use dedup::{DedupCache, DEFAULT_DEDUP_WINDOW};
pub use normalize::{normalize, normalize_batch, parse_updates, RawUpdate, WireFormat};
pub use session::{
    LongPollSession, PollPayload, SessionSettings, SessionState, DEFAULT_MAX_ATTEMPTS,
    DEFAULT_MODE, DEFAULT_VERSION, DEFAULT_WAIT,
};
