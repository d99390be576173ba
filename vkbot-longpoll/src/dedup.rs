//! Time-windowed duplicate filter.
//!
//! The platform occasionally re-delivers the same event on consecutive polls. An id seen within
//! the trailing window is dropped; an unseen or stale id passes and is recorded. Stale entries
//! are evicted during each pass, so the map only holds ids from the last window.
//!
//! Messages without a global id (community chats deliver them with id 0) are keyed by
//! `(peer_id, conversation_message_id)`. A message with neither is always admitted.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tracing::debug;
use vkbot_core::Message;

pub const DEFAULT_DEDUP_WINDOW: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum DedupKey {
    Id(i64),
    Conversation { peer_id: i64, sequence: i64 },
}

impl DedupKey {
    fn of(message: &Message) -> Option<Self> {
        if message.id != 0 {
            return Some(DedupKey::Id(message.id));
        }
        message
            .conversation_message_id
            .filter(|seq| *seq != 0)
            .map(|sequence| DedupKey::Conversation {
                peer_id: message.peer_id,
                sequence,
            })
    }
}

#[derive(Debug, Clone)]
pub struct DedupCache {
    window: Duration,
    seen: HashMap<DedupKey, Instant>,
}

impl Default for DedupCache {
    fn default() -> Self {
        Self::new()
    }
}

impl DedupCache {
    pub fn new() -> Self {
        Self::with_window(DEFAULT_DEDUP_WINDOW)
    }

    pub fn with_window(window: Duration) -> Self {
        Self {
            window,
            seen: HashMap::new(),
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }

    pub fn admit(&mut self, messages: Vec<Message>) -> Vec<Message> {
        self.admit_at(messages, Instant::now())
    }

    /// Same as [`DedupCache::admit`] with an explicit clock reading.
    pub fn admit_at(&mut self, messages: Vec<Message>, now: Instant) -> Vec<Message> {
        let window = self.window;
        self.seen
            .retain(|_, first_seen| now.saturating_duration_since(*first_seen) < window);

        let incoming = messages.len();
        let admitted: Vec<Message> = messages
            .into_iter()
            .filter(|message| match DedupKey::of(message) {
                Some(key) if self.seen.contains_key(&key) => false,
                Some(key) => {
                    self.seen.insert(key, now);
                    true
                }
                None => true,
            })
            .collect();

        if admitted.len() < incoming {
            debug!(
                dropped = incoming - admitted.len(),
                admitted = admitted.len(),
                "Dropped re-delivered messages"
            );
        }
        admitted
    }
}
