//! Long-poll session state machine.
//!
//! Holds the server address, key and cursor of one long-poll session and runs the platform's
//! failure protocol on every poll:
//!
//! | `failed` | meaning                  | action                                      |
//! |----------|--------------------------|---------------------------------------------|
//! | absent/0 | success                  | adopt cursor, return payload                |
//! | 1        | cursor outdated          | adopt the cursor from the response, retry   |
//! | 2, 3     | key expired / invalidated| re-acquire the session, retry               |
//! | 4        | protocol version rejected| fail with [`BotError::ProtocolVersion`]     |
//!
//! Retries run in a bounded loop (`max_attempts`). Every long-poll attempt, successful or not,
//! is followed by the fixed request interval.

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tracing::{debug, info, instrument, warn};
use vkbot_core::{AccountMode, BotError, Cursor, LongPollRequest, RemoteApi, Result};

pub const DEFAULT_WAIT: u32 = 25;
pub const MODE_GET_ATTACHMENTS: u32 = 2;
pub const DEFAULT_MODE: u32 = MODE_GET_ATTACHMENTS;
pub const DEFAULT_VERSION: u32 = 2;
pub const DEFAULT_MAX_ATTEMPTS: usize = 5;
pub const DEFAULT_REQUEST_INTERVAL: Duration = Duration::from_millis(400);

/// Configured session parameters. Re-initialization always restores `wait`, `mode` and
/// `version` from here, never from the acquisition response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSettings {
    pub account_mode: AccountMode,
    pub wait: u32,
    pub mode: u32,
    pub version: u32,
    pub request_interval: Duration,
    /// Upper bound on long-poll requests issued by one `poll()` call.
    pub max_attempts: usize,
}

impl SessionSettings {
    pub fn new(account_mode: AccountMode) -> Self {
        Self {
            account_mode,
            wait: DEFAULT_WAIT,
            mode: DEFAULT_MODE,
            version: DEFAULT_VERSION,
            request_interval: DEFAULT_REQUEST_INTERVAL,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }

    pub fn with_wait(mut self, wait: u32) -> Self {
        self.wait = wait;
        self
    }

    pub fn with_version(mut self, version: u32) -> Self {
        self.version = version;
        self
    }

    pub fn with_request_interval(mut self, interval: Duration) -> Self {
        self.request_interval = interval;
        self
    }

    pub fn with_max_attempts(mut self, attempts: usize) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Uninitialized,
    Active,
    Recovering,
}

/// Successful poll result: the cursor after the poll and the raw body for normalization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollPayload {
    pub cursor: Cursor,
    pub body: Vec<u8>,
}

#[derive(Debug, Deserialize)]
struct FailEnvelope {
    #[serde(default)]
    failed: i64,
    #[serde(default)]
    ts: Option<Cursor>,
    #[serde(default)]
    min_version: i64,
    #[serde(default)]
    max_version: i64,
}

pub struct LongPollSession {
    api: Arc<dyn RemoteApi>,
    settings: SessionSettings,
    state: SessionState,
    server: String,
    key: String,
    cursor: Cursor,
    wait: u32,
    mode: u32,
    version: u32,
}

impl LongPollSession {
    /// Creates an uninitialized session; the first `poll()` acquires the server and key.
    pub fn new(api: Arc<dyn RemoteApi>, settings: SessionSettings) -> Self {
        Self {
            api,
            wait: settings.wait,
            mode: settings.mode,
            version: settings.version,
            settings,
            state: SessionState::Uninitialized,
            server: String::new(),
            key: String::new(),
            cursor: Cursor::default(),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn cursor(&self) -> &Cursor {
        &self.cursor
    }

    pub fn server(&self) -> &str {
        &self.server
    }

    pub fn account_mode(&self) -> AccountMode {
        self.settings.account_mode
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    /// Acquires a session when none is held. Acquisition failures are returned as
    /// [`BotError::SessionAcquisition`] and are not retried.
    pub async fn ensure_initialized(&mut self) -> Result<()> {
        if self.server.is_empty() || self.key.is_empty() {
            self.initialize().await?;
        }
        Ok(())
    }

    #[instrument(skip(self), fields(account_mode = %self.settings.account_mode))]
    async fn initialize(&mut self) -> Result<()> {
        let info = self
            .api
            .acquire_session(self.settings.account_mode)
            .await
            .map_err(|e| BotError::SessionAcquisition(Box::new(e)))?;

        self.server = info.server;
        self.key = info.key;
        self.cursor = info.cursor;
        self.wait = self.settings.wait;
        self.mode = self.settings.mode;
        self.version = self.settings.version;
        self.state = SessionState::Active;

        info!(
            server = %self.server,
            cursor = %self.cursor,
            "step: long poll session acquired"
        );
        Ok(())
    }

    fn request(&self) -> LongPollRequest {
        LongPollRequest {
            account_mode: self.settings.account_mode,
            server: self.server.clone(),
            key: self.key.clone(),
            cursor: self.cursor.clone(),
            wait: self.wait,
            mode: self.mode,
            version: self.version,
        }
    }

    fn advance_cursor(&mut self, next: Cursor) {
        let previous = self.cursor.clone();
        if !self.cursor.advance(next.clone()) {
            warn!(current = %previous, rejected = %next, "Ignoring backwards cursor move");
        }
    }

    /// Issues long-poll requests until one succeeds, a terminal failure occurs, or
    /// `max_attempts` requests have been made.
    ///
    /// Network errors are returned after the request interval; the caller's next cycle retries.
    #[instrument(skip(self), fields(cursor = %self.cursor))]
    pub async fn poll(&mut self) -> Result<PollPayload> {
        self.ensure_initialized().await?;

        for attempt in 1..=self.settings.max_attempts {
            let request = self.request();
            let outcome = self.api.long_poll(&request).await;
            tokio::time::sleep(self.settings.request_interval).await;
            let body = outcome?;

            let envelope: FailEnvelope = serde_json::from_slice(&body).map_err(|e| {
                BotError::MalformedResponse(format!("long poll response: {}", e))
            })?;

            match envelope.failed {
                0 => {
                    if let Some(ts) = envelope.ts {
                        self.advance_cursor(ts);
                    }
                    debug!(attempt, cursor = %self.cursor, "step: long poll succeeded");
                    return Ok(PollPayload {
                        cursor: self.cursor.clone(),
                        body,
                    });
                }
                1 => {
                    let ts = envelope.ts.ok_or_else(|| {
                        BotError::MalformedResponse("failed=1 without ts".to_string())
                    })?;
                    debug!(attempt, new_cursor = %ts, "Long poll cursor outdated");
                    self.advance_cursor(ts);
                }
                code @ (2 | 3) => {
                    let expired = BotError::SessionExpired(code);
                    warn!(attempt, error = %expired, "step: long poll session recovering");
                    self.state = SessionState::Recovering;
                    self.initialize().await?;
                }
                4 => {
                    return Err(BotError::ProtocolVersion {
                        min_version: envelope.min_version,
                        max_version: envelope.max_version,
                    });
                }
                other => {
                    return Err(BotError::MalformedResponse(format!(
                        "unknown long poll failure code {}",
                        other
                    )));
                }
            }
        }

        Err(BotError::RetryLimit {
            attempts: self.settings.max_attempts,
        })
    }
}
