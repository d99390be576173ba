use thiserror::Error;

#[derive(Error, Debug)]
pub enum BotError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Long poll protocol version rejected (supported {min_version}..={max_version})")]
    ProtocolVersion { min_version: i64, max_version: i64 },

    #[error("Long poll session expired (failed={0})")]
    SessionExpired(i64),

    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    #[error("Normalization error: {0}")]
    Normalization(String),

    #[error("Handler error: {0}")]
    Handler(String),

    #[error("Remote error {code}: {message}")]
    Remote { code: i64, message: String },

    #[error("Long poll session acquisition failed: {0}")]
    SessionAcquisition(#[source] Box<BotError>),

    #[error("Long poll gave up after {attempts} attempts")]
    RetryLimit { attempts: usize },

    #[error("Unhandled error (no error handler registered): {0}")]
    Unhandled(#[source] Box<BotError>),

    #[error("Config error: {0}")]
    Config(String),
}

impl BotError {
    /// Errors after which the ingestion loop must stop instead of trying again next tick.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            BotError::ProtocolVersion { .. }
                | BotError::SessionAcquisition(_)
                | BotError::Unhandled(_)
        )
    }
}

impl From<serde_json::Error> for BotError {
    fn from(e: serde_json::Error) -> Self {
        BotError::MalformedResponse(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, BotError>;
