//! Error types for the automod engine
//!
//! Configuration errors surface while parsing a ruleset, evaluation errors while
//! running a trigger or condition, and moderation errors while applying effects.

use thiserror::Error;

/// Errors raised by moderation primitives
#[derive(Debug, Error)]
pub enum ModerationError {
    /// The target is already in the requested state (message gone, member left, ...)
    #[error("Already applied: {0}")]
    AlreadyApplied(String),

    /// Discord refused the request with a JSON error code
    #[error("Discord rejected the request ({code}): {message}")]
    Rejected { code: isize, message: String },

    /// Transport or other serenity failure
    #[error("Discord API error: {0}")]
    Discord(#[from] Box<poise::serenity_prelude::Error>),

    /// Generic error
    #[error("Moderation error: {0}")]
    Other(String),
}

/// JSON error codes meaning the target no longer exists: unknown member, message and ban
const GONE_CODES: [isize; 3] = [10007, 10008, 10026];

impl ModerationError {
    /// Whether the failure means the desired state already holds
    pub fn is_already_applied(&self) -> bool {
        matches!(self, Self::AlreadyApplied(_))
    }

    /// Classify a Discord JSON error
    pub fn from_code(code: isize, message: impl Into<String>) -> Self {
        if GONE_CODES.contains(&code) {
            Self::AlreadyApplied(message.into())
        } else {
            Self::Rejected {
                code,
                message: message.into(),
            }
        }
    }
}

impl From<poise::serenity_prelude::Error> for ModerationError {
    fn from(error: poise::serenity_prelude::Error) -> Self {
        use poise::serenity_prelude::{Error, HttpError};
        match &error {
            Error::Http(HttpError::UnsuccessfulRequest(response)) => {
                Self::from_code(response.error.code, response.error.message.clone())
            }
            _ => Self::Discord(Box::new(error)),
        }
    }
}

/// Errors that can occur while parsing or evaluating rulesets
#[derive(Debug, Error)]
pub enum AutomodError {
    /// A rule part's settings payload could not be deserialized
    #[error("Invalid settings for part {part_id} (type {type_id}): {source}")]
    InvalidSettings {
        part_id: i64,
        type_id: i32,
        #[source]
        source: serde_json::Error,
    },

    /// A rule part received settings of a different type than it declares
    #[error("Settings mismatch for rule part {0}")]
    SettingsMismatch(&'static str),

    /// A configured regex failed to compile
    #[error("Invalid regex: {0}")]
    InvalidRegex(#[from] regex::Error),

    /// Evaluation needed context that the event did not carry
    #[error("Missing context: {0}")]
    MissingContext(&'static str),

    /// Persistence failure
    #[error("Store error: {0}")]
    Store(String),

    /// Scheduled event failure
    #[error("Scheduler error: {0}")]
    Scheduler(String),

    /// Reputation service failure
    #[error("Reputation service error: {0}")]
    Reputation(String),

    /// Moderation primitive failure
    #[error(transparent)]
    Moderation(#[from] ModerationError),
}

impl AutomodError {
    /// Whether the error means the desired state already holds
    pub fn is_already_applied(&self) -> bool {
        matches!(self, Self::Moderation(e) if e.is_already_applied())
    }
}

/// Result type for automod operations
pub type AutomodResult<T> = Result<T, AutomodError>;
