use std::path::PathBuf;

/// Core error type for the status relay.
///
/// Adapter crates map their specific errors into this type so the dispatcher
/// can tell a flaky network apart from a recipient that will never accept a
/// message again.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("storage error: {path}: {reason}")]
    Storage { path: PathBuf, reason: String },

    /// Network hiccup, timeout, 5xx or flood control. Safe to retry.
    #[error("transient error: {message}")]
    Transient {
        message: String,
        retry_after: Option<std::time::Duration>,
    },

    /// The recipient cannot receive messages (blocked the bot, chat gone, ...).
    #[error("recipient {chat_id} rejected delivery: {reason}")]
    Recipient { chat_id: i64, reason: String },

    /// A group was upgraded to a supergroup and now lives under a new id.
    #[error("chat {from} migrated to {to}")]
    ChatMigrated { from: i64, to: i64 },

    #[error("parse error: {0}")]
    Parse(String),

    #[error("external error: {0}")]
    External(String),
}

impl Error {
    pub fn transient(message: impl Into<String>) -> Self {
        Error::Transient {
            message: message.into(),
            retry_after: None,
        }
    }

    pub fn storage(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Error::Storage {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Transient { .. })
    }

    /// Permanent per-recipient failures: retrying will not help.
    pub fn is_permanent_recipient(&self) -> bool {
        matches!(self, Error::Recipient { .. })
    }
}

pub type Result<T> = std::result::Result<T, Error>;
