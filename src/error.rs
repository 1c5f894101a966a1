use serde::Serialize;
use thiserror::Error;

use crate::panel::PanelError;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Panel error: {0}")]
    Panel(#[from] PanelError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Notification error: {0}")]
    Notify(String),

    #[error("Panel {0} is at capacity")]
    Capacity(String),

    #[error("Unknown error: {0}")]
    Unknown(String),
}

impl AppError {
    /// Short message key safe to show to an end user; details stay in the logs.
    pub fn user_message_key(&self) -> &'static str {
        match self {
            AppError::Panel(e) => e.user_message_key(),
            AppError::Capacity(_) => "err_capacity",
            _ => "err_generic",
        }
    }
}

// Serialized as its display string so it can travel inside job reasons and replies
impl Serialize for AppError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(self.to_string().as_str())
    }
}

pub type AppResult<T> = Result<T, AppError>;
