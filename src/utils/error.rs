// ABOUTME: Centralized error handling for the application
// Provides consistent error types and conversions

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ChatMeterError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Could not find a price for model '{model}'. Select a different model.")]
    PricingLookupFailed { model: String },

    #[error("Could not complete request: {0}")]
    RemoteCall(String),

    #[error("Insufficient funds: ${required:.5} required, ${available:.5} available")]
    InsufficientFunds { required: f64, available: f64 },

    #[error("Username '{0}' is already taken")]
    DuplicateUsername(String),

    #[error("Account '{0}' not found")]
    AccountNotFound(String),

    #[error("Invalid command '-{0}'. Type -help for a list of commands.")]
    InvalidCommand(String),

    #[error("Unknown parameter '{0}'")]
    UnknownParameter(String),

    #[error("Invalid value '{value}' for {name}: {reason}")]
    InvalidParameter {
        name: String,
        value: String,
        reason: String,
    },

    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    #[error("Conversation '{0}' does not exist")]
    ConversationNotFound(String),

    #[error("Terminal error: {0}")]
    Terminal(String),
}

impl ChatMeterError {
    /// Errors that leave the caller free to re-prompt without any state change
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::RemoteCall(_)
                | Self::DuplicateUsername(_)
                | Self::InvalidCommand(_)
                | Self::UnknownParameter(_)
                | Self::InvalidParameter { .. }
                | Self::ConversationNotFound(_)
        )
    }
}

impl<T> From<std::sync::PoisonError<T>> for ChatMeterError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        ChatMeterError::Config(format!("Lock poisoned: {}", err))
    }
}

pub type Result<T> = std::result::Result<T, ChatMeterError>;
