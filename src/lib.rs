// ABOUTME: Main library module that exports the public API
// Central module for the Chat-Meter client

pub mod app;
pub mod data;
pub mod ui;
pub mod utils;

// Re-export commonly used types
pub use app::{AppConfig, EndReason, RequestSettings, Services, SessionController};
pub use data::{Account, AccountLedger, Conversation, CompletionClient};
pub use utils::{ChatMeterError, CostCalculator, Result};
