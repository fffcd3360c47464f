pub mod commands;
pub mod config;
pub mod controller;
pub mod settings;

#[cfg(test)]
mod controller_test;

pub use commands::{classify, Command, Input};
pub use config::AppConfig;
pub use controller::{
    save_conversation, DialogueOutcome, DialogueState, EndReason, ExchangeRecord, Services,
    SessionController,
};
pub use settings::{Parameter, RequestSettings};
