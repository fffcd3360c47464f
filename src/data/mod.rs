pub mod client;
pub mod conversation;
pub mod database;
pub mod export;
pub mod ledger;
pub mod persistence;
pub mod session;

pub use client::{Completion, CompletionClient, FinishReason, OpenAiClient};
pub use conversation::{Conversation, ConversationRecord, Message, MessageRole};
pub use database::AccountDatabase;
pub use ledger::{Account, AccountLedger, AccountRole, AccountStore, InMemoryLedger, NewAccount};
pub use persistence::{ConversationRepository, SavedConversation};
pub use session::Session;
