// ABOUTME: File-backed conversation records keyed by display name
// One pretty-printed JSON record per conversation inside the conversations directory

use crate::data::conversation::{Conversation, ConversationRecord};
use crate::utils::error::{ChatMeterError, Result};
use byte_unit::{Byte, UnitType};
use glob::glob;
use std::fs;
use std::path::{Path, PathBuf};

/// A conversation file found on disk
#[derive(Debug, Clone)]
pub struct SavedConversation {
    pub name: String,
    pub path: PathBuf,
    pub size_bytes: u64,
}

impl SavedConversation {
    pub fn display_size(&self) -> String {
        let adjusted = Byte::from_u64(self.size_bytes).get_appropriate_unit(UnitType::Binary);
        format!("{:.1}", adjusted)
    }
}

pub struct ConversationRepository {
    dir: PathBuf,
}

impl ConversationRepository {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File stem for a display name: spaces become dashes
    pub fn file_stem(name: &str) -> String {
        name.trim()
            .chars()
            .map(|c| if c.is_whitespace() { '-' } else { c })
            .filter(|c| c.is_alphanumeric() || *c == '-' || *c == '_')
            .collect()
    }

    fn path_for(&self, name: &str) -> Result<PathBuf> {
        let stem = Self::file_stem(name);
        if stem.is_empty() {
            return Err(ChatMeterError::ConversationNotFound(name.to_string()));
        }
        Ok(self.dir.join(format!("{}.json", stem)))
    }

    /// Write the conversation under its display name, replacing any previous record
    pub fn save(&self, conversation: &Conversation) -> Result<PathBuf> {
        fs::create_dir_all(&self.dir)?;

        let record = conversation.to_persisted_form();
        let path = self.path_for(&record.display_name)?;
        let contents = serde_json::to_string_pretty(&record)?;
        fs::write(&path, contents)?;

        tracing::info!(path = %path.display(), messages = record.messages.len(), "saved conversation");
        Ok(path)
    }

    pub fn load(&self, name: &str) -> Result<Conversation> {
        let path = self.path_for(name)?;
        if !path.exists() {
            return Err(ChatMeterError::ConversationNotFound(name.to_string()));
        }

        let contents = fs::read_to_string(&path)?;
        let record: ConversationRecord = serde_json::from_str(&contents)?;
        tracing::debug!(path = %path.display(), "loaded conversation");
        Ok(Conversation::from_persisted_form(record))
    }

    /// Saved conversations sorted by name; names use spaces in place of dashes
    pub fn list(&self) -> Result<Vec<SavedConversation>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }

        let pattern = self.dir.join("*.json");
        let pattern = pattern.to_string_lossy();
        let mut saved = Vec::new();

        for entry in glob(&pattern)
            .map_err(|e| ChatMeterError::Config(format!("Glob pattern error: {}", e)))?
        {
            let path = match entry {
                Ok(path) => path,
                Err(e) => {
                    tracing::warn!("skipping unreadable conversation file: {}", e);
                    continue;
                }
            };
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let size_bytes = fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
            saved.push(SavedConversation {
                name: stem.replace('-', " "),
                path: path.clone(),
                size_bytes,
            });
        }

        saved.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(saved)
    }
}
