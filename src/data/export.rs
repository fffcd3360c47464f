// ABOUTME: Plain-text transcript export of a conversation
// Default file name is {first_name}_{date}_{time}.txt; the .txt suffix is always enforced

use crate::data::conversation::Conversation;
use crate::utils::error::Result;
use chrono::{DateTime, Local};
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

/// File name for an export; a caller-supplied name gets `.txt` appended if missing
pub fn transcript_file_name(
    requested: Option<&str>,
    first_name: &str,
    now: DateTime<Local>,
) -> String {
    match requested.map(str::trim).filter(|name| !name.is_empty()) {
        Some(name) if name.to_lowercase().ends_with(".txt") => name.to_string(),
        Some(name) => format!("{}.txt", name),
        None => {
            let first = if first_name.trim().is_empty() {
                "transcript"
            } else {
                first_name.trim()
            };
            format!(
                "{}_{}_{}.txt",
                first,
                now.format("%Y-%m-%d"),
                now.format("%H-%M-%S")
            )
        }
    }
}

pub fn render_transcript(conversation: &Conversation) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Conversation: {}", conversation.display_name());
    let _ = writeln!(
        out,
        "Created: {}",
        conversation.created_at().format("%Y-%m-%d %H:%M:%S")
    );
    let _ = writeln!(out, "{}", "-".repeat(50));
    for message in conversation.messages() {
        let _ = writeln!(out, "{}: {}", message.role, message.content);
    }
    out
}

/// Write the transcript into `dir` and return the file path
pub fn export_transcript(
    conversation: &Conversation,
    dir: &Path,
    requested: Option<&str>,
    first_name: &str,
) -> Result<PathBuf> {
    fs::create_dir_all(dir)?;
    let path = dir.join(transcript_file_name(requested, first_name, Local::now()));
    fs::write(&path, render_transcript(conversation))?;
    tracing::info!(path = %path.display(), "exported transcript");
    Ok(path)
}
