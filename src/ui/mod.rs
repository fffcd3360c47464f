// ABOUTME: Operator-facing I/O abstraction shared by menus and the session controller
// Terminal and scripted consoles implement the same line-oriented interface

pub mod menu;
#[cfg(test)]
pub mod scripted;
pub mod terminal;

use crate::utils::error::Result;
use std::time::Duration;

pub use terminal::TerminalConsole;

/// Line-oriented conversation with the human operator
pub trait Console {
    /// Read one line of input; `None` once input is exhausted
    fn read_line(&mut self, prompt: &str) -> Result<Option<String>>;

    /// Read input that should not be echoed
    fn read_secret(&mut self, prompt: &str) -> Result<Option<String>> {
        self.read_line(prompt)
    }

    fn say(&mut self, text: &str);

    /// Ask a yes/no question until the answer is one of them; closed input means no
    fn confirm(&mut self, question: &str) -> Result<bool> {
        loop {
            let Some(answer) = self.read_line(&format!("{} (y/n): ", question))? else {
                return Ok(false);
            };
            match answer.trim().to_lowercase().as_str() {
                "y" | "yes" => return Ok(true),
                "n" | "no" => return Ok(false),
                _ => self.say("Error: Invalid input. Please try again."),
            }
        }
    }

    /// Called when a remote request is sent
    fn waiting_started(&mut self, _label: &str) {}

    /// Called when the remote request resolves, successfully or not
    fn waiting_finished(&mut self, _elapsed: Duration) {}
}
