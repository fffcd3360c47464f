// ABOUTME: Console backed by the process terminal
// Hides password input in raw mode and shows a progress indicator while requests are in flight

use super::Console;
use crate::utils::error::{ChatMeterError, Result};
use crossbeam_channel::{bounded, RecvTimeoutError, Sender};
use crossterm::event::{self, Event, KeyCode, KeyEventKind, KeyModifiers};
use crossterm::terminal::{disable_raw_mode, enable_raw_mode};
use std::io::{self, BufRead, Write};
use std::thread::JoinHandle;
use std::time::Duration;

struct ProgressIndicator {
    stop_tx: Sender<()>,
    handle: JoinHandle<()>,
}

impl ProgressIndicator {
    fn start() -> Self {
        let (stop_tx, stop_rx) = bounded::<()>(1);
        let handle = std::thread::spawn(move || loop {
            match stop_rx.recv_timeout(Duration::from_millis(500)) {
                Err(RecvTimeoutError::Timeout) => {
                    print!(".");
                    let _ = io::stdout().flush();
                }
                Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
            }
        });
        Self { stop_tx, handle }
    }

    fn stop(self) {
        let _ = self.stop_tx.send(());
        let _ = self.handle.join();
    }
}

pub struct TerminalConsole {
    interactive: bool,
    progress: Option<ProgressIndicator>,
}

impl Default for TerminalConsole {
    fn default() -> Self {
        Self::new()
    }
}

impl TerminalConsole {
    pub fn new() -> Self {
        Self {
            interactive: atty::is(atty::Stream::Stdin) && atty::is(atty::Stream::Stdout),
            progress: None,
        }
    }

    pub fn is_interactive(&self) -> bool {
        self.interactive
    }

    fn prompt(prompt: &str) -> Result<()> {
        let mut stdout = io::stdout();
        write!(stdout, "{}", prompt)?;
        stdout.flush()?;
        Ok(())
    }

    /// Read keys in raw mode without echoing them; Ctrl-C or Esc cancels
    fn read_hidden() -> Result<Option<String>> {
        let mut secret = String::new();
        loop {
            if let Event::Key(key) = event::read()? {
                if key.kind != KeyEventKind::Press {
                    continue;
                }
                match key.code {
                    KeyCode::Enter => return Ok(Some(secret)),
                    KeyCode::Esc => return Ok(None),
                    KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => {
                        return Ok(None)
                    }
                    KeyCode::Backspace => {
                        secret.pop();
                    }
                    KeyCode::Char(c) => secret.push(c),
                    _ => {}
                }
            }
        }
    }
}

impl Console for TerminalConsole {
    fn read_line(&mut self, prompt: &str) -> Result<Option<String>> {
        Self::prompt(prompt)?;

        let mut line = String::new();
        let read = io::stdin().lock().read_line(&mut line)?;
        if read == 0 {
            return Ok(None);
        }
        Ok(Some(line.trim_end_matches(['\r', '\n']).to_string()))
    }

    fn read_secret(&mut self, prompt: &str) -> Result<Option<String>> {
        if !self.interactive {
            return self.read_line(prompt);
        }

        Self::prompt(prompt)?;
        enable_raw_mode()
            .map_err(|e| ChatMeterError::Terminal(format!("cannot hide input: {}", e)))?;
        let result = Self::read_hidden();
        disable_raw_mode()
            .map_err(|e| ChatMeterError::Terminal(format!("cannot restore terminal: {}", e)))?;
        println!();
        result
    }

    fn say(&mut self, text: &str) {
        println!("{}", text);
    }

    fn waiting_started(&mut self, label: &str) {
        print!("Sent request to {}. Waiting for response", label);
        let _ = io::stdout().flush();
        if self.interactive {
            self.progress = Some(ProgressIndicator::start());
        }
    }

    fn waiting_finished(&mut self, elapsed: Duration) {
        if let Some(progress) = self.progress.take() {
            progress.stop();
        }
        let rounded = Duration::from_millis(elapsed.as_millis() as u64);
        println!();
        println!("Received response in {}.\n", humantime::format_duration(rounded));
    }
}

impl Drop for TerminalConsole {
    fn drop(&mut self) {
        if let Some(progress) = self.progress.take() {
            progress.stop();
        }
    }
}
