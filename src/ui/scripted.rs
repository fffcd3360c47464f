// ABOUTME: Console fed from a fixed script of input lines, for tests
// Captures every line written so assertions can inspect the transcript

use super::Console;
use crate::utils::error::Result;
use std::collections::VecDeque;

#[derive(Debug, Default)]
pub struct ScriptedConsole {
    inputs: VecDeque<String>,
    pub output: Vec<String>,
    pub prompts: Vec<String>,
}

impl ScriptedConsole {
    pub fn new(inputs: &[&str]) -> Self {
        Self {
            inputs: inputs.iter().map(|s| s.to_string()).collect(),
            output: Vec::new(),
            prompts: Vec::new(),
        }
    }

    pub fn remaining_inputs(&self) -> usize {
        self.inputs.len()
    }

    pub fn printed(&self, needle: &str) -> bool {
        self.output.iter().any(|line| line.contains(needle))
    }
}

impl Console for ScriptedConsole {
    fn read_line(&mut self, prompt: &str) -> Result<Option<String>> {
        self.prompts.push(prompt.to_string());
        Ok(self.inputs.pop_front())
    }

    fn say(&mut self, text: &str) {
        self.output.push(text.to_string());
    }
}
