// ABOUTME: Classification of raw operator input into commands and prompts
// Classification never mutates anything; the controller acts on the result

pub const COMMAND_PREFIX: char = '-';

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Help,
    Balance,
    Model,
    End,
    Info,
    Save,
    Export(Option<String>),
}

impl Command {
    /// Command names with their help text, in the order `-help` prints them
    pub const HELP: [(&'static str, &'static str); 7] = [
        ("help", "Show this list of commands"),
        ("balance", "Show your current balance"),
        ("model", "Choose the model used for the next prompts"),
        ("info", "Show session details and the cost of the last exchange"),
        ("save", "Name and save this conversation"),
        ("export [name]", "Write the conversation to a text file"),
        ("end", "End this conversation"),
    ];

    fn parse(name: &str, argument: Option<&str>) -> Option<Self> {
        let command = match name {
            "help" => Self::Help,
            "balance" => Self::Balance,
            "model" => Self::Model,
            "end" => Self::End,
            "info" => Self::Info,
            "save" => Self::Save,
            "export" => Self::Export(argument.map(str::to_string)),
            _ => return None,
        };
        Some(command)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    Empty,
    Command(Command),
    UnknownCommand(String),
    Prompt(String),
}

/// Classify one line of input.
///
/// A line is a command if and only if its first character is [`COMMAND_PREFIX`].
/// Prompts keep their text verbatim except that a typed `\n` becomes a newline.
pub fn classify(raw: &str) -> Input {
    let line = raw.trim_end();
    if line.trim_start().is_empty() {
        return Input::Empty;
    }

    let Some(rest) = line.strip_prefix(COMMAND_PREFIX) else {
        return Input::Prompt(raw.replace("\\n", "\n"));
    };

    let mut parts = rest.splitn(2, char::is_whitespace);
    let name = parts.next().unwrap_or_default().to_lowercase();
    let argument = parts.next().map(str::trim).filter(|a| !a.is_empty());

    match Command::parse(&name, argument) {
        Some(command) => Input::Command(command),
        None => Input::UnknownCommand(name),
    }
}

pub fn help_text() -> String {
    Command::HELP
        .iter()
        .map(|(name, description)| format!("  {}{:<14} {}", COMMAND_PREFIX, name, description))
        .collect::<Vec<_>>()
        .join("\n")
}
