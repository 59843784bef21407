//! Slash commands for interactive mode

/// Result of parsing a line of input
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandResult {
    /// Reset the conversation to the greeting
    Clear,
    /// Print the conversation so far
    History,
    /// Show a message to the user (not sent to the service)
    Message(String),
    /// Exit the application
    Exit,
    /// Unknown command
    Unknown(String),
}

/// Parse a slash command; returns `None` for ordinary chat input
pub fn execute_command(input: &str) -> Option<CommandResult> {
    let input = input.trim();

    let rest = input.strip_prefix('/')?;
    let command = rest.split_whitespace().next().unwrap_or("").to_lowercase();

    Some(match command.as_str() {
        "help" | "h" | "?" => CommandResult::Message(help_message()),

        "clear" | "c" => CommandResult::Clear,

        "history" | "l" => CommandResult::History,

        "quit" | "exit" | "q" => CommandResult::Exit,

        _ => CommandResult::Unknown(command),
    })
}

fn help_message() -> String {
    r#"Available commands:
  /help, /h, /?        Show this help message
  /history, /l         Show the conversation so far
  /clear, /c           Start a fresh conversation
  /quit, /exit, /q     Exit dash

Press Ctrl-C while a reply is streaming to cancel it."#
        .to_string()
}
