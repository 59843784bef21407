//! Console rendering of the conversation

use std::io::{self, Write};

use dash_agent::{ConversationState, MessageId};
use dash_ai::Role;

use crate::utils::preview;

/// Writes assistant output as it streams in.
///
/// Fed every state the store publishes; prints only what was appended since
/// the previous state. Messages present when the printer first sees the
/// conversation are not printed.
pub struct StreamPrinter<W: Write> {
    out: W,
    started: bool,
    /// Index of the first message not yet fully printed
    cursor: usize,
    /// Bytes of `messages[cursor]` already printed
    printed: usize,
    /// Id of the message `printed` refers to
    partial: Option<MessageId>,
    /// Id of `messages[cursor - 1]`, to detect a reset conversation
    last_done: Option<MessageId>,
}

impl<W: Write> StreamPrinter<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            started: false,
            cursor: 0,
            printed: 0,
            partial: None,
            last_done: None,
        }
    }

    /// Render the difference between the last seen state and `state`
    pub fn render(&mut self, state: &ConversationState) -> io::Result<()> {
        let messages = &state.messages;
        if !self.started {
            self.started = true;
            self.cursor = messages.len();
            self.last_done = messages.last().map(|m| m.id);
            return Ok(());
        }

        let reset = match self.cursor.checked_sub(1) {
            Some(i) => messages.get(i).map(|m| m.id) != self.last_done,
            None => false,
        };
        if reset {
            self.cursor = 0;
            self.printed = 0;
        }

        while let Some(message) = messages.get(self.cursor) {
            if self.partial != Some(message.id) {
                self.printed = 0;
            }
            if message.role == Role::Assistant {
                write!(self.out, "{}", message.content.get(self.printed..).unwrap_or(""))?;
            }
            if message.streaming {
                self.printed = message.content.len();
                self.partial = Some(message.id);
                break;
            }
            if message.role == Role::Assistant {
                writeln!(self.out)?;
            }
            self.last_done = Some(message.id);
            self.cursor += 1;
            self.printed = 0;
            self.partial = None;
        }
        self.out.flush()
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

/// Print the whole conversation, one line per message
pub fn print_history(state: &ConversationState) {
    if state.messages.is_empty() {
        println!("No messages yet.");
        return;
    }
    for (i, message) in state.messages.iter().enumerate() {
        println!(
            "  {}: [{} {}] {}",
            i,
            message.role.as_str(),
            message.created_at.format("%Y-%m-%d %H:%M"),
            preview(&message.content, 80)
        );
    }
}
