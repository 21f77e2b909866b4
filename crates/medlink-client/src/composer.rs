use std::time::Duration;

use tokio::time::Instant;

use medlink_types::ClientCommand;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ComposerInput {
    /// The input's full text after a keystroke
    Edit(String),
    Enter { modifier: bool },
    SendButton,
}

/// What the session should do after an input.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ComposerOutput {
    pub typing: Option<ClientCommand>,
    pub submit: Option<String>,
}

/// Draft text plus the outgoing typing signal for the open conversation.
///
/// Typing uses one quiet deadline, pushed back on every keystroke, so a
/// burst of keys yields one `typing` and one `stopTyping`.
#[derive(Debug)]
pub struct Composer {
    buffer: String,
    conversation_id: Option<String>,
    self_id: String,
    typing: bool,
    quiet: Duration,
    quiet_deadline: Option<Instant>,
}

impl Composer {
    pub fn new(self_id: impl Into<String>, quiet: Duration) -> Self {
        Self {
            buffer: String::new(),
            conversation_id: None,
            self_id: self_id.into(),
            typing: false,
            quiet,
            quiet_deadline: None,
        }
    }

    pub fn text(&self) -> &str {
        &self.buffer
    }

    pub fn is_typing(&self) -> bool {
        self.typing
    }

    /// Point the composer at another conversation (or none). The draft is
    /// discarded and typing in the old conversation is stopped.
    pub fn set_conversation(&mut self, conversation_id: Option<String>) -> Option<ClientCommand> {
        if self.conversation_id == conversation_id {
            return None;
        }
        let stop = self.stop_typing();
        self.buffer.clear();
        self.conversation_id = conversation_id;
        stop
    }

    pub fn handle(&mut self, input: ComposerInput, now: Instant) -> ComposerOutput {
        match input {
            ComposerInput::Edit(text) => {
                self.buffer = text;
                ComposerOutput {
                    typing: self.keystroke(now),
                    submit: None,
                }
            }
            ComposerInput::Enter { modifier: true } => ComposerOutput::default(),
            ComposerInput::Enter { modifier: false } | ComposerInput::SendButton => self.submit(),
        }
    }

    /// `stopTyping` once the quiet period elapsed without keystrokes.
    pub fn poll_quiet(&mut self, now: Instant) -> Option<ClientCommand> {
        match self.quiet_deadline {
            Some(deadline) if now >= deadline => self.stop_typing(),
            _ => None,
        }
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.quiet_deadline
    }

    fn keystroke(&mut self, now: Instant) -> Option<ClientCommand> {
        let conversation_id = self.conversation_id.clone()?;
        self.quiet_deadline = Some(now + self.quiet);
        if self.typing {
            return None;
        }
        self.typing = true;
        Some(ClientCommand::Typing {
            conversation_id,
            user_id: self.self_id.clone(),
        })
    }

    fn submit(&mut self) -> ComposerOutput {
        let text = self.buffer.trim();
        if text.is_empty() {
            return ComposerOutput::default();
        }
        let submit = Some(text.to_string());
        self.buffer.clear();
        ComposerOutput {
            typing: self.stop_typing(),
            submit,
        }
    }

    fn stop_typing(&mut self) -> Option<ClientCommand> {
        self.quiet_deadline = None;
        if !std::mem::replace(&mut self.typing, false) {
            return None;
        }
        let conversation_id = self.conversation_id.clone()?;
        Some(ClientCommand::StopTyping { conversation_id })
    }
}
