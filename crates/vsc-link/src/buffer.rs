//! Inbound fragment accumulator with transaction-completion detection.
//!
//! A transaction is complete when the adapter prints its `>` prompt, or,
//! for bus-level failures where some adapters drop the prompt, when a
//! terminal error phrase is followed by a line terminator. Length and
//! elapsed time never complete a transaction: `SEARCHING...` may be
//! followed by a real answer several seconds later.

/// Adapter ready prompt.
pub const PROMPT: char = '>';

/// Phrases after which the adapter will not send more data for this command.
pub const TERMINAL_ERRORS: &[&str] = &[
    "NO DATA",
    "CAN ERROR",
    "BUS ERROR",
    "BUS BUSY",
    "BUS INIT: ...ERROR",
    "DATA ERROR",
    "FB ERROR",
    "BUFFER FULL",
    "UNABLE TO CONNECT",
    "STOPPED",
    "LV RESET",
    "ACT ALERT",
];

/// How the current transaction was completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    Prompt,
    TerminalError,
}

/// Accumulates notify fragments since the last completed transaction.
#[derive(Debug, Default)]
pub struct ResponseBuffer {
    data: String,
    /// Set after a terminal-error completion: the adapter usually still sends
    /// the prompt, which must not be read as the next command's response.
    swallow_prompt: bool,
}

impl ResponseBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one raw fragment. NUL bytes (sent by some clones) are dropped.
    pub fn append(&mut self, fragment: &[u8]) {
        let text = String::from_utf8_lossy(fragment);
        let mut text: &str = &text;

        if self.swallow_prompt {
            let trimmed = text.trim_start_matches(['\r', '\n', ' ', '\0']);
            if let Some(rest) = trimmed.strip_prefix(PROMPT) {
                self.swallow_prompt = false;
                text = rest;
            } else if !trimmed.is_empty() {
                self.swallow_prompt = false;
                text = trimmed;
            } else {
                return;
            }
        }

        self.data.extend(text.chars().filter(|c| *c != '\0'));
    }

    /// Whether the accumulated text completes a transaction.
    pub fn completion(&self) -> Option<Completion> {
        if self.data.contains(PROMPT) {
            return Some(Completion::Prompt);
        }
        let upper = self.data.to_ascii_uppercase();
        let terminated = TERMINAL_ERRORS.iter().any(|phrase| {
            upper.match_indices(phrase).any(|(idx, _)| {
                matches!(
                    upper.as_bytes().get(idx + phrase.len()),
                    Some(b'\r' | b'\n')
                )
            })
        });
        terminated.then_some(Completion::TerminalError)
    }

    pub fn is_complete(&self) -> bool {
        self.completion().is_some()
    }

    /// Take the completed transaction text, leaving the buffer empty.
    ///
    /// Returns `None` (and keeps accumulating) while incomplete.
    pub fn take_complete(&mut self) -> Option<String> {
        let completion = self.completion()?;
        if completion == Completion::TerminalError {
            self.swallow_prompt = true;
        }
        Some(std::mem::take(&mut self.data))
    }

    /// Discard everything accumulated so far.
    pub fn clear(&mut self) {
        self.data.clear();
    }

    pub fn as_str(&self) -> &str {
        &self.data
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}
