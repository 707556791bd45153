use serde::{Deserialize, Serialize};

/// Messages kept per submission
pub const RETAINED_DIAGNOSTICS: usize = 5;

/// Messages shown to the submitter and stored with the submission
pub const SURFACED_DIAGNOSTICS: usize = 3;

/// Longest single message, in bytes, before it is cut
pub const MAX_MESSAGE_BYTES: usize = 4096;

/// Fixed-capacity buffer keeping the first N messages pushed into it
///
/// Earlier failures are the actionable ones, so later messages are dropped
/// once the buffer is full rather than sampled.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Diagnostics {
    messages: Vec<String>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self {
            messages: Vec::with_capacity(RETAINED_DIAGNOSTICS),
        }
    }

    /// Keeps `message` if there is room, cutting it to `MAX_MESSAGE_BYTES`
    pub fn push(&mut self, message: String) -> bool {
        if self.messages.len() >= RETAINED_DIAGNOSTICS {
            return false;
        }
        self.messages.push(truncate_message(message));
        true
    }

    pub fn retained(&self) -> &[String] {
        &self.messages
    }

    /// The part of the buffer visible outside the engine
    pub fn surfaced(&self) -> &[String] {
        let end = self.messages.len().min(SURFACED_DIAGNOSTICS);
        &self.messages[..end]
    }
}

fn truncate_message(mut message: String) -> String {
    if message.len() <= MAX_MESSAGE_BYTES {
        return message;
    }
    let mut cut = MAX_MESSAGE_BYTES;
    while !message.is_char_boundary(cut) {
        cut -= 1;
    }
    message.truncate(cut);
    message.push('…');
    message
}
