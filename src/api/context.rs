//! Context Window Trimming
//!
//! Keeps outgoing conversations bounded: system messages are always kept,
//! only the most recent turns survive and each turn is clipped.

use crate::api::completion::{Message, MessageContent};
use serde::{Deserialize, Serialize};

const MIN_MESSAGES: usize = 1;
const MIN_CHARS: usize = 40;

/// Limits applied to a conversation before dispatch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextWindow {
    /// Number of non-system messages kept, newest first
    pub max_messages: usize,

    /// Characters kept per message before clipping with "..."
    pub max_chars: usize,
}

impl Default for ContextWindow {
    fn default() -> Self {
        Self {
            max_messages: 20,
            max_chars: 4000,
        }
    }
}

impl ContextWindow {
    pub fn new(max_messages: usize, max_chars: usize) -> Self {
        Self {
            max_messages: max_messages.max(MIN_MESSAGES),
            max_chars: max_chars.max(MIN_CHARS),
        }
    }

    /// Trim a conversation in place, preserving relative order
    pub fn trim(&self, messages: &mut Vec<Message>) {
        let max_messages = self.max_messages.max(MIN_MESSAGES);
        let turns = messages.iter().filter(|m| !m.is_system()).count();
        let mut to_drop = turns.saturating_sub(max_messages);

        messages.retain(|m| {
            if m.is_system() || to_drop == 0 {
                return true;
            }
            to_drop -= 1;
            false
        });

        for message in messages.iter_mut().filter(|m| !m.is_system()) {
            self.clip(message);
        }
    }

    fn clip(&self, message: &mut Message) {
        let max_chars = self.max_chars.max(MIN_CHARS);
        // Multimodal parts are left alone; only plain text is clipped
        if let MessageContent::Text(text) = &message.content {
            if text.chars().count() > max_chars {
                let clipped: String = text.chars().take(max_chars).collect();
                message.content = MessageContent::Text(format!("{}...", clipped));
            }
        }
    }
}
