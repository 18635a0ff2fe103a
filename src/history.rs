//! # Conversation window
//!
//! The composer sees only a bounded slice of the conversation: the last
//! `max_turns` turns, then trimmed from the oldest end until the rendered
//! text fits `max_tokens` (counted with `tiktoken_rs::cl100k_base`).
//! Retrieval never sees history at all.

use async_openai::types::chat::Role;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tiktoken_rs::{CoreBPE, cl100k_base};
use tracing::{debug, warn};

use crate::config::ComposerConfig;

static BPE: Lazy<Option<CoreBPE>> = Lazy::new(|| match cl100k_base() {
    Ok(bpe) => Some(bpe),
    Err(e) => {
        warn!("cl100k_base unavailable ({e}); estimating tokens from length");
        None
    }
});

/// Token count of `text` under cl100k.
pub fn count_tokens(text: &str) -> usize {
    match BPE.as_ref() {
        Some(bpe) => bpe.encode_with_special_tokens(text).len(),
        None => text.len().div_ceil(4),
    }
}

/// One message of the shopper/assistant exchange.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
}

impl Turn {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    pub fn render(&self) -> String {
        let speaker = match &self.role {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
            _ => "other",
        };
        format!("{speaker}: {}", self.content)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ConversationWindow {
    pub max_turns: usize,
    pub max_tokens: usize,
}

impl ConversationWindow {
    pub fn new(max_turns: usize, max_tokens: usize) -> Self {
        Self {
            max_turns,
            max_tokens,
        }
    }

    pub fn from_config(config: &ComposerConfig) -> Self {
        Self::new(config.history_turns, config.history_max_tokens)
    }

    /// Most recent turns that fit both bounds, oldest first.
    pub fn select<'h>(&self, history: &'h [Turn]) -> Vec<&'h Turn> {
        let start = history.len().saturating_sub(self.max_turns);
        let mut kept: VecDeque<&Turn> = history[start..].iter().collect();

        let mut tokens: usize = kept.iter().map(|t| count_tokens(&t.render())).sum();
        while tokens > self.max_tokens {
            match kept.pop_front() {
                Some(oldest) => {
                    tokens -= count_tokens(&oldest.render());
                    debug!("Dropping oldest turn from window ({tokens} tokens left)");
                }
                None => break,
            }
        }
        kept.into_iter().collect()
    }

    /// The selected turns as newline-separated `role: content` lines.
    pub fn render(&self, history: &[Turn]) -> String {
        self.select(history)
            .iter()
            .map(|t| t.render())
            .collect::<Vec<_>>()
            .join("\n")
    }
}
