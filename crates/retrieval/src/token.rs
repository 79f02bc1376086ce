//! Token estimation utilities.
//!
//! Uses a character-based heuristic: ~4 characters per token. This
//! approximation is accurate within ~10% for BPE tokenizers on English text
//! and keeps budget arithmetic deterministic in tests.

use promptweave_core::message::PromptMessage;

/// Estimate the token count for a string.
///
/// Heuristic: 1 token ≈ 4 characters. Rounds up.
pub fn estimate_tokens(text: &str) -> usize {
    if text.is_empty() {
        return 0;
    }
    text.len().div_ceil(4)
}

/// Estimate tokens for a single message including per-message overhead.
///
/// Each message costs ~4 tokens of overhead for role name, delimiters,
/// and formatting markers in the API wire format.
pub fn estimate_message_tokens(message: &PromptMessage) -> usize {
    let overhead = 4;
    overhead + estimate_tokens(&message.content)
}

/// Estimate tokens for a slice of messages.
pub fn estimate_messages_tokens(messages: &[PromptMessage]) -> usize {
    messages.iter().map(estimate_message_tokens).sum()
}
