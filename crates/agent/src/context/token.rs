//! Token estimation utilities.
//!
//! Uses a character-based heuristic: ~4 characters per token. Only used to
//! log prompt sizes; billing always uses the counts the provider reports.

use chatrecall_core::message::Message;

/// Estimate the token count for a string.
///
/// Heuristic: 1 token ≈ 4 characters. Rounds up.
pub fn estimate_tokens(text: &str) -> usize {
    text.len().div_ceil(4)
}

/// Estimate tokens for a single message including per-message overhead.
///
/// Each message costs 4 tokens of framing plus its role, name and content.
/// A named message drops one token because the role is folded into the name.
pub fn estimate_message_tokens(message: &Message) -> usize {
    let mut tokens = 4 + estimate_tokens(message.role.as_str()) + estimate_tokens(&message.content);
    if let Some(name) = &message.name {
        tokens = (tokens + estimate_tokens(name)).saturating_sub(1);
    }
    tokens
}

/// Estimate tokens for a whole prompt, including the 2 tokens that prime
/// the reply.
pub fn estimate_prompt_tokens(messages: &[Message]) -> usize {
    messages.iter().map(estimate_message_tokens).sum::<usize>() + 2
}
