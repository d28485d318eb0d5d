//! Local token estimation
//!
//! Uses the `cl100k_base` BPE from `tiktoken-rs`. If the encoder cannot be
//! loaded the estimate falls back to four characters per token.

use std::sync::OnceLock;
use tiktoken_rs::{cl100k_base, CoreBPE};

use crate::message::RenderedMessage;

/// Framing overhead per chat message (role markers and separators).
const TOKENS_PER_MESSAGE: usize = 4;

fn encoder() -> Option<&'static CoreBPE> {
    static ENCODER: OnceLock<Option<CoreBPE>> = OnceLock::new();
    ENCODER
        .get_or_init(|| match cl100k_base() {
            Ok(bpe) => Some(bpe),
            Err(e) => {
                log::warn!("Failed to load cl100k_base tokenizer, estimating by length: {}", e);
                None
            }
        })
        .as_ref()
}

pub fn estimate_tokens(text: &str) -> usize {
    match encoder() {
        Some(bpe) => bpe.encode_with_special_tokens(text).len(),
        None => text.chars().count().div_ceil(4),
    }
}

/// Estimated input cost of a rendered history with its system prompt.
pub fn estimate_messages(system: &str, messages: &[RenderedMessage], pending: Option<&str>) -> usize {
    let mut total = estimate_tokens(system) + TOKENS_PER_MESSAGE;
    for message in messages {
        total += estimate_tokens(&message.content) + TOKENS_PER_MESSAGE;
    }
    if let Some(text) = pending {
        total += estimate_tokens(text) + TOKENS_PER_MESSAGE;
    }
    total
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Role;

    #[test]
    fn test_estimate_grows_with_text() {
        let short = estimate_tokens("hello");
        let long = estimate_tokens(&"hello world ".repeat(50));
        assert!(short >= 1);
        assert!(long > short * 10);
    }

    #[test]
    fn test_estimate_messages_counts_overhead() {
        let messages = vec![RenderedMessage {
            role: Role::User,
            content: String::new(),
        }];
        let empty_system = estimate_messages("", &[], None);
        let with_message = estimate_messages("", &messages, None);
        assert_eq!(with_message - empty_system, TOKENS_PER_MESSAGE);

        let with_pending = estimate_messages("", &messages, Some("more text here"));
        assert!(with_pending > with_message);
    }
}
