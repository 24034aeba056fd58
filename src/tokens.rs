//! Token estimation and context-window lookup.

use crate::model::Message;

/// Tokens charged for each message on top of its text (role, separators).
pub const MESSAGE_OVERHEAD: usize = 4;

/// Known context windows, by bare model id.
const MODEL_CONTEXT_WINDOWS: &[(&str, u32)] = &[
    ("gpt-3.5-turbo", 16_385),
    ("gpt-3.5-turbo-0301", 4_096),
    ("gpt-3.5-turbo-0613", 4_096),
    ("gpt-3.5-turbo-1106", 16_385),
    ("gpt-3.5-turbo-0125", 16_385),
    ("gpt-3.5-turbo-16k", 16_385),
    ("gpt-3.5-turbo-16k-0613", 16_385),
    ("gpt-4", 8_192),
    ("gpt-4-0314", 8_192),
    ("gpt-4-0613", 8_192),
    ("gpt-4-32k", 32_768),
    ("gpt-4-32k-0314", 32_768),
    ("gpt-4-32k-0613", 32_768),
    ("gpt-4-1106-preview", 128_000),
    ("gpt-4-0125-preview", 128_000),
    ("gpt-4-turbo-preview", 128_000),
    ("gpt-4-turbo", 128_000),
    ("gpt-4-vision-preview", 128_000),
    ("gpt-4o", 128_000),
    ("gpt-4o-mini", 128_000),
];

/// Look up the context window of a model, ignoring any `provider/` prefix.
pub fn context_window_for(model: &str) -> Option<u32> {
    let bare = model.rsplit('/').next().unwrap_or(model);
    MODEL_CONTEXT_WINDOWS
        .iter()
        .find(|(name, _)| *name == bare)
        .map(|(_, window)| *window)
}

/// Best-effort token counting.
///
/// Counts need not be exact, but they must be deterministic and must not
/// decrease when text grows; trimming relies on both.
pub trait TokenEstimator: Send + Sync {
    fn count(&self, text: &str) -> usize;

    /// Estimate a message, or `None` when its content is not plain text.
    fn count_message(&self, message: &Message) -> Option<usize> {
        let text = message.as_text()?;
        let name = message
            .name
            .as_deref()
            .map(|n| 1 + self.count(n))
            .unwrap_or(0);
        Some(MESSAGE_OVERHEAD + self.count(text) + name)
    }
}

/// Character-ratio estimator; roughly four characters per token for English.
#[derive(Debug, Clone)]
pub struct CharEstimator {
    chars_per_token: f64,
}

impl CharEstimator {
    pub fn new() -> Self {
        Self::with_ratio(4.0)
    }

    pub fn with_ratio(chars_per_token: f64) -> Self {
        Self { chars_per_token }
    }
}

impl Default for CharEstimator {
    fn default() -> Self {
        Self::new()
    }
}

impl TokenEstimator for CharEstimator {
    fn count(&self, text: &str) -> usize {
        (text.chars().count() as f64 / self.chars_per_token).ceil() as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ContentPart, Role};

    #[test]
    fn test_context_window_lookup() {
        assert_eq!(context_window_for("gpt-4"), Some(8_192));
        assert_eq!(context_window_for("openai/gpt-4-32k"), Some(32_768));
        assert_eq!(context_window_for("ollama/llama2"), None);
        assert_eq!(context_window_for("my-finetune"), None);
    }

    #[test]
    fn test_char_estimator() {
        let estimator = CharEstimator::new();
        assert_eq!(estimator.count(""), 0);
        assert_eq!(estimator.count("abcd"), 1);
        assert_eq!(estimator.count("abcde"), 2);
        assert_eq!(estimator.count("éééé"), 1);
    }

    #[test]
    fn test_count_message_includes_overhead_and_name() {
        let estimator = CharEstimator::new();
        let plain = Message::user("abcdefgh");
        assert_eq!(estimator.count_message(&plain), Some(MESSAGE_OVERHEAD + 2));

        let named = Message::user("abcdefgh").with_name("bob");
        assert_eq!(estimator.count_message(&named), Some(MESSAGE_OVERHEAD + 2 + 2));
    }

    #[test]
    fn test_count_message_rejects_structured_content() {
        let msg = Message::parts(
            Role::User,
            vec![ContentPart::Text {
                text: "hi".to_string(),
            }],
        );
        assert_eq!(CharEstimator::new().count_message(&msg), None);
    }
}
