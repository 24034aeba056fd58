//! User-facing notices.

use tracing::warn;

/// Shown when the context window can neither be read from the options nor
/// inferred from the model name.
pub const UNKNOWN_CONTEXT_WINDOW: &str = "\
**We were unable to determine the context window of this model.** Defaulting to {fallback}.

If your model can handle more, set `context_window` to its token limit.

Also, please set `max_tokens` to the maximum number of tokens per response.";

/// Surface for messages meant for the person running the program, as
/// opposed to diagnostics.
pub trait Notifier: Send + Sync {
    /// Display a markdown-formatted warning.
    fn warn(&self, markdown: &str);
}

/// Notifier that forwards to `tracing` at warn level.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn warn(&self, markdown: &str) {
        warn!(target: "textllm::notice", "{}", markdown);
    }
}

/// Render the unknown-context-window notice for the given fallback budget.
pub fn unknown_context_window(fallback: u32) -> String {
    UNKNOWN_CONTEXT_WINDOW.replace("{fallback}", &fallback.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_context_window_mentions_fallback() {
        let text = unknown_context_window(3000);
        assert!(text.contains("Defaulting to 3000."));
        assert!(text.contains("context_window"));
        assert!(text.contains("max_tokens"));
    }
}
