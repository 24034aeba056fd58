//! Trimming conversation history to a token budget.
//!
//! The system message is never altered. History is cut from the oldest end;
//! when a single message is left and it still does not fit, its text is
//! shortened in the middle. The estimated size of the result never exceeds
//! the budget unless the system message alone does.

use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, warn};

use crate::model::{Content, Message};
use crate::tokens::{context_window_for, CharEstimator, TokenEstimator};

const ELLIPSIS: &str = "...";

/// Errors raised while trimming.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TrimError {
    /// Content at `index` (counting the system message as 0) is not plain
    /// text and cannot be token-counted.
    #[error("message {index} has structured content and cannot be token-counted")]
    NonTextContent { index: usize },

    #[error("unable to determine the context window of model `{0}`")]
    UnknownModel(String),
}

/// How large the trimmed conversation may be.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TrimBudget<'a> {
    /// An explicit token count.
    Tokens(usize),

    /// Derive the budget from the model's known context window.
    Model(&'a str),
}

/// Message trimmer bound to a token estimator.
#[derive(Clone)]
pub struct Trimmer {
    estimator: Arc<dyn TokenEstimator>,
    trim_ratio: f64,
}

impl Default for Trimmer {
    fn default() -> Self {
        Self::new(Arc::new(CharEstimator::new()))
    }
}

impl Trimmer {
    pub fn new(estimator: Arc<dyn TokenEstimator>) -> Self {
        Self {
            estimator,
            trim_ratio: 0.75,
        }
    }

    /// Fraction of an inferred context window the trimmed output may use.
    pub fn with_trim_ratio(mut self, trim_ratio: f64) -> Self {
        self.trim_ratio = trim_ratio;
        self
    }

    /// Turn a budget into a token count.
    pub fn resolve(&self, budget: TrimBudget<'_>) -> Result<usize, TrimError> {
        match budget {
            TrimBudget::Tokens(tokens) => Ok(tokens),
            TrimBudget::Model(model) => context_window_for(model)
                .map(|window| (window as f64 * self.trim_ratio) as usize)
                .ok_or_else(|| TrimError::UnknownModel(model.to_string())),
        }
    }

    /// Estimated token count of a full message list.
    pub fn estimate(&self, messages: &[Message]) -> Result<usize, TrimError> {
        messages.iter().enumerate().try_fold(0, |total, (index, message)| {
            self.estimator
                .count_message(message)
                .map(|tokens| total + tokens)
                .ok_or(TrimError::NonTextContent { index })
        })
    }

    /// Trim `history` so that `system` followed by the survivors fits `budget`.
    ///
    /// Returns the final list with `system` first.
    pub fn trim(
        &self,
        system: &Message,
        history: &[Message],
        budget: TrimBudget<'_>,
    ) -> Result<Vec<Message>, TrimError> {
        let max_tokens = self.resolve(budget)?;

        let system_tokens = self
            .estimator
            .count_message(system)
            .ok_or(TrimError::NonTextContent { index: 0 })?;

        let mut costs = Vec::with_capacity(history.len());
        for (i, message) in history.iter().enumerate() {
            let tokens = self
                .estimator
                .count_message(message)
                .ok_or(TrimError::NonTextContent { index: i + 1 })?;
            costs.push(tokens);
        }

        let mut trimmed = Vec::with_capacity(history.len() + 1);
        trimmed.push(system.clone());

        let Some(available) = max_tokens.checked_sub(system_tokens) else {
            warn!(
                system_tokens,
                max_tokens, "system message alone exceeds the token budget, dropping all history"
            );
            return Ok(trimmed);
        };

        let mut total: usize = costs.iter().sum();
        let mut start = 0;
        while total > available && history.len() - start > 1 {
            total -= costs[start];
            start += 1;
        }
        if start > 0 {
            debug!(dropped = start, available, "dropped oldest messages");
        }

        let mut kept = history[start..].to_vec();
        if total > available {
            if let Some(last) = kept.pop() {
                match self.shorten(last, available) {
                    Some(shortened) => kept.push(shortened),
                    None => debug!(available, "last message cannot fit even when shortened"),
                }
            }
        }

        trimmed.extend(kept);
        Ok(trimmed)
    }

    /// Cut text out of the middle of `message` until it fits `available`.
    fn shorten(&self, mut message: Message, available: usize) -> Option<Message> {
        let chars: Vec<char> = message.as_text()?.chars().collect();

        let build = |keep: usize| -> String {
            let tail = keep / 2;
            let mut text: String = chars[..keep - tail].iter().collect();
            text.push_str(ELLIPSIS);
            text.extend(&chars[chars.len() - tail..]);
            text
        };
        let fits = |text: String| -> bool {
            let probe = Message {
                content: Content::Text(text),
                ..message.clone()
            };
            self.estimator
                .count_message(&probe)
                .is_some_and(|tokens| tokens <= available)
        };

        if !fits(build(0)) {
            return None;
        }

        let (mut lo, mut hi) = (0, chars.len());
        while lo < hi {
            let mid = (lo + hi + 1) / 2;
            if fits(build(mid)) {
                lo = mid;
            } else {
                hi = mid - 1;
            }
        }

        debug!(kept_chars = lo, original_chars = chars.len(), "shortened message");
        message.content = Content::Text(build(lo));
        Some(message)
    }
}
