//! Completion client trait and error types.

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use thiserror::Error;

use crate::model::{CompletionChunk, CompletionRequest};
use crate::options::ClientSettings;
use crate::trim::TrimError;

/// Errors that can occur while preparing or dispatching a completion.
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Trim error: {0}")]
    Trim(#[from] TrimError),

    #[error("First message must be a system message")]
    MissingSystemMessage,

    #[error("Budget exceeded: spent ${spent:.4} of ${budget:.4}")]
    BudgetExceeded { spent: f64, budget: f64 },

    #[error("Provider error: {0}")]
    ProviderError(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

/// Lazy sequence of partial completions. Ends when the provider signals
/// completion; polling it again after that yields nothing.
pub type CompletionStream =
    Pin<Box<dyn Stream<Item = Result<CompletionChunk, ClientError>> + Send>>;

/// A backend able to stream chat completions.
///
/// Implement this trait to add a new way of reaching a model. Everything
/// that varies per call travels in `settings`; implementations keep no
/// call-specific state of their own.
///
/// # Example
/// ```rust,ignore
/// struct Echo;
///
/// #[async_trait]
/// impl CompletionClient for Echo {
///     async fn complete(
///         &self,
///         request: CompletionRequest,
///         _settings: ClientSettings,
///     ) -> Result<CompletionStream, ClientError> {
///         // Build chunks from request.messages
///     }
/// }
/// ```
#[async_trait]
pub trait CompletionClient: Send + Sync {
    /// Dispatch `request` and return the stream of chunks.
    ///
    /// Errors that happen before the first chunk (connection, auth, a
    /// non-success status, an exhausted budget) are returned directly;
    /// errors mid-stream arrive as stream items.
    async fn complete(
        &self,
        request: CompletionRequest,
        settings: ClientSettings,
    ) -> Result<CompletionStream, ClientError>;
}
