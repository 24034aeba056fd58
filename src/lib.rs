//! # textllm - Budget-aware streaming chat completions
//!
//! A small library that turns a conversation into a streamed chat completion,
//! making sure the prompt fits the model's context window first.
//!
//! ## Features
//! - Async-first, tokio compatible
//! - History trimming to a token budget, system message always kept intact
//! - Budget from explicit options, from the model name, or a safe fallback
//! - Image messages passed through untouched in vision mode
//! - OpenAI-compatible multi-provider client with a spend cap
//! - Streaming via Server-Sent Events
//!
//! ## Architecture
//!
//! [`TextLlm`](llm::TextLlm) owns a read-only [`LlmOptions`](options::LlmOptions)
//! snapshot and two [`CompletionClient`]s. Each call trims the messages,
//! builds a [`CompletionRequest`](model::CompletionRequest) and sends it to
//! the client the model maps to, together with per-call
//! [`ClientSettings`](options::ClientSettings). Nothing is configured
//! process-wide.
//!
//! ## Example
//! ```no_run
//! use futures::StreamExt;
//! use textllm::model::Message;
//! use textllm::options::LlmOptions;
//! use textllm::TextLlm;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let options = LlmOptions::new("gpt-4")
//!         .with_api_key("your-api-key")
//!         .with_context_window(8192)
//!         .with_max_tokens(1000);
//!
//!     let llm = TextLlm::new(options)?;
//!
//!     let messages = vec![
//!         Message::system("You are a helpful assistant."),
//!         Message::user("Hello!"),
//!     ];
//!
//!     let mut stream = llm.stream(messages).await?;
//!     while let Some(chunk) = stream.next().await {
//!         if let Some(text) = chunk?.content() {
//!             print!("{}", text);
//!         }
//!     }
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod http;
pub mod llm;
pub mod model;
pub mod notice;
pub mod options;
pub mod providers;
pub mod spend;
pub mod sse;
pub mod tokens;
pub mod trim;

// Re-exports for convenience
pub use client::{ClientError, CompletionClient, CompletionStream};
pub use llm::TextLlm;
pub use model::{CompletionChunk, CompletionRequest, Message, Role};
pub use options::LlmOptions;
