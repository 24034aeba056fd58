//! Text LLM: fits a conversation into the model's budget and streams the
//! completion.
//!
//! One call of [`TextLlm::stream`] goes through these steps:
//!
//! 1. Split off the system message (the first message, which must have the
//!    `system` role).
//! 2. Pick a token budget for the history: the context window minus the
//!    response allowance and a safety margin, the bare context window, or a
//!    budget inferred from the model name. When inference fails the budget
//!    falls back to a fixed value and the user is told how to configure it.
//! 3. Trim the history. If the history holds images and vision is enabled,
//!    trimming is skipped and the messages go out untouched.
//! 4. Build the request and send it to the vision client when the model is
//!    the vision preview model, otherwise to the general client.

use std::sync::Arc;

use itertools::Itertools;
use nonempty::NonEmpty;
use tracing::{debug, info};

use crate::client::{ClientError, CompletionClient, CompletionStream};
use crate::model::{CompletionRequest, Message, Role};
use crate::notice::{unknown_context_window, Notifier, TracingNotifier};
use crate::options::{ClientSettings, LlmOptions, TransportOptions};
use crate::providers::{GeneralClient, VisionClient, VISION_MODEL};
use crate::tokens::TokenEstimator;
use crate::trim::{TrimBudget, TrimError, Trimmer};

/// Which completion client serves a model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    General,
    Vision,
}

impl Endpoint {
    pub fn for_model(model: &str) -> Self {
        if model == VISION_MODEL {
            Endpoint::Vision
        } else {
            Endpoint::General
        }
    }
}

/// Token budget for the history when it can be computed from the options
/// alone; `None` means it has to be inferred from the model.
pub fn history_budget(options: &LlmOptions) -> Option<usize> {
    match (options.context_window(), options.max_tokens()) {
        (Some(window), Some(max_tokens)) => Some(
            window
                .saturating_sub(max_tokens)
                .saturating_sub(options.trim.safety_margin) as usize,
        ),
        (Some(window), None) => Some(window as usize),
        _ => None,
    }
}

/// A configured chat model that only needs messages.
///
/// # Example
/// ```no_run
/// use futures::StreamExt;
/// use textllm::llm::TextLlm;
/// use textllm::model::Message;
/// use textllm::options::LlmOptions;
///
/// # async fn run() -> Result<(), textllm::ClientError> {
/// let options = LlmOptions::new("gpt-4")
///     .with_api_key(std::env::var("OPENAI_API_KEY").unwrap_or_default())
///     .with_max_tokens(500);
/// let llm = TextLlm::new(options)?;
///
/// let mut stream = llm
///     .stream(vec![
///         Message::system("You are a helpful assistant."),
///         Message::user("Write a haiku about Rust."),
///     ])
///     .await?;
///
/// while let Some(chunk) = stream.next().await {
///     if let Some(text) = chunk?.content() {
///         print!("{}", text);
///     }
/// }
/// # Ok(())
/// # }
/// ```
pub struct TextLlm {
    options: LlmOptions,
    general: Arc<dyn CompletionClient>,
    vision: Arc<dyn CompletionClient>,
    notifier: Arc<dyn Notifier>,
    trimmer: Trimmer,
}

impl TextLlm {
    /// Create a text LLM backed by the HTTP completion clients.
    pub fn new(options: LlmOptions) -> Result<Self, ClientError> {
        Self::with_transport(options, TransportOptions::default())
    }

    /// Like [`new`](Self::new), with explicit transport settings.
    pub fn with_transport(
        options: LlmOptions,
        transport: TransportOptions,
    ) -> Result<Self, ClientError> {
        let general = GeneralClient::new(transport.clone())?;
        let vision = VisionClient::new(transport)?;
        Ok(Self::with_clients(options, Arc::new(general), Arc::new(vision)))
    }

    /// Create a text LLM over arbitrary completion clients.
    pub fn with_clients(
        options: LlmOptions,
        general: Arc<dyn CompletionClient>,
        vision: Arc<dyn CompletionClient>,
    ) -> Self {
        let trimmer = Trimmer::default().with_trim_ratio(options.trim.trim_ratio);
        Self {
            options,
            general,
            vision,
            notifier: Arc::new(TracingNotifier),
            trimmer,
        }
    }

    /// Replace where user-facing warnings go.
    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    /// Replace the token estimator used for trimming.
    pub fn with_estimator(mut self, estimator: Arc<dyn TokenEstimator>) -> Self {
        self.trimmer = Trimmer::new(estimator).with_trim_ratio(self.options.trim.trim_ratio);
        self
    }

    pub fn options(&self) -> &LlmOptions {
        &self.options
    }

    /// Trim `messages` to the budget, system message first.
    pub fn prepare_messages(&self, messages: Vec<Message>) -> Result<Vec<Message>, ClientError> {
        let NonEmpty {
            head: system,
            tail: history,
        } = NonEmpty::from_vec(messages).ok_or(ClientError::MissingSystemMessage)?;

        if system.role != Role::System {
            return Err(ClientError::MissingSystemMessage);
        }

        match self.trim_history(&system, &history) {
            Ok(trimmed) => Ok(trimmed),
            Err(TrimError::NonTextContent { index }) if self.options.vision => {
                if self.options.debug {
                    let images = history.iter().filter(|m| m.has_image()).count();
                    info!(index, images, "Won't token trim image messages");
                }
                let mut untouched = Vec::with_capacity(history.len() + 1);
                untouched.push(system);
                untouched.extend(history);
                Ok(untouched)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn trim_history(
        &self,
        system: &Message,
        history: &[Message],
    ) -> Result<Vec<Message>, TrimError> {
        if let Some(tokens) = history_budget(&self.options) {
            return self.trimmer.trim(system, history, TrimBudget::Tokens(tokens));
        }

        match self
            .trimmer
            .trim(system, history, TrimBudget::Model(&self.options.model))
        {
            Err(TrimError::UnknownModel(model)) => {
                let fallback = self.options.trim.fallback_budget;
                debug!(%model, fallback, "context window unknown, using fallback budget");
                if history.len() == 1 {
                    self.notifier.warn(&unknown_context_window(fallback));
                }
                self.trimmer
                    .trim(system, history, TrimBudget::Tokens(fallback as usize))
            }
            other => other,
        }
    }

    /// Assemble the request parameters around already-prepared messages.
    pub fn build_request(&self, messages: Vec<Message>) -> CompletionRequest {
        CompletionRequest {
            model: self.options.model.clone(),
            messages,
            stream: true,
            api_base: self.options.api_base().map(str::to_string),
            api_key: self.options.api_key().cloned(),
            api_version: self.options.api_version().map(str::to_string),
            max_tokens: self.options.max_tokens(),
            temperature: self.options.temperature.unwrap_or(0.0),
        }
    }

    /// The client that serves the configured model.
    pub fn endpoint(&self) -> Endpoint {
        Endpoint::for_model(&self.options.model)
    }

    /// Per-call settings for `endpoint`.
    ///
    /// The vision client takes the endpoint and credentials; the general
    /// client takes the spend cap and verbosity.
    pub fn client_settings(&self, endpoint: Endpoint) -> ClientSettings {
        match endpoint {
            Endpoint::Vision => ClientSettings {
                api_base: self.options.api_base().map(str::to_string),
                api_key: self.options.api_key().cloned(),
                api_version: self.options.api_version().map(str::to_string),
                ..Default::default()
            },
            Endpoint::General => ClientSettings {
                max_budget: self.options.max_budget(),
                verbose: self.options.debug,
                ..Default::default()
            },
        }
    }

    /// Trim `messages`, dispatch them and return the completion stream.
    ///
    /// Each call sends a new request.
    pub async fn stream(&self, messages: Vec<Message>) -> Result<CompletionStream, ClientError> {
        let messages = self.prepare_messages(messages)?;

        if self.options.debug {
            info!(
                roles = %messages.iter().map(|m| m.role.as_str()).join(", "),
                "Passing messages into LLM"
            );
            debug!(?messages);
        }

        let request = self.build_request(messages);
        let endpoint = self.endpoint();
        let settings = self.client_settings(endpoint);

        match endpoint {
            Endpoint::Vision => self.vision.complete(request, settings).await,
            Endpoint::General => {
                if self.options.debug {
                    info!(?request, "Sending request to completion client");
                }
                self.general.complete(request, settings).await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{CompletionChunk, ContentPart, ImageUrl};
    use crate::options::TrimDefaults;
    use async_trait::async_trait;
    use futures::StreamExt;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingClient {
        calls: Mutex<Vec<(CompletionRequest, ClientSettings)>>,
        chunks: Vec<CompletionChunk>,
    }

    impl RecordingClient {
        fn calls(&self) -> Vec<(CompletionRequest, ClientSettings)> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl CompletionClient for RecordingClient {
        async fn complete(
            &self,
            request: CompletionRequest,
            settings: ClientSettings,
        ) -> Result<CompletionStream, ClientError> {
            self.calls.lock().unwrap().push((request, settings));
            let chunks: Vec<Result<CompletionChunk, ClientError>> =
                self.chunks.iter().cloned().map(Ok).collect();
            Ok(Box::pin(futures::stream::iter(chunks)))
        }
    }

    #[derive(Default)]
    struct RecordingNotifier {
        warnings: Mutex<Vec<String>>,
    }

    impl Notifier for RecordingNotifier {
        fn warn(&self, markdown: &str) {
            self.warnings.lock().unwrap().push(markdown.to_string());
        }
    }

    struct Harness {
        llm: TextLlm,
        general: Arc<RecordingClient>,
        vision: Arc<RecordingClient>,
        notifier: Arc<RecordingNotifier>,
    }

    fn harness(options: LlmOptions) -> Harness {
        let general = Arc::new(RecordingClient::default());
        let vision = Arc::new(RecordingClient::default());
        let notifier = Arc::new(RecordingNotifier::default());
        let llm = TextLlm::with_clients(options, general.clone(), vision.clone())
            .with_notifier(notifier.clone());
        Harness {
            llm,
            general,
            vision,
            notifier,
        }
    }

    fn image_message() -> Message {
        Message::parts(
            Role::User,
            vec![
                ContentPart::Text {
                    text: "what is this?".to_string(),
                },
                ContentPart::ImageUrl {
                    image_url: ImageUrl {
                        url: "data:image/png;base64,AAAA".to_string(),
                        detail: None,
                    },
                },
            ],
        )
    }

    #[test]
    fn test_history_budget() {
        let both = LlmOptions::new("gpt-4")
            .with_context_window(100)
            .with_max_tokens(20);
        assert_eq!(history_budget(&both), Some(55));

        let window_only = LlmOptions::new("gpt-4").with_context_window(4096);
        assert_eq!(history_budget(&window_only), Some(4096));

        let max_tokens_only = LlmOptions::new("gpt-4").with_max_tokens(500);
        assert_eq!(history_budget(&max_tokens_only), None);
        assert_eq!(history_budget(&LlmOptions::new("gpt-4")), None);

        let tiny = LlmOptions::new("gpt-4")
            .with_context_window(30)
            .with_max_tokens(20);
        assert_eq!(history_budget(&tiny), Some(0));

        let custom_margin = both.clone().with_trim_defaults(TrimDefaults {
            safety_margin: 0,
            ..Default::default()
        });
        assert_eq!(history_budget(&custom_margin), Some(80));
    }

    #[tokio::test]
    async fn test_small_conversation_passes_through() {
        let h = harness(
            LlmOptions::new("gpt-4")
                .with_context_window(100)
                .with_max_tokens(20),
        );
        let messages = vec![Message::system("You are helpful"), Message::user("hi")];

        let _stream = h.llm.stream(messages.clone()).await.unwrap();

        let calls = h.general.calls();
        assert_eq!(calls.len(), 1);
        let (request, settings) = &calls[0];
        assert_eq!(request.messages, messages);
        assert_eq!(request.max_tokens, Some(20));
        assert_eq!(request.temperature, 0.0);
        assert!(request.stream);
        assert_eq!(settings, &ClientSettings::default());
        assert!(h.vision.calls().is_empty());
    }

    #[test]
    fn test_configured_fields_only() {
        let h = harness(
            LlmOptions::new("gpt-4")
                .with_temperature(0.7)
                .with_api_base("http://localhost:8000/v1")
                .with_api_key("sk-test")
                .with_api_version(""),
        );
        let request = h.llm.build_request(vec![Message::system("sys")]);

        assert_eq!(request.temperature, 0.7);
        assert_eq!(request.api_base.as_deref(), Some("http://localhost:8000/v1"));
        assert_eq!(
            request.api_key.as_ref().map(|k| k.expose_secret()),
            Some("sk-test")
        );
        assert_eq!(request.api_version, None);
        assert_eq!(request.max_tokens, None);
    }

    #[test]
    fn test_unknown_model_falls_back_and_warns_on_first_turn() {
        let h = harness(LlmOptions::new("mystery-model"));
        let messages = vec![
            Message::system("You are helpful"),
            Message::user("x".repeat(20_000)),
        ];

        let out = h.llm.prepare_messages(messages).unwrap();

        assert_eq!(h.llm.trimmer.estimate(&out).unwrap(), 3000);
        let warnings = h.notifier.warnings.lock().unwrap();
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("Defaulting to 3000"));
    }

    #[test]
    fn test_max_tokens_alone_still_falls_back_for_unknown_model() {
        let h = harness(LlmOptions::new("mystery-model").with_max_tokens(500));
        let messages = vec![
            Message::system("You are helpful"),
            Message::user("x".repeat(20_000)),
        ];

        let out = h.llm.prepare_messages(messages).unwrap();

        assert_eq!(out[0], Message::system("You are helpful"));
        assert_eq!(h.llm.trimmer.estimate(&out).unwrap(), 3000);
        let warnings = h.notifier.warnings.lock().unwrap();
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("Defaulting to 3000"));
    }

    #[test]
    fn test_unknown_model_later_turns_do_not_warn() {
        let h = harness(LlmOptions::new("mystery-model"));
        let messages = vec![
            Message::system("You are helpful"),
            Message::user("hello"),
            Message::assistant("hi there"),
            Message::user("x".repeat(20_000)),
        ];

        let out = h.llm.prepare_messages(messages).unwrap();

        assert_eq!(h.llm.trimmer.estimate(&out).unwrap(), 3000);
        assert!(h.notifier.warnings.lock().unwrap().is_empty());
    }

    #[test]
    fn test_fallback_budget_is_configurable() {
        let h = harness(LlmOptions::new("mystery-model").with_trim_defaults(TrimDefaults {
            fallback_budget: 1000,
            ..Default::default()
        }));
        let messages = vec![
            Message::system("You are helpful"),
            Message::user("x".repeat(20_000)),
        ];

        let out = h.llm.prepare_messages(messages).unwrap();

        assert_eq!(h.llm.trimmer.estimate(&out).unwrap(), 1000);
        assert!(h.notifier.warnings.lock().unwrap()[0].contains("Defaulting to 1000"));
    }

    #[test]
    fn test_known_model_infers_budget_without_warning() {
        let h = harness(LlmOptions::new("gpt-4"));
        let messages = vec![
            Message::system("You are helpful"),
            Message::user("x".repeat(100_000)),
        ];

        let out = h.llm.prepare_messages(messages).unwrap();

        assert_eq!(h.llm.trimmer.estimate(&out).unwrap(), 6144);
        assert!(h.notifier.warnings.lock().unwrap().is_empty());
    }

    #[test]
    fn test_system_message_first_and_unmodified() {
        let system = Message::system("You are helpful").with_name("interpreter");
        let h = harness(LlmOptions::new("gpt-4").with_context_window(40));
        let messages = vec![
            system.clone(),
            Message::user("first question, rather long"),
            Message::assistant("first answer, also rather long"),
            Message::user("second"),
        ];

        let out = h.llm.prepare_messages(messages).unwrap();

        assert_eq!(out[0], system);
        assert!(h.llm.trimmer.estimate(&out).unwrap() <= 40);
        assert_eq!(out.last(), Some(&Message::user("second")));
    }

    #[test]
    fn test_images_skip_trimming_in_vision_mode() {
        let h = harness(
            LlmOptions::new("gpt-4")
                .with_context_window(10)
                .with_vision(true),
        );
        let messages = vec![
            Message::system("You are helpful"),
            Message::user("x".repeat(500)),
            image_message(),
        ];

        let out = h.llm.prepare_messages(messages.clone()).unwrap();

        assert_eq!(out, messages);
    }

    #[test]
    fn test_images_without_vision_mode_fail() {
        let h = harness(LlmOptions::new("gpt-4").with_context_window(1000));
        let messages = vec![Message::system("You are helpful"), image_message()];

        let err = h.llm.prepare_messages(messages).unwrap_err();

        assert!(matches!(
            err,
            ClientError::Trim(TrimError::NonTextContent { index: 1 })
        ));
    }

    #[test]
    fn test_first_message_must_be_system() {
        let h = harness(LlmOptions::new("gpt-4"));

        let err = h.llm.prepare_messages(vec![Message::user("hi")]).unwrap_err();
        assert!(matches!(err, ClientError::MissingSystemMessage));

        let err = h.llm.prepare_messages(Vec::new()).unwrap_err();
        assert!(matches!(err, ClientError::MissingSystemMessage));
    }

    #[tokio::test]
    async fn test_vision_model_uses_vision_client() {
        let h = harness(
            LlmOptions::new(VISION_MODEL)
                .with_api_base("https://proxy.example.com/v1")
                .with_api_key("sk-vision")
                .with_api_version("2023-12-01")
                .with_max_budget(5.0)
                .with_debug(true)
                .with_vision(true),
        );
        let messages = vec![Message::system("Describe images"), image_message()];

        let _stream = h.llm.stream(messages.clone()).await.unwrap();

        assert!(h.general.calls().is_empty());
        let calls = h.vision.calls();
        assert_eq!(calls.len(), 1);
        let (request, settings) = &calls[0];
        assert_eq!(request.model, VISION_MODEL);
        assert_eq!(request.messages, messages);
        assert_eq!(settings.api_base.as_deref(), Some("https://proxy.example.com/v1"));
        assert_eq!(
            settings.api_key.as_ref().map(|k| k.expose_secret()),
            Some("sk-vision")
        );
        assert_eq!(settings.api_version.as_deref(), Some("2023-12-01"));
        assert_eq!(settings.max_budget, None);
        assert!(!settings.verbose);
    }

    #[tokio::test]
    async fn test_general_client_gets_spend_cap_and_verbosity() {
        let h = harness(
            LlmOptions::new("gpt-4")
                .with_max_budget(0.5)
                .with_debug(true),
        );

        let _stream = h
            .llm
            .stream(vec![Message::system("sys"), Message::user("hi")])
            .await
            .unwrap();

        let calls = h.general.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].1.max_budget, Some(0.5));
        assert!(calls[0].1.verbose);
        assert_eq!(calls[0].1.api_base, None);
        assert!(h.vision.calls().is_empty());
    }

    #[tokio::test]
    async fn test_stream_is_returned_unmodified() {
        let chunk = |text: &str| CompletionChunk {
            id: "c1".to_string(),
            choices: vec![crate::model::ChunkChoice {
                delta: crate::model::Delta {
                    content: Some(text.to_string()),
                    ..Default::default()
                },
                ..Default::default()
            }],
            ..Default::default()
        };
        let general = Arc::new(RecordingClient {
            chunks: vec![chunk("Hel"), chunk("lo")],
            ..Default::default()
        });
        let llm = TextLlm::with_clients(
            LlmOptions::new("gpt-4"),
            general.clone(),
            Arc::new(RecordingClient::default()),
        );

        let stream = llm
            .stream(vec![Message::system("sys"), Message::user("hi")])
            .await
            .unwrap();
        let chunks: Vec<CompletionChunk> = stream.map(|c| c.unwrap()).collect().await;

        assert_eq!(chunks, vec![chunk("Hel"), chunk("lo")]);

        let _stream = llm
            .stream(vec![Message::system("sys"), Message::user("again")])
            .await
            .unwrap();
        assert_eq!(general.calls().len(), 2);
    }
}
