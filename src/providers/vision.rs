//! Direct OpenAI client for the vision preview model.
//!
//! The vision preview model is reached at OpenAI itself, bypassing provider
//! routing. Endpoint, key and version come from the per-call settings first
//! and fall back to the request; the key finally falls back to
//! `OPENAI_API_KEY`.

use async_trait::async_trait;
use reqwest::Client;
use tracing::debug;

use crate::client::{ClientError, CompletionClient, CompletionStream};
use crate::http::{build_http_client, chat_completions_url};
use crate::model::CompletionRequest;
use crate::options::{ClientSettings, TransportOptions};
use crate::providers::openai::{
    open_stream, resolve_api_key, AuthHeader, ChatBody, ChatTarget, DEFAULT_API_BASE,
    OPENAI_KEY_ENV,
};

/// Model identifier routed to [`VisionClient`].
pub const VISION_MODEL: &str = "gpt-4-vision-preview";

#[derive(Debug, Clone)]
pub struct VisionClient {
    http: Client,
    transport: TransportOptions,
}

impl VisionClient {
    pub fn new(transport: TransportOptions) -> Result<Self, ClientError> {
        Ok(Self {
            http: build_http_client(&transport)?,
            transport,
        })
    }
}

#[async_trait]
impl CompletionClient for VisionClient {
    async fn complete(
        &self,
        request: CompletionRequest,
        settings: ClientSettings,
    ) -> Result<CompletionStream, ClientError> {
        let api_base = settings
            .api_base
            .as_deref()
            .or(request.api_base.as_deref())
            .unwrap_or(DEFAULT_API_BASE);
        debug!(api_base, model = %request.model, "dispatching vision completion");

        let target = ChatTarget {
            url: chat_completions_url(api_base),
            api_key: resolve_api_key(
                settings.api_key.as_ref().or(request.api_key.as_ref()),
                Some(OPENAI_KEY_ENV),
            ),
            api_version: settings
                .api_version
                .as_deref()
                .or(request.api_version.as_deref()),
            auth: AuthHeader::Bearer,
        };
        let body = ChatBody {
            model: &request.model,
            messages: &request.messages,
            stream: request.stream,
            max_tokens: request.max_tokens,
            temperature: request.temperature,
            stream_options: None,
        };

        open_stream(&self.http, &self.transport, &target, &body, settings.verbose).await
    }
}
