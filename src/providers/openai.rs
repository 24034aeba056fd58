//! General completion client speaking the OpenAI Chat Completions protocol.
//!
//! A `provider/` prefix on the model name selects an OpenAI-compatible
//! backend (`ollama/llama2`, `groq/mixtral-8x7b-32768`, ...). The prefix is
//! stripped before the model name goes on the wire. An explicit `api_base`
//! always wins over the provider default. Without a configured key, the
//! provider's usual environment variable (`OPENAI_API_KEY`, `GROQ_API_KEY`,
//! ...) is read at call time.
//! See: <https://platform.openai.com/docs/api-reference/chat/create>

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use tracing::debug;

use crate::client::{ClientError, CompletionClient, CompletionStream};
use crate::http::{add_extra_headers, build_http_client, chat_completions_url, RequestBuilderExt};
use crate::model::{CompletionChunk, CompletionRequest, Message};
use crate::options::{ClientSettings, SecretString, TransportOptions};
use crate::spend::SpendLedger;
use crate::sse::SseResponseExt;

pub const DEFAULT_API_BASE: &str = "https://api.openai.com/v1";

/// Key variable for OpenAI itself.
pub const OPENAI_KEY_ENV: &str = "OPENAI_API_KEY";

/// An OpenAI-compatible backend reachable through a model prefix.
struct Provider {
    name: &'static str,
    /// Default base URL; `None` means the provider needs `api_base`
    api_base: Option<&'static str>,
    /// Environment variable holding the key when none is configured
    key_env: Option<&'static str>,
}

const PROVIDERS: &[Provider] = &[
    Provider {
        name: "openai",
        api_base: Some(DEFAULT_API_BASE),
        key_env: Some(OPENAI_KEY_ENV),
    },
    Provider {
        name: "ollama",
        api_base: Some("http://localhost:11434/v1"),
        key_env: None,
    },
    Provider {
        name: "openrouter",
        api_base: Some("https://openrouter.ai/api/v1"),
        key_env: Some("OPENROUTER_API_KEY"),
    },
    Provider {
        name: "groq",
        api_base: Some("https://api.groq.com/openai/v1"),
        key_env: Some("GROQ_API_KEY"),
    },
    Provider {
        name: "together_ai",
        api_base: Some("https://api.together.xyz/v1"),
        key_env: Some("TOGETHERAI_API_KEY"),
    },
    Provider {
        name: "mistral",
        api_base: Some("https://api.mistral.ai/v1"),
        key_env: Some("MISTRAL_API_KEY"),
    },
    Provider {
        name: "deepseek",
        api_base: Some("https://api.deepseek.com/v1"),
        key_env: Some("DEEPSEEK_API_KEY"),
    },
    Provider {
        name: "azure",
        api_base: None,
        key_env: Some("AZURE_API_KEY"),
    },
];

/// Pick the configured key, or read it from `key_env` when none is set.
/// An empty variable counts as unset.
pub(crate) fn resolve_api_key(
    configured: Option<&SecretString>,
    key_env: Option<&str>,
) -> Option<SecretString> {
    configured.cloned().or_else(|| {
        key_env
            .and_then(|var| std::env::var(var).ok())
            .filter(|key| !key.is_empty())
            .map(SecretString::from)
    })
}

/// How the API key is presented.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthHeader {
    /// `Authorization: Bearer <key>`
    Bearer,
    /// `api-key: <key>` (Azure)
    ApiKey,
}

/// Where a model's requests go.
#[derive(Debug, Clone, PartialEq)]
pub struct Route {
    pub api_base: String,
    /// Model name as sent on the wire
    pub model: String,
    pub auth: AuthHeader,
    /// Environment variable consulted when no key is configured
    pub key_env: Option<&'static str>,
}

/// Resolve the backend for `model`.
///
/// Unknown prefixes are treated as part of the model name
/// (`meta-llama/Llama-2-70b` goes to the default base unchanged).
pub fn resolve_route(model: &str, api_base: Option<&str>) -> Result<Route, ClientError> {
    let provider = model.split_once('/').and_then(|(prefix, rest)| {
        PROVIDERS
            .iter()
            .find(|p| p.name == prefix)
            .map(|p| (p, rest))
    });

    let (provider, wire_model) = match provider {
        Some(found) => found,
        None => (&PROVIDERS[0], model),
    };

    let api_base = match (api_base, provider.api_base) {
        (Some(base), _) | (None, Some(base)) => base.to_string(),
        (None, None) => {
            return Err(ClientError::Config(format!(
                "provider `{}` requires api_base",
                provider.name
            )))
        }
    };

    Ok(Route {
        api_base,
        model: wire_model.to_string(),
        auth: if provider.name == "azure" {
            AuthHeader::ApiKey
        } else {
            AuthHeader::Bearer
        },
        key_env: provider.key_env,
    })
}

/// Fully resolved destination of one call.
pub(crate) struct ChatTarget<'a> {
    pub url: String,
    pub api_key: Option<SecretString>,
    pub api_version: Option<&'a str>,
    pub auth: AuthHeader,
}

#[derive(Debug, Serialize)]
pub(crate) struct StreamOptions {
    pub include_usage: bool,
}

#[skip_serializing_none]
#[derive(Debug, Serialize)]
pub(crate) struct ChatBody<'a> {
    pub model: &'a str,
    pub messages: &'a [Message],
    pub stream: bool,
    pub max_tokens: Option<u32>,
    pub temperature: f32,
    pub stream_options: Option<StreamOptions>,
}

#[derive(Debug, Deserialize)]
struct OpenAiErrorResponse {
    error: OpenAiError,
}

#[derive(Debug, Deserialize)]
struct OpenAiError {
    #[serde(rename = "type", default)]
    error_type: Option<String>,
    message: String,
}

fn handle_error_response(status: reqwest::StatusCode, body: &str) -> ClientError {
    match serde_json::from_str::<OpenAiErrorResponse>(body) {
        Ok(resp) => ClientError::ProviderError(format!(
            "{} ({}): {}",
            status,
            resp.error.error_type.as_deref().unwrap_or("error"),
            resp.error.message
        )),
        Err(_) => ClientError::ProviderError(format!("HTTP {}: {}", status, body)),
    }
}

/// Send a streaming chat request and hand back the chunk stream.
pub(crate) async fn open_stream(
    http: &Client,
    transport: &TransportOptions,
    target: &ChatTarget<'_>,
    body: &ChatBody<'_>,
    verbose: bool,
) -> Result<CompletionStream, ClientError> {
    let mut req = http
        .post(&target.url)
        .header(CONTENT_TYPE, "application/json");

    if let Some(key) = &target.api_key {
        req = match target.auth {
            AuthHeader::Bearer => {
                req.header(AUTHORIZATION, format!("Bearer {}", key.expose_secret()))
            }
            AuthHeader::ApiKey => req.header("api-key", key.expose_secret()),
        };
    }
    if let Some(version) = target.api_version {
        req = req.query(&[("api-version", version)]);
    }
    req = add_extra_headers(req, &transport.extra_headers);

    let response = req.json_logged(body, verbose).send().await?;
    let status = response.status();

    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(handle_error_response(status, &body));
    }

    Ok(Box::pin(response.sse_json::<CompletionChunk>(verbose)))
}

/// Multi-provider completion client with an optional spend cap.
///
/// The ledger is shared by clones of the client, so a cap holds across every
/// call made through the same client.
#[derive(Debug, Clone)]
pub struct GeneralClient {
    http: Client,
    transport: TransportOptions,
    ledger: SpendLedger,
}

impl GeneralClient {
    pub fn new(transport: TransportOptions) -> Result<Self, ClientError> {
        Ok(Self {
            http: build_http_client(&transport)?,
            transport,
            ledger: SpendLedger::new(),
        })
    }

    /// Record of what this client has spent.
    pub fn ledger(&self) -> &SpendLedger {
        &self.ledger
    }
}

#[async_trait]
impl CompletionClient for GeneralClient {
    async fn complete(
        &self,
        request: CompletionRequest,
        settings: ClientSettings,
    ) -> Result<CompletionStream, ClientError> {
        if let Some(budget) = settings.max_budget {
            if self.ledger.exhausted(budget) {
                return Err(ClientError::BudgetExceeded {
                    spent: self.ledger.spent(),
                    budget,
                });
            }
        }

        let api_base = settings.api_base.as_deref().or(request.api_base.as_deref());
        let route = resolve_route(&request.model, api_base)?;
        debug!(api_base = %route.api_base, model = %route.model, "dispatching completion");

        let target = ChatTarget {
            url: chat_completions_url(&route.api_base),
            api_key: resolve_api_key(
                settings.api_key.as_ref().or(request.api_key.as_ref()),
                route.key_env,
            ),
            api_version: settings
                .api_version
                .as_deref()
                .or(request.api_version.as_deref()),
            auth: route.auth,
        };
        let body = ChatBody {
            model: &route.model,
            messages: &request.messages,
            stream: request.stream,
            max_tokens: request.max_tokens,
            temperature: request.temperature,
            stream_options: settings
                .max_budget
                .map(|_| StreamOptions { include_usage: true }),
        };

        let stream =
            open_stream(&self.http, &self.transport, &target, &body, settings.verbose).await?;

        let ledger = self.ledger.clone();
        let model = request.model;
        Ok(Box::pin(stream.inspect(move |item| {
            if let Ok(CompletionChunk {
                usage: Some(usage), ..
            }) = item
            {
                ledger.record(&model, usage);
            }
        })))
    }
}
