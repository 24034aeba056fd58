//! Configuration snapshot, trim tunables and per-call client settings.

use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;

/// Model name used when none is configured.
pub const DEFAULT_MODEL: &str = "gpt-4";

/// A secret string type for sensitive data like API keys.
/// Prevents accidental logging or display of secrets.
#[derive(Clone, PartialEq, Deserialize)]
#[serde(transparent)]
pub struct SecretString(String);

impl SecretString {
    /// Create a new secret string.
    pub fn new(s: String) -> Self {
        Self(s)
    }

    /// Get the underlying secret value.
    pub fn expose_secret(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for SecretString {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SecretString([REDACTED])")
    }
}

impl From<String> for SecretString {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl From<&str> for SecretString {
    fn from(s: &str) -> Self {
        Self::new(s.to_string())
    }
}

/// Tunable constants of the trimming fallback chain.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct TrimDefaults {
    /// Tokens held back when both context window and max tokens are known,
    /// absorbing estimation error.
    pub safety_margin: u32,

    /// Budget used when the context window cannot be inferred from the model.
    pub fallback_budget: u32,

    /// Fraction of an inferred context window the history may occupy.
    pub trim_ratio: f64,
}

impl Default for TrimDefaults {
    fn default() -> Self {
        Self {
            safety_margin: 25,
            fallback_budget: 3000,
            trim_ratio: 0.75,
        }
    }
}

/// Read-only configuration snapshot for a [`TextLlm`](crate::llm::TextLlm).
///
/// Zero numbers and empty strings count as unset, so a config file can
/// leave a field blank without changing behavior.
///
/// # Example
/// ```rust
/// use textllm::options::LlmOptions;
///
/// let options = LlmOptions::new("gpt-4")
///     .with_context_window(8192)
///     .with_max_tokens(1000)
///     .with_temperature(0.2);
///
/// assert_eq!(options.context_window(), Some(8192));
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmOptions {
    /// Model identifier (e.g., "gpt-4", "ollama/llama2")
    pub model: String,

    /// Total tokens (prompt + response) the model accepts
    pub context_window: Option<u32>,

    /// Maximum tokens to generate
    pub max_tokens: Option<u32>,

    /// Temperature for sampling, 0.0 when unset
    pub temperature: Option<f32>,

    /// Base URL of the completion endpoint
    pub api_base: Option<String>,

    /// API key for authentication
    pub api_key: Option<SecretString>,

    /// API version (Azure-style `api-version` query parameter)
    pub api_version: Option<String>,

    /// Spend cap in USD for the general completion client
    pub max_budget: Option<f64>,

    /// Log outgoing messages and raw traffic
    pub debug: bool,

    /// Allow image content; skips trimming when it cannot be counted
    pub vision: bool,

    pub trim: TrimDefaults,
}

impl Default for LlmOptions {
    fn default() -> Self {
        Self::new(DEFAULT_MODEL)
    }
}

impl LlmOptions {
    /// Create options for the given model with everything else unset.
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            context_window: None,
            max_tokens: None,
            temperature: None,
            api_base: None,
            api_key: None,
            api_version: None,
            max_budget: None,
            debug: false,
            vision: false,
            trim: TrimDefaults::default(),
        }
    }

    pub fn with_context_window(mut self, tokens: u32) -> Self {
        self.context_window = Some(tokens);
        self
    }

    pub fn with_max_tokens(mut self, tokens: u32) -> Self {
        self.max_tokens = Some(tokens);
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = Some(api_base.into());
        self
    }

    pub fn with_api_key(mut self, api_key: impl Into<SecretString>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn with_api_version(mut self, api_version: impl Into<String>) -> Self {
        self.api_version = Some(api_version.into());
        self
    }

    pub fn with_max_budget(mut self, budget: f64) -> Self {
        self.max_budget = Some(budget);
        self
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub fn with_vision(mut self, vision: bool) -> Self {
        self.vision = vision;
        self
    }

    pub fn with_trim_defaults(mut self, trim: TrimDefaults) -> Self {
        self.trim = trim;
        self
    }

    pub fn context_window(&self) -> Option<u32> {
        self.context_window.filter(|&n| n > 0)
    }

    pub fn max_tokens(&self) -> Option<u32> {
        self.max_tokens.filter(|&n| n > 0)
    }

    pub fn api_base(&self) -> Option<&str> {
        self.api_base.as_deref().filter(|s| !s.is_empty())
    }

    pub fn api_key(&self) -> Option<&SecretString> {
        self.api_key.as_ref().filter(|k| !k.expose_secret().is_empty())
    }

    pub fn api_version(&self) -> Option<&str> {
        self.api_version.as_deref().filter(|s| !s.is_empty())
    }

    pub fn max_budget(&self) -> Option<f64> {
        self.max_budget.filter(|&b| b > 0.0)
    }
}

/// Settings handed to a completion client for a single call.
///
/// Carries what would otherwise be process-wide client state, so two calls
/// with different settings never observe each other.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClientSettings {
    /// Endpoint override
    pub api_base: Option<String>,

    /// Credential override
    pub api_key: Option<SecretString>,

    /// API version override
    pub api_version: Option<String>,

    /// Refuse to dispatch once recorded spend reaches this many USD
    pub max_budget: Option<f64>,

    /// Log request bodies and raw stream lines
    pub verbose: bool,
}

/// Transport configuration for the HTTP completion clients.
#[derive(Debug, Clone, Default)]
pub struct TransportOptions {
    /// Request timeout
    pub timeout: Option<Duration>,

    /// HTTP proxy URL
    pub proxy: Option<String>,

    /// Additional HTTP headers to include in requests
    pub extra_headers: Option<HashMap<String, String>>,
}

impl TransportOptions {
    /// Set the timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Set the proxy URL.
    pub fn with_proxy(mut self, proxy: String) -> Self {
        self.proxy = Some(proxy);
        self
    }

    /// Add a single extra header.
    pub fn with_header(mut self, key: String, value: String) -> Self {
        self.extra_headers
            .get_or_insert_with(HashMap::new)
            .insert(key, value);
        self
    }
}
