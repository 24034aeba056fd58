//! HTTP client utilities for making requests to completion APIs.
//!
//! This module provides reusable HTTP client construction and
//! request building logic shared by the completion clients.

use reqwest::{Client, RequestBuilder};
use serde::Serialize;
use std::collections::HashMap;
use tracing::{debug, info};

use crate::options::TransportOptions;

/// Build a configured HTTP client from transport options.
///
/// This applies common configuration like timeouts and proxies.
///
/// # Example
/// ```ignore
/// let client = build_http_client(&transport_options)?;
/// ```
pub fn build_http_client(transport_options: &TransportOptions) -> Result<Client, reqwest::Error> {
    let mut builder = Client::builder();

    if let Some(timeout) = transport_options.timeout {
        builder = builder.timeout(timeout);
    }

    if let Some(proxy_url) = &transport_options.proxy {
        builder = builder.proxy(reqwest::Proxy::all(proxy_url)?);
    }

    builder.build()
}

/// Add extra headers to a request if specified in transport options.
pub fn add_extra_headers(
    mut request: RequestBuilder,
    extra_headers: &Option<HashMap<String, String>>,
) -> RequestBuilder {
    if let Some(headers) = extra_headers {
        for (key, value) in headers {
            request = request.header(key, value);
        }
    }
    request
}

/// Join a base URL and the chat completions path.
pub fn chat_completions_url(api_base: &str) -> String {
    format!("{}/chat/completions", api_base.trim_end_matches('/'))
}

/// Request builder helpers.
pub trait RequestBuilderExt {
    /// Attach a JSON body, logging it first when `verbose` is set.
    fn json_logged<T: Serialize + ?Sized>(self, body: &T, verbose: bool) -> Self;
}

impl RequestBuilderExt for RequestBuilder {
    fn json_logged<T: Serialize + ?Sized>(self, body: &T, verbose: bool) -> Self {
        if verbose {
            match serde_json::to_string(body) {
                Ok(json) => info!(body = %json, "sending completion request"),
                Err(e) => debug!("request body is not loggable: {}", e),
            }
        }
        self.json(body)
    }
}
