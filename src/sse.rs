//! Server-Sent Events (SSE) decoding for streamed completions.
//!
//! SSE format:
//! ```text
//! data: {"key": "value"}
//!
//! : keep-alive comment
//! data: {"another": "event"}
//!
//! data: [DONE]
//! ```

use bytes::BytesMut;
use futures::stream::{self, Stream, StreamExt};
use serde::de::DeserializeOwned;
use tracing::info;

use crate::client::ClientError;

/// Incremental line decoder over raw response bytes.
///
/// Bytes are buffered until a full line is available, so a multi-byte
/// character split across network chunks is decoded intact.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: BytesMut,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append raw bytes from the network.
    pub fn push(&mut self, chunk: &[u8]) {
        self.buffer.extend_from_slice(chunk);
    }

    /// Next `data:` payload from the complete lines buffered so far.
    pub fn next_data(&mut self) -> Option<String> {
        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let line = self.buffer.split_to(pos + 1);
            let line = String::from_utf8_lossy(&line);
            if let Some(data) = parse_sse_line(line.trim()) {
                return Some(data.to_string());
            }
        }
        None
    }

    /// Payload of a final line the server did not terminate.
    pub fn finish(&mut self) -> Option<String> {
        if self.buffer.is_empty() {
            return None;
        }
        let rest = self.buffer.split();
        let line = String::from_utf8_lossy(&rest);
        parse_sse_line(line.trim()).map(str::to_string)
    }
}

/// Extension trait for `reqwest::Response` to enable SSE streaming.
pub trait SseResponseExt {
    /// Convert the response into a stream of raw SSE data payloads.
    ///
    /// Stops when the `[DONE]` marker is encountered or the body ends.
    fn sse(self) -> impl Stream<Item = Result<String, ClientError>> + Send;

    /// Like [`sse`](Self::sse), deserializing each payload as JSON.
    fn sse_json<T>(self, verbose: bool) -> impl Stream<Item = Result<T, ClientError>> + Send
    where
        T: DeserializeOwned + Send + 'static;
}

impl SseResponseExt for reqwest::Response {
    fn sse(self) -> impl Stream<Item = Result<String, ClientError>> + Send {
        stream::unfold(
            (Box::pin(self.bytes_stream()), SseDecoder::new(), false),
            |(mut bytes, mut decoder, mut ended)| async move {
                loop {
                    if let Some(data) = decoder.next_data() {
                        if is_done_marker(&data) {
                            return None;
                        }
                        return Some((Ok(data), (bytes, decoder, ended)));
                    }

                    if ended {
                        let data = decoder.finish()?;
                        if is_done_marker(&data) {
                            return None;
                        }
                        return Some((Ok(data), (bytes, decoder, ended)));
                    }

                    match bytes.next().await {
                        Some(Ok(chunk)) => decoder.push(&chunk),
                        Some(Err(e)) => {
                            let state = (bytes, SseDecoder::new(), true);
                            return Some((Err(ClientError::from(e)), state));
                        }
                        None => ended = true,
                    }
                }
            },
        )
    }

    fn sse_json<T>(self, verbose: bool) -> impl Stream<Item = Result<T, ClientError>> + Send
    where
        T: DeserializeOwned + Send + 'static,
    {
        self.sse().map(move |line| {
            let line = line?;
            if verbose {
                info!(data = %line, "stream event");
            }
            serde_json::from_str::<T>(&line).map_err(|e| {
                ClientError::ProviderError(format!("JSON parse error: {} | Input: {}", e, line))
            })
        })
    }
}

/// Parse an SSE line to extract the data portion.
///
/// # Example
/// ```
/// use textllm::sse::parse_sse_line;
///
/// assert_eq!(parse_sse_line("data: {\"key\": 1}"), Some("{\"key\": 1}"));
/// assert_eq!(parse_sse_line(": ping"), None);
/// ```
pub fn parse_sse_line(line: &str) -> Option<&str> {
    line.strip_prefix("data:").map(|s| s.trim())
}

/// Check if an SSE data payload indicates the stream is done.
pub fn is_done_marker(data: &str) -> bool {
    data == "[DONE]"
}
