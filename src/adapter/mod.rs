//! Channel adapters.
//!
//! Each upstream speaks one of three wire dialects. [`Adapter`] is a closed
//! enum over them so the router only ever sees the normalized
//! [`ChatRequest`] -> [`Completion`] contract.

mod anthropic;
mod gemini;
mod openai;
pub(crate) mod sse;
pub mod types;

use serde::{Deserialize, Serialize};

use crate::config::ApiKey;

pub use anthropic::AnthropicAdapter;
pub use gemini::GeminiAdapter;
pub use openai::OpenAiAdapter;
pub use types::{ChatRequest, Completion, Message, ResponseFormat, Role};

/// Longest upstream error body kept in a [`ChannelError::Status`].
const MAX_ERROR_BODY: usize = 512;

/// Wire dialect spoken by a provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ApiFamily {
    #[default]
    #[serde(rename = "openai", alias = "openai-compatible", alias = "openai_compatible")]
    OpenAi,
    #[serde(rename = "gemini")]
    Gemini,
    #[serde(rename = "anthropic")]
    Anthropic,
}

impl ApiFamily {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApiFamily::OpenAi => "openai",
            ApiFamily::Gemini => "gemini",
            ApiFamily::Anthropic => "anthropic",
        }
    }
}

impl std::fmt::Display for ApiFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ApiFamily {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "openai" | "openai-compatible" | "openai_compatible" => Ok(ApiFamily::OpenAi),
            "gemini" => Ok(ApiFamily::Gemini),
            "anthropic" => Ok(ApiFamily::Anthropic),
            other => Err(format!("unknown api family '{}'", other)),
        }
    }
}

/// Failure of a single attempt on a single channel.
///
/// Every variant is retryable; the router treats them identically.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ChannelError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("upstream returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("malformed upstream response: {0}")]
    Decode(String),

    #[error("stream interrupted: {0}")]
    Stream(String),

    #[error("validation failed: {0}")]
    Validation(String),
}

impl From<reqwest::Error> for ChannelError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            ChannelError::Decode(e.to_string())
        } else {
            ChannelError::Transport(e.to_string())
        }
    }
}

/// Where one attempt is sent.
#[derive(Debug, Clone, Copy)]
pub struct Target<'a> {
    pub base_url: &'a str,
    pub api_key: &'a ApiKey,
    pub model: &'a str,
}

impl Target<'_> {
    pub(crate) fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), path)
    }
}

/// Family-independent adapter options.
#[derive(Debug, Clone, Copy)]
pub struct AdapterOptions {
    pub anthropic_max_tokens: u32,
}

impl Default for AdapterOptions {
    fn default() -> Self {
        Self {
            anthropic_max_tokens: 4096,
        }
    }
}

/// One adapter per API family.
#[derive(Debug, Clone)]
pub enum Adapter {
    OpenAi(OpenAiAdapter),
    Gemini(GeminiAdapter),
    Anthropic(AnthropicAdapter),
}

impl Adapter {
    pub fn for_family(family: ApiFamily, options: &AdapterOptions) -> Self {
        match family {
            ApiFamily::OpenAi => Adapter::OpenAi(OpenAiAdapter),
            ApiFamily::Gemini => Adapter::Gemini(GeminiAdapter),
            ApiFamily::Anthropic => Adapter::Anthropic(AnthropicAdapter {
                max_tokens: options.anthropic_max_tokens,
            }),
        }
    }

    pub fn family(&self) -> ApiFamily {
        match self {
            Adapter::OpenAi(_) => ApiFamily::OpenAi,
            Adapter::Gemini(_) => ApiFamily::Gemini,
            Adapter::Anthropic(_) => ApiFamily::Anthropic,
        }
    }

    /// Execute one blocking call.
    pub async fn complete(
        &self,
        client: &reqwest::Client,
        target: Target<'_>,
        request: &ChatRequest,
    ) -> Result<Completion, ChannelError> {
        match self {
            Adapter::OpenAi(a) => a.complete(client, target, request).await,
            Adapter::Gemini(a) => a.complete(client, target, request).await,
            Adapter::Anthropic(a) => a.complete(client, target, request).await,
        }
    }

    /// Execute one call, handing text fragments to `on_chunk` as they arrive.
    ///
    /// Families without incremental delivery run the blocking call and emit
    /// the whole text as a single fragment.
    pub async fn stream(
        &self,
        client: &reqwest::Client,
        target: Target<'_>,
        request: &ChatRequest,
        on_chunk: &mut (dyn FnMut(&str) + Send),
    ) -> Result<Completion, ChannelError> {
        match self {
            Adapter::OpenAi(a) => a.stream(client, target, request, on_chunk).await,
            other => {
                let completion = other.complete(client, target, request).await?;
                if !completion.text.is_empty() {
                    on_chunk(&completion.text);
                }
                Ok(completion)
            }
        }
    }
}

/// Turn a non-2xx response into [`ChannelError::Status`].
pub(crate) async fn ensure_success(
    response: reqwest::Response,
) -> Result<reqwest::Response, ChannelError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(ChannelError::Status {
        status: status.as_u16(),
        body: truncate_body(&body),
    })
}

fn truncate_body(body: &str) -> String {
    if body.len() <= MAX_ERROR_BODY {
        return body.to_string();
    }
    let mut end = MAX_ERROR_BODY;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &body[..end])
}
