//! OpenAI-compatible chat completions.

use futures::StreamExt;
use serde::{Deserialize, Serialize};

use super::sse::SseObserver;
use super::types::{ChatRequest, Completion, Message, ResponseFormat};
use super::{ensure_success, ChannelError, Target};

/// Chat completion request body.
#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: &'a [Message],
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<WireResponseFormat>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream: Option<bool>,
}

#[derive(Debug, Serialize)]
struct WireResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

impl From<ResponseFormat> for WireResponseFormat {
    fn from(format: ResponseFormat) -> Self {
        match format {
            ResponseFormat::JsonObject => WireResponseFormat {
                kind: "json_object",
            },
        }
    }
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: Option<ChoiceMessage>,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct OpenAiAdapter;

impl OpenAiAdapter {
    fn body<'a>(target: &Target<'a>, request: &'a ChatRequest, stream: bool) -> ChatCompletionRequest<'a> {
        ChatCompletionRequest {
            model: target.model,
            messages: &request.messages,
            temperature: request.temperature,
            response_format: request.response_format.map(WireResponseFormat::from),
            stream: stream.then_some(true),
        }
    }

    pub async fn complete(
        &self,
        client: &reqwest::Client,
        target: Target<'_>,
        request: &ChatRequest,
    ) -> Result<Completion, ChannelError> {
        let response = client
            .post(target.url("chat/completions"))
            .bearer_auth(target.api_key.expose_secret())
            .json(&Self::body(&target, request, false))
            .send()
            .await?;
        let response = ensure_success(response).await?;

        let parsed: ChatCompletionResponse = response.json().await?;
        let text = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message)
            .and_then(|m| m.content)
            .unwrap_or_default();

        Ok(Completion { text })
    }

    pub async fn stream(
        &self,
        client: &reqwest::Client,
        target: Target<'_>,
        request: &ChatRequest,
        on_chunk: &mut (dyn FnMut(&str) + Send),
    ) -> Result<Completion, ChannelError> {
        let response = client
            .post(target.url("chat/completions"))
            .bearer_auth(target.api_key.expose_secret())
            .json(&Self::body(&target, request, true))
            .send()
            .await?;
        let response = ensure_success(response).await?;

        let mut body = response.bytes_stream();
        let mut observer = SseObserver::new();
        let mut text = String::new();

        while let Some(chunk) = body.next().await {
            let chunk = chunk?;
            for fragment in observer.process_chunk(&chunk) {
                on_chunk(&fragment);
                text.push_str(&fragment);
            }
        }

        let (tail, result) = observer.finish();
        for fragment in tail {
            on_chunk(&fragment);
            text.push_str(&fragment);
        }

        if let Some(message) = result.error {
            return Err(ChannelError::Stream(message));
        }
        if !result.is_complete() {
            return Err(ChannelError::Stream(
                "stream ended before [DONE] or finish_reason".to_string(),
            ));
        }

        Ok(Completion { text })
    }
}
