//! Anthropic Messages API.
//!
//! Only one system prompt is supported by the wire format; when a request
//! carries several, the last one is sent. The JSON response hint has no
//! equivalent field and is not forwarded.

use serde::{Deserialize, Serialize};

use super::types::{ChatRequest, Completion, Role};
use super::{ensure_success, ChannelError, Target};

const ANTHROPIC_VERSION: &str = "2023-06-01";

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<&'a str>,
    messages: Vec<WireMessage<'a>>,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct WireMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    text: Option<String>,
}

#[derive(Debug, Clone)]
pub struct AnthropicAdapter {
    pub max_tokens: u32,
}

impl AnthropicAdapter {
    fn body<'a>(&self, model: &'a str, request: &'a ChatRequest) -> MessagesRequest<'a> {
        let system = request
            .messages
            .iter()
            .rev()
            .find(|m| m.role == Role::System)
            .map(|m| m.content.as_str());

        let messages = request
            .messages
            .iter()
            .filter(|m| m.role != Role::System)
            .map(|m| WireMessage {
                role: m.role.as_str(),
                content: &m.content,
            })
            .collect();

        MessagesRequest {
            model,
            max_tokens: self.max_tokens,
            system,
            messages,
            temperature: request.temperature,
        }
    }

    pub async fn complete(
        &self,
        client: &reqwest::Client,
        target: Target<'_>,
        request: &ChatRequest,
    ) -> Result<Completion, ChannelError> {
        let response = client
            .post(target.url("messages"))
            .header("x-api-key", target.api_key.expose_secret())
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&self.body(target.model, request))
            .send()
            .await?;
        let response = ensure_success(response).await?;

        let parsed: MessagesResponse = response.json().await?;
        let text = parsed
            .content
            .into_iter()
            .find(|block| block.kind == "text")
            .and_then(|block| block.text)
            .unwrap_or_default();

        Ok(Completion { text })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::types::Message;

    #[test]
    fn last_system_message_wins() {
        let adapter = AnthropicAdapter { max_tokens: 1024 };
        let request = ChatRequest::new(vec![
            Message::system("first"),
            Message::user("q"),
            Message::system("second"),
            Message::assistant("a"),
        ]);

        let json = serde_json::to_value(adapter.body("claude-3-5-sonnet", &request)).unwrap();
        assert_eq!(json["system"], "second");
        assert_eq!(json["max_tokens"], 1024);
        let messages = json["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0]["role"], "user");
        assert_eq!(messages[1]["role"], "assistant");
    }

    #[test]
    fn system_omitted_when_absent() {
        let adapter = AnthropicAdapter { max_tokens: 16 };
        let request = ChatRequest::new(vec![Message::user("q")]);
        let json = serde_json::to_value(adapter.body("m", &request)).unwrap();
        assert!(json.get("system").is_none());
    }
}
