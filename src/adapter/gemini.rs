//! Gemini `generateContent`.
//!
//! System messages move into `systemInstruction`; the assistant role is
//! called `model`. Always a single non-streaming call.

use serde::{Deserialize, Serialize};

use super::types::{ChatRequest, Completion, ResponseFormat, Role};
use super::{ensure_success, ChannelError, Target};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest {
    contents: Vec<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<Content>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
struct Content {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'static str>,
    parts: Vec<Part>,
}

#[derive(Debug, Serialize)]
struct Part {
    text: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_mime_type: Option<&'static str>,
}

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    text: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct GeminiAdapter;

impl GeminiAdapter {
    fn body(request: &ChatRequest) -> GenerateContentRequest {
        let mut system_parts = Vec::new();
        let mut contents = Vec::new();

        for message in &request.messages {
            match message.role {
                Role::System => system_parts.push(Part {
                    text: message.content.clone(),
                }),
                Role::User | Role::Assistant => contents.push(Content {
                    role: Some(if message.role == Role::Assistant {
                        "model"
                    } else {
                        "user"
                    }),
                    parts: vec![Part {
                        text: message.content.clone(),
                    }],
                }),
            }
        }

        GenerateContentRequest {
            contents,
            system_instruction: (!system_parts.is_empty()).then(|| Content {
                role: None,
                parts: system_parts,
            }),
            generation_config: GenerationConfig {
                temperature: request.temperature,
                response_mime_type: request.response_format.map(|f| match f {
                    ResponseFormat::JsonObject => "application/json",
                }),
            },
        }
    }

    fn path(model: &str) -> String {
        let model = model.strip_prefix("models/").unwrap_or(model);
        format!("models/{}:generateContent", model)
    }

    pub async fn complete(
        &self,
        client: &reqwest::Client,
        target: Target<'_>,
        request: &ChatRequest,
    ) -> Result<Completion, ChannelError> {
        let response = client
            .post(target.url(&Self::path(target.model)))
            .header("x-goog-api-key", target.api_key.expose_secret())
            .json(&Self::body(request))
            .send()
            .await?;
        let response = ensure_success(response).await?;

        let parsed: GenerateContentResponse = response.json().await?;
        let text = parsed
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .and_then(|c| c.parts.into_iter().next())
            .and_then(|p| p.text)
            .unwrap_or_default();

        Ok(Completion { text })
    }
}
