//! Dispatch and health handlers.

use std::convert::Infallible;

use axum::{
    extract::{Extension, Path, State},
    http::{HeaderName, HeaderValue},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    Json,
};
use futures::StreamExt;
use serde::Deserialize;

use super::server::{AppState, RequestId};
use crate::adapter::{Message, ResponseFormat};
use crate::error::{Error, Result};
use crate::pool::PoolType;
use crate::router::{DispatchOptions, StreamEvent, ValidatorSpec};

/// Response header: channel that produced the answer.
pub const CHANNEL_HEADER: &str = "x-llmpool-channel";
/// Response header: failed attempts per channel, e.g. `"2/[m] @ a.test#0"`.
pub const RETRIES_HEADER: &str = "x-llmpool-retries";

/// Body of the dispatch and stream endpoints.
#[derive(Debug, Deserialize)]
pub struct DispatchBody {
    pub messages: Vec<Message>,
    pub temperature: Option<f32>,
    pub response_format: Option<ResponseFormat>,
    pub validate: Option<ValidatorSpec>,
}

impl DispatchBody {
    fn into_parts(self, request_id: RequestId) -> Result<(Vec<Message>, DispatchOptions)> {
        if self.messages.is_empty() {
            return Err(Error::BadRequest("'messages' must not be empty".to_string()));
        }

        let validator = match &self.validate {
            Some(spec) => spec.build()?,
            None => None,
        };
        let defaults = DispatchOptions::default();
        let options = DispatchOptions {
            temperature: self.temperature.unwrap_or(defaults.temperature),
            response_format: self.response_format,
            validator,
            correlation_id: Some(request_id.0.to_string()),
        };
        Ok((self.messages, options))
    }
}

fn insert_header(response: &mut Response, name: &'static str, value: &str) {
    match HeaderValue::from_str(value) {
        Ok(v) => {
            response
                .headers_mut()
                .insert(HeaderName::from_static(name), v);
        }
        Err(_) => tracing::debug!(header = name, "Skipping header with invalid characters"),
    }
}

/// Handle POST /v1/pools/:pool/dispatch
pub async fn dispatch(
    State(state): State<AppState>,
    Extension(request_id): Extension<RequestId>,
    Path(pool): Path<String>,
    Json(body): Json<DispatchBody>,
) -> Result<Response> {
    let pool: PoolType = pool.parse()?;
    let (messages, options) = body.into_parts(request_id)?;

    let done = state.router.dispatch(pool, messages, options).await?;

    let mut response = Json(serde_json::json!({
        "text": done.text,
        "channel": done.channel,
        "attempts": done.attempts,
    }))
    .into_response();
    insert_header(&mut response, CHANNEL_HEADER, &done.channel);
    if let Some(summary) = done.retries_summary() {
        insert_header(&mut response, RETRIES_HEADER, &summary);
    }
    Ok(response)
}

fn to_sse(event: StreamEvent) -> Event {
    let (name, data) = match event {
        StreamEvent::Chunk(text) => ("chunk", serde_json::json!({ "text": text })),
        StreamEvent::Restart { channel, attempt } => (
            "restart",
            serde_json::json!({ "channel": channel, "attempt": attempt }),
        ),
        StreamEvent::Done(done) => (
            "done",
            serde_json::json!({
                "text": done.text,
                "channel": done.channel,
                "attempts": done.attempts,
                "retries": done.retries_summary(),
            }),
        ),
        StreamEvent::Failed(message) => ("error", serde_json::json!({ "message": message })),
    };

    // Payloads are JSON, so multi-line text never breaks SSE framing.
    Event::default().event(name).data(data.to_string())
}

/// Handle POST /v1/pools/:pool/stream
///
/// Emits `chunk`, `restart`, `done` and `error` events. Requests against an
/// empty pool fail before the stream opens.
pub async fn dispatch_stream(
    State(state): State<AppState>,
    Extension(request_id): Extension<RequestId>,
    Path(pool): Path<String>,
    Json(body): Json<DispatchBody>,
) -> Result<Response> {
    let pool: PoolType = pool.parse()?;
    let (messages, options) = body.into_parts(request_id)?;

    if state.pools.snapshot(pool).is_empty() {
        return Err(Error::PoolEmpty { pool });
    }

    let events = state
        .router
        .dispatch_stream_events(pool, messages, options)
        .map(|event| Ok::<_, Infallible>(to_sse(event)));

    Ok(Sse::new(events)
        .keep_alive(KeepAlive::default())
        .into_response())
}

/// Handle GET /health
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let pools: serde_json::Map<String, serde_json::Value> = state
        .pools
        .sizes()
        .into_iter()
        .map(|(pool, size)| (pool.to_string(), size.into()))
        .collect();

    Json(serde_json::json!({
        "status": "ok",
        "service": "llmpool",
        "pools": pools,
    }))
}
