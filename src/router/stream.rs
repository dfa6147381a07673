//! Streaming dispatch.
//!
//! Chunks are forwarded to the sink as soon as they arrive. If an attempt
//! fails after forwarding anything (transport error mid-stream, truncated
//! stream, validator rejection of the assembled text), the next attempt is
//! preceded by [`StreamEvent::Restart`] so the consumer can drop what it got
//! from the failed attempt. The returned text holds only the chunks of the
//! attempt that succeeded.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use futures::Stream;
use tokio::sync::mpsc::{self, UnboundedSender};
use tokio_stream::wrappers::UnboundedReceiverStream;

use super::dispatch::{DispatchOptions, Dispatched, Router};
use super::retry::{recorded_attempts, retry_with_failover, AttemptRecord};
use crate::adapter::{Adapter, ChannelError, ChatRequest, Message};
use crate::error::Result;
use crate::pool::PoolType;

/// What a streaming consumer observes.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    /// Text fragment from the current attempt
    Chunk(String),
    /// Chunks received since the last restart are void; `attempt` on
    /// `channel` starts from scratch
    Restart { channel: String, attempt: u32 },
    /// Terminal success
    Done(Dispatched),
    /// Terminal failure
    Failed(String),
}

impl Router {
    /// Dispatch with incremental delivery, forwarding events to `sink`.
    ///
    /// The sink receives `Chunk` and `Restart` events only; the terminal
    /// outcome is the return value. Once the sink's receiver is dropped,
    /// remaining attempts fail without contacting upstream.
    pub async fn dispatch_stream(
        &self,
        pool: PoolType,
        messages: Vec<Message>,
        options: DispatchOptions,
        sink: Option<UnboundedSender<StreamEvent>>,
    ) -> Result<Dispatched> {
        let started = Instant::now();
        let correlation_id = options
            .correlation_id
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        let snapshot = self.pools.snapshot(pool);
        let max_retries = self.max_retries().await;
        let request = ChatRequest {
            messages,
            temperature: options.temperature,
            response_format: options.response_format,
        };
        let validator = options.validator.as_ref();
        let sink = sink.as_ref();
        let forwarded = AtomicBool::new(false);
        let attempts: Arc<Mutex<Vec<AttemptRecord>>> = Arc::new(Mutex::new(Vec::new()));

        let result = retry_with_failover(
            &snapshot,
            max_retries,
            self.config.retry_backoff(),
            attempts.clone(),
            |channel, attempt| {
                let adapter = Adapter::for_family(channel.api_family, &self.adapter_options);
                let channel = channel.clone();
                let client = &self.client;
                let request = &request;
                let forwarded = &forwarded;
                async move {
                    if sink.is_some_and(|s| s.is_closed()) {
                        return Err(ChannelError::Stream(
                            "stream consumer disconnected".to_string(),
                        ));
                    }
                    if forwarded.swap(false, Ordering::SeqCst) {
                        tracing::debug!(channel = %channel.id, attempt, "Restarting stream");
                        emit(
                            sink,
                            StreamEvent::Restart {
                                channel: channel.id.clone(),
                                attempt,
                            },
                        );
                    }

                    let mut text = String::new();
                    {
                        let mut on_chunk = |chunk: &str| {
                            text.push_str(chunk);
                            forwarded.store(true, Ordering::SeqCst);
                            emit(sink, StreamEvent::Chunk(chunk.to_string()));
                        };
                        adapter
                            .stream(client, channel.target(), request, &mut on_chunk)
                            .await?;
                    }

                    if let Some(validator) = validator {
                        validator.check(&text)?;
                    }
                    Ok(text)
                }
            },
        )
        .await;

        let failures = recorded_attempts(&attempts);
        let outcome = result.map(|outcome| Dispatched {
            text: outcome.value,
            channel: outcome.channel,
            attempts: outcome.attempts,
            failures,
            correlation_id: correlation_id.clone(),
        });
        self.record(&correlation_id, pool, true, started, &outcome);
        outcome
    }

    /// Run [`dispatch_stream`](Self::dispatch_stream) in a background task and
    /// expose every event, ending with `Done` or `Failed`, as a stream.
    ///
    /// Dropping the returned stream abandons the dispatch, including any
    /// upstream request in flight.
    pub fn dispatch_stream_events(
        self: &Arc<Self>,
        pool: PoolType,
        messages: Vec<Message>,
        options: DispatchOptions,
    ) -> impl Stream<Item = StreamEvent> + Send + 'static {
        let (tx, rx) = mpsc::unbounded_channel();
        let router = Arc::clone(self);

        tokio::spawn(async move {
            let dispatch = router.dispatch_stream(pool, messages, options, Some(tx.clone()));
            let terminal = tokio::select! {
                outcome = dispatch => match outcome {
                    Ok(done) => StreamEvent::Done(done),
                    Err(e) => StreamEvent::Failed(e.to_string()),
                },
                _ = tx.closed() => {
                    tracing::debug!(pool = %pool, "Stream consumer gone, abandoning dispatch");
                    return;
                }
            };
            let _ = tx.send(terminal);
        });

        UnboundedReceiverStream::new(rx)
    }
}

fn emit(sink: Option<&UnboundedSender<StreamEvent>>, event: StreamEvent) {
    if let Some(sink) = sink {
        // Closed receivers are caught before the next attempt.
        let _ = sink.send(event);
    }
}
