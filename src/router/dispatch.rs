//! Blocking dispatch.

use std::sync::{Arc, Mutex};
use std::time::Instant;

use sqlx::SqlitePool;

use super::retry::{format_retries_summary, recorded_attempts, retry_with_failover, AttemptRecord};
use super::validate::Validator;
use crate::adapter::{Adapter, AdapterOptions, ChatRequest, Message, ResponseFormat};
use crate::config::RouterConfig;
use crate::error::{Error, Result};
use crate::pool::{PoolManager, PoolType};
use crate::storage::{self, settings, DispatchLog};

/// Per-call options shared by blocking and streaming dispatch.
#[derive(Debug, Clone)]
pub struct DispatchOptions {
    pub temperature: f32,
    pub response_format: Option<ResponseFormat>,
    pub validator: Option<Validator>,
    /// Correlation id for logs; generated when absent
    pub correlation_id: Option<String>,
}

impl Default for DispatchOptions {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            response_format: None,
            validator: None,
            correlation_id: None,
        }
    }
}

impl DispatchOptions {
    pub fn with_validator(mut self, validator: Validator) -> Self {
        self.validator = Some(validator);
        self
    }

    pub fn with_response_format(mut self, format: ResponseFormat) -> Self {
        self.response_format = Some(format);
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }
}

/// Result of a successful dispatch.
#[derive(Debug, Clone)]
pub struct Dispatched {
    pub text: String,
    /// Channel that produced `text`
    pub channel: String,
    /// Attempts across all channels, including the successful one
    pub attempts: usize,
    /// Failed attempts that preceded the success
    pub failures: Vec<AttemptRecord>,
    pub correlation_id: String,
}

impl Dispatched {
    /// Value for the `x-llmpool-retries` header.
    pub fn retries_summary(&self) -> Option<String> {
        format_retries_summary(&self.failures)
    }
}

/// Routes requests across a pool's channels with per-channel retry and failover.
///
/// Stateless across calls: each dispatch reads one pool snapshot and the
/// current `max_retries` setting, then walks the snapshot in order.
pub struct Router {
    pub(super) db: SqlitePool,
    pub(super) pools: Arc<PoolManager>,
    pub(super) client: reqwest::Client,
    pub(super) config: RouterConfig,
    pub(super) adapter_options: AdapterOptions,
    pub(super) log_dispatches: bool,
}

impl Router {
    pub fn new(
        db: SqlitePool,
        pools: Arc<PoolManager>,
        config: RouterConfig,
        log_dispatches: bool,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .connect_timeout(config.connect_timeout())
            .build()
            .map_err(|e| Error::Internal(format!("failed to build HTTP client: {}", e)))?;

        let adapter_options = AdapterOptions {
            anthropic_max_tokens: config.anthropic_max_tokens,
        };

        Ok(Self {
            db,
            pools,
            client,
            config,
            adapter_options,
            log_dispatches,
        })
    }

    pub fn pools(&self) -> &Arc<PoolManager> {
        &self.pools
    }

    pub fn db(&self) -> &SqlitePool {
        &self.db
    }

    /// Attempts per channel for the next dispatch, read fresh from settings.
    pub async fn max_retries(&self) -> u32 {
        settings::max_retries(&self.db, self.config.max_retries).await
    }

    /// Send `messages` to `pool`, returning the first response that passes
    /// the validator.
    pub async fn dispatch(
        &self,
        pool: PoolType,
        messages: Vec<Message>,
        options: DispatchOptions,
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
        let attempts: Arc<Mutex<Vec<AttemptRecord>>> = Arc::new(Mutex::new(Vec::new()));

        let result = retry_with_failover(
            &snapshot,
            max_retries,
            self.config.retry_backoff(),
            attempts.clone(),
            |channel, _attempt| {
                let adapter = Adapter::for_family(channel.api_family, &self.adapter_options);
                let channel = channel.clone();
                let client = &self.client;
                let request = &request;
                async move {
                    let completion = adapter.complete(client, channel.target(), request).await?;
                    if let Some(validator) = validator {
                        validator.check(&completion.text)?;
                    }
                    Ok(completion)
                }
            },
        )
        .await;

        let failures = recorded_attempts(&attempts);
        let outcome = result.map(|outcome| Dispatched {
            text: outcome.value.text,
            channel: outcome.channel,
            attempts: outcome.attempts,
            failures,
            correlation_id: correlation_id.clone(),
        });
        self.record(&correlation_id, pool, false, started, &outcome);
        outcome
    }

    /// Persist one dispatch log row when enabled.
    pub(super) fn record(
        &self,
        correlation_id: &str,
        pool: PoolType,
        streaming: bool,
        started: Instant,
        outcome: &Result<Dispatched>,
    ) {
        let latency_ms = started.elapsed().as_millis() as i64;
        match outcome {
            Ok(done) => tracing::info!(
                correlation_id,
                pool = %pool,
                channel = %done.channel,
                attempts = done.attempts,
                latency_ms,
                streaming,
                "Dispatch succeeded"
            ),
            Err(e) => tracing::warn!(
                correlation_id,
                pool = %pool,
                latency_ms,
                streaming,
                error = %e,
                "Dispatch failed"
            ),
        }

        if !self.log_dispatches {
            return;
        }

        let (channel, attempts, success, error_message) = match outcome {
            Ok(done) => (Some(done.channel.clone()), done.attempts as i64, true, None),
            Err(e) => {
                let attempts = match e {
                    Error::ExhaustedPool { attempts, .. } => *attempts as i64,
                    _ => 0,
                };
                (None, attempts, false, Some(e.to_string()))
            }
        };

        storage::spawn_log_write(
            &self.db,
            DispatchLog {
                correlation_id: correlation_id.to_string(),
                timestamp: chrono::Utc::now().to_rfc3339(),
                pool: pool.to_string(),
                channel,
                streaming,
                attempts,
                latency_ms,
                success,
                error_message,
            },
        );
    }
}
