//! Shared retry-then-failover loop.
//!
//! Both the blocking and the streaming path run through
//! [`retry_with_failover`]; they differ only in the `send` function that
//! carries out one attempt.
//!
//! - channels are walked in pool order, one at a time
//! - each channel gets `max_retries` attempts before the next one is tried
//! - failed attempts are pushed into a caller-owned `Arc<Mutex<Vec<_>>>` so
//!   the history survives cancellation of this future

use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::adapter::ChannelError;
use crate::error::{Error, Result};
use crate::pool::{Channel, Pool};

/// Upper bound for the delay between two attempts on the same channel.
const MAX_BACKOFF: Duration = Duration::from_secs(8);

/// One failed attempt.
#[derive(Debug, Clone)]
pub struct AttemptRecord {
    pub channel: String,
    /// 1-based attempt number on this channel
    pub attempt: u32,
    pub error: ChannelError,
}

/// A successful attempt and where it happened.
#[derive(Debug)]
pub struct RetryOutcome<T> {
    pub value: T,
    pub channel: String,
    /// Attempts made across all channels, including the successful one
    pub attempts: usize,
}

/// Delay before attempt `attempt` (1-based) on the same channel.
///
/// Zero for the first attempt, then `base`, `2 * base`, `4 * base`, ...
/// capped at 8 seconds.
pub fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    if attempt < 2 || base.is_zero() {
        return Duration::ZERO;
    }
    let exponent = (attempt - 2).min(16);
    base.saturating_mul(1u32 << exponent).min(MAX_BACKOFF)
}

/// Failed attempts per channel in first-appearance order.
///
/// Format: `"2/[m1] @ a.test#0, 1/[m2] @ b.test#0"`. `None` when nothing failed.
pub fn format_retries_summary(attempts: &[AttemptRecord]) -> Option<String> {
    if attempts.is_empty() {
        return None;
    }
    let mut counts: Vec<(&str, u32)> = Vec::new();
    for attempt in attempts {
        match counts.iter_mut().find(|(name, _)| *name == attempt.channel) {
            Some(entry) => entry.1 += 1,
            None => counts.push((&attempt.channel, 1)),
        }
    }
    Some(
        counts
            .iter()
            .map(|(name, count)| format!("{}/{}", count, name))
            .collect::<Vec<_>>()
            .join(", "),
    )
}

/// Copy of the recorded attempts, tolerating a poisoned lock.
pub fn recorded_attempts(attempts: &Mutex<Vec<AttemptRecord>>) -> Vec<AttemptRecord> {
    attempts
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .clone()
}

fn record_attempt(attempts: &Mutex<Vec<AttemptRecord>>, record: AttemptRecord) {
    attempts
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .push(record);
}

/// Walk `pool` in order, retrying each channel up to `max_retries` times.
///
/// Returns the first success. An empty pool fails with [`Error::PoolEmpty`]
/// before `send` is ever called; when every attempt on every channel fails
/// the result is [`Error::ExhaustedPool`] carrying the last error.
///
/// A `max_retries` of zero is treated as one.
pub async fn retry_with_failover<T, F, Fut>(
    pool: &Pool,
    max_retries: u32,
    backoff: Duration,
    attempts: Arc<Mutex<Vec<AttemptRecord>>>,
    send: F,
) -> Result<RetryOutcome<T>>
where
    F: Fn(&Channel, u32) -> Fut,
    Fut: Future<Output = std::result::Result<T, ChannelError>>,
{
    if pool.is_empty() {
        tracing::error!(pool = %pool.pool_type, "Pool is empty");
        return Err(Error::PoolEmpty {
            pool: pool.pool_type,
        });
    }

    let max_retries = max_retries.max(1);
    let mut last_error: Option<ChannelError> = None;
    let mut total = 0usize;

    for (index, channel) in pool.channels.iter().enumerate() {
        if index > 0 {
            tracing::warn!(
                pool = %pool.pool_type,
                from = %pool.channels[index - 1].id,
                to = %channel.id,
                position = index,
                "Failing over"
            );
        }

        tracing::info!(
            pool = %pool.pool_type,
            channel = %channel.id,
            api_family = %channel.api_family,
            priority = channel.priority,
            "Request started"
        );

        for attempt in 1..=max_retries {
            let delay = backoff_delay(backoff, attempt);
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }

            total += 1;
            match send(channel, attempt).await {
                Ok(value) => {
                    return Ok(RetryOutcome {
                        value,
                        channel: channel.id.clone(),
                        attempts: total,
                    });
                }
                Err(err) => {
                    if attempt < max_retries {
                        tracing::warn!(
                            attempt,
                            max = max_retries,
                            channel = %channel.id,
                            error = %err,
                            "Retrying channel"
                        );
                    } else {
                        tracing::error!(channel = %channel.id, error = %err, "Channel exhausted");
                    }

                    record_attempt(
                        &attempts,
                        AttemptRecord {
                            channel: channel.id.clone(),
                            attempt,
                            error: err.clone(),
                        },
                    );
                    last_error = Some(err);
                }
            }
        }
    }

    tracing::error!(pool = %pool.pool_type, attempts = total, "Pool exhausted");

    match last_error {
        Some(source) => Err(Error::ExhaustedPool {
            pool: pool.pool_type,
            attempts: total,
            source,
        }),
        None => Err(Error::PoolEmpty {
            pool: pool.pool_type,
        }),
    }
}
