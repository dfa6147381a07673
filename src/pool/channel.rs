//! Channels: one (credential, model) pair of one provider.

use chrono::{DateTime, Utc};

use super::PoolType;
use crate::adapter::{ApiFamily, Target};
use crate::config::ApiKey;

/// Unit of dispatch and retry.
#[derive(Debug, Clone)]
pub struct Channel {
    /// Log-friendly identity: `[model] @ host#key-index`
    pub id: String,
    pub provider_id: i64,
    pub provider_name: String,
    pub base_url: String,
    pub api_family: ApiFamily,
    pub api_key: ApiKey,
    pub model: String,
    pub is_primary: bool,
    pub priority: i64,
    pub weight: i64,
    /// Position of the provider in registry order
    pub record_index: usize,
    /// Position of `model` in the provider's declared model list
    pub model_index: usize,
    /// Position of `api_key` in the provider's credential list
    pub key_index: usize,
}

impl Channel {
    /// Primary first, then ascending priority. Providers with equal priority
    /// keep registry order and each runs its whole model list in turn.
    pub fn sort_key(&self) -> (bool, i64, usize, usize) {
        (!self.is_primary, self.priority, self.record_index, self.model_index)
    }

    pub fn target(&self) -> Target<'_> {
        Target {
            base_url: &self.base_url,
            api_key: &self.api_key,
            model: &self.model,
        }
    }
}

/// Host part of a base URL, e.g. `api.openai.com` for `https://api.openai.com/v1`.
pub fn host_of(base_url: &str) -> &str {
    let without_scheme = base_url
        .split_once("//")
        .map(|(_, rest)| rest)
        .unwrap_or(base_url);
    without_scheme.split('/').next().unwrap_or(without_scheme)
}

pub fn channel_id(model: &str, base_url: &str, key_index: usize) -> String {
    format!("[{}] @ {}#{}", model, host_of(base_url), key_index)
}

/// Immutable, ordered channel list for one pool.
///
/// Replaced wholesale on rebuild; dispatches hold an `Arc<Pool>` for their
/// whole lifetime.
#[derive(Debug, Clone)]
pub struct Pool {
    pub pool_type: PoolType,
    pub channels: Vec<Channel>,
    pub built_at: DateTime<Utc>,
}

impl Pool {
    pub fn new(pool_type: PoolType, channels: Vec<Channel>) -> Self {
        Self {
            pool_type,
            channels,
            built_at: Utc::now(),
        }
    }

    pub fn empty(pool_type: PoolType) -> Self {
        Self::new(pool_type, Vec::new())
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    /// The channel every dispatch tries first.
    pub fn head(&self) -> Option<&Channel> {
        self.channels.first()
    }
}
