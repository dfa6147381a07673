//! Compile registry records into an ordered channel list.

use super::channel::{channel_id, Channel};
use crate::config::split_credentials;
use crate::storage::providers::ProviderRecord;

/// Expand every enabled record into credential x model channels and order them.
///
/// Records with no usable credential or no model contribute nothing. Records
/// sharing a priority are not interleaved: the first one's models all come
/// before the second one's. Within one record the sort is stable, so with two
/// keys and models `[m1, m2]` the result is k1/m1, k2/m1, k1/m2, k2/m2.
pub fn build_channels(records: &[ProviderRecord]) -> Vec<Channel> {
    let mut channels = Vec::new();

    for (record_index, record) in records.iter().filter(|r| r.enabled).enumerate() {
        let keys = split_credentials(record.credentials.expose_secret());
        let models: Vec<&str> = record
            .models
            .iter()
            .map(|m| m.trim())
            .filter(|m| !m.is_empty())
            .collect();

        if keys.is_empty() || models.is_empty() {
            tracing::debug!(
                provider = %record.name,
                keys = keys.len(),
                models = models.len(),
                "Provider contributes no channels"
            );
            continue;
        }

        for (key_index, key) in keys.iter().enumerate() {
            for (model_index, model) in models.iter().enumerate() {
                channels.push(Channel {
                    id: channel_id(model, &record.base_url, key_index),
                    provider_id: record.id,
                    provider_name: record.name.clone(),
                    base_url: record.base_url.trim().to_string(),
                    api_family: record.api_family,
                    api_key: key.clone(),
                    model: model.to_string(),
                    is_primary: record.is_primary,
                    priority: record.priority,
                    weight: record.weight,
                    record_index,
                    model_index,
                    key_index,
                });
            }
        }
    }

    channels.sort_by_key(Channel::sort_key);
    channels
}
