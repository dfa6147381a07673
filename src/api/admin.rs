//! Registry, settings and pool administration endpoints.
//!
//! Registry writes schedule a background rebuild of the affected pool and
//! return without waiting for it.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};

use super::server::AppState;
use crate::error::{Error, Result};
use crate::pool::{Channel, PoolType};
use crate::storage::{providers, settings, NewProvider, ProviderRecord, ProviderUpdate};

/// Query parameters for GET /api/admin/llm-providers.
#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub pool_type: Option<String>,
}

/// Query parameters for POST /api/admin/pools/rebuild.
#[derive(Debug, Deserialize)]
pub struct RebuildQuery {
    pub pool: Option<String>,
}

/// Body for POST /api/admin/config.
#[derive(Debug, Deserialize)]
pub struct SettingBody {
    pub key: String,
    /// String or number; stored as text
    pub value: serde_json::Value,
}

#[derive(Debug, Serialize)]
pub struct SettingView {
    pub key: String,
    pub value: Option<String>,
}

/// A channel as exposed over HTTP; the credential is never included.
#[derive(Debug, Serialize)]
pub struct ChannelView {
    pub position: usize,
    pub id: String,
    pub provider_id: i64,
    pub provider: String,
    pub api_family: String,
    pub model: String,
    pub is_primary: bool,
    pub priority: i64,
    pub weight: i64,
    pub model_index: usize,
    pub key_index: usize,
}

impl ChannelView {
    fn new(position: usize, channel: &Channel) -> Self {
        Self {
            position,
            id: channel.id.clone(),
            provider_id: channel.provider_id,
            provider: channel.provider_name.clone(),
            api_family: channel.api_family.to_string(),
            model: channel.model.clone(),
            is_primary: channel.is_primary,
            priority: channel.priority,
            weight: channel.weight,
            model_index: channel.model_index,
            key_index: channel.key_index,
        }
    }
}

fn parse_pool(raw: Option<&str>) -> Result<Option<PoolType>> {
    raw.filter(|s| !s.trim().is_empty())
        .map(str::parse::<PoolType>)
        .transpose()
}

/// Handle GET /api/admin/llm-providers
pub async fn list_providers(
    State(state): State<AppState>,
    Query(params): Query<ListQuery>,
) -> Result<Json<Vec<ProviderRecord>>> {
    let pool = parse_pool(params.pool_type.as_deref())?;
    let records = providers::list_providers(&state.db, pool).await?;
    Ok(Json(records))
}

/// Handle POST /api/admin/llm-providers
pub async fn create_provider(
    State(state): State<AppState>,
    Json(body): Json<NewProvider>,
) -> Result<(StatusCode, Json<ProviderRecord>)> {
    let record = providers::create_provider(&state.db, body).await?;
    state.pools.spawn_rebuild(record.pool_type);
    Ok((StatusCode::CREATED, Json(record)))
}

/// Handle PUT /api/admin/llm-providers/:id
pub async fn update_provider(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(body): Json<ProviderUpdate>,
) -> Result<Json<ProviderRecord>> {
    let before = providers::get_provider(&state.db, id).await?;
    let record = providers::update_provider(&state.db, id, body).await?;

    state.pools.spawn_rebuild(record.pool_type);
    if before.pool_type != record.pool_type {
        state.pools.spawn_rebuild(before.pool_type);
    }
    Ok(Json(record))
}

/// Handle DELETE /api/admin/llm-providers/:id
pub async fn delete_provider(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<serde_json::Value>> {
    let record = providers::delete_provider(&state.db, id).await?;
    state.pools.spawn_rebuild(record.pool_type);
    Ok(Json(serde_json::json!({ "id": id, "deleted": true })))
}

/// Handle POST /api/admin/llm-providers/:id/set-primary
pub async fn set_primary(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<ProviderRecord>> {
    let record = providers::set_primary(&state.db, id).await?;
    state.pools.spawn_rebuild(record.pool_type);
    Ok(Json(record))
}

/// Handle POST /api/admin/llm-providers/:id/toggle
pub async fn toggle_provider(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<ProviderRecord>> {
    let record = providers::toggle_enabled(&state.db, id).await?;
    state.pools.spawn_rebuild(record.pool_type);
    Ok(Json(record))
}

/// Handle GET /api/admin/config/:key
pub async fn get_config(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Json<SettingView>> {
    let value = settings::get_setting(&state.db, &key).await?;
    Ok(Json(SettingView { key, value }))
}

/// Handle POST /api/admin/config
pub async fn set_config(
    State(state): State<AppState>,
    Json(body): Json<SettingBody>,
) -> Result<Json<SettingView>> {
    if body.key.trim().is_empty() {
        return Err(Error::BadRequest("'key' must not be empty".to_string()));
    }

    let value = match body.value {
        serde_json::Value::String(s) => s,
        serde_json::Value::Number(n) => n.to_string(),
        serde_json::Value::Bool(b) => b.to_string(),
        other => {
            return Err(Error::BadRequest(format!(
                "setting value must be a string, number or bool, got {}",
                other
            )))
        }
    };

    if body.key == settings::MAX_RETRIES_KEY && !matches!(value.trim().parse::<u32>(), Ok(n) if n > 0) {
        return Err(Error::BadRequest(format!(
            "max_retries must be a positive integer, got '{}'",
            value
        )));
    }

    settings::set_setting(&state.db, &body.key, &value).await?;
    tracing::info!(key = %body.key, value = %value, "Setting updated");

    Ok(Json(SettingView {
        key: body.key,
        value: Some(value),
    }))
}

/// Handle POST /api/admin/pools/rebuild
///
/// Synchronous: returns once the requested pools are rebuilt.
pub async fn rebuild_pools(
    State(state): State<AppState>,
    Query(params): Query<RebuildQuery>,
) -> Result<Json<serde_json::Value>> {
    let targets = match parse_pool(params.pool.as_deref())? {
        Some(pool) => vec![pool],
        None => PoolType::ALL.to_vec(),
    };

    let mut counts = serde_json::Map::new();
    for pool in targets {
        let snapshot = state.pools.rebuild(pool).await?;
        counts.insert(pool.to_string(), snapshot.len().into());
    }

    Ok(Json(serde_json::json!({ "pools": counts })))
}

/// Handle GET /api/admin/pools/:pool/channels
pub async fn list_channels(
    State(state): State<AppState>,
    Path(pool): Path<String>,
) -> Result<Json<serde_json::Value>> {
    let pool: PoolType = pool.parse()?;
    let snapshot = state.pools.snapshot(pool);

    let channels: Vec<ChannelView> = snapshot
        .channels
        .iter()
        .enumerate()
        .map(|(position, channel)| ChannelView::new(position, channel))
        .collect();

    Ok(Json(serde_json::json!({
        "pool": pool,
        "built_at": snapshot.built_at.to_rfc3339(),
        "channels": channels,
    })))
}
