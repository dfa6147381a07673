//! Provider registry: durable CRUD over `llm_providers`.
//!
//! Every write that can set `is_primary` clears the flag on the other records
//! of the same pool inside the same transaction, so a pool never holds more
//! than one primary.

use serde::{Deserialize, Serialize};
use sqlx::{Sqlite, SqlitePool, Transaction};

use crate::adapter::ApiFamily;
use crate::config::{ApiKey, ProviderConfig};
use crate::error::{Error, Result};
use crate::pool::PoolType;

const SELECT_COLUMNS: &str = "SELECT id, name, base_url, api_key, pool_type, api_type, is_primary, \
     priority, weight, models, enabled, created_at FROM llm_providers";

/// A registry record as stored.
#[derive(Debug, Clone, Serialize)]
pub struct ProviderRecord {
    pub id: i64,
    pub name: String,
    pub base_url: String,
    /// Comma-separated credential set; serializes as `[REDACTED]`
    pub credentials: ApiKey,
    pub pool_type: PoolType,
    pub api_family: ApiFamily,
    pub models: Vec<String>,
    pub is_primary: bool,
    pub priority: i64,
    pub weight: i64,
    pub enabled: bool,
    pub created_at: String,
}

#[derive(Debug, sqlx::FromRow)]
struct ProviderRow {
    id: i64,
    name: String,
    base_url: String,
    api_key: String,
    pool_type: String,
    api_type: String,
    is_primary: bool,
    priority: i64,
    weight: i64,
    models: String,
    enabled: bool,
    created_at: String,
}

impl TryFrom<ProviderRow> for ProviderRecord {
    type Error = Error;

    fn try_from(row: ProviderRow) -> Result<Self> {
        let pool_type = row.pool_type.parse::<PoolType>().map_err(|_| {
            Error::Internal(format!(
                "provider {} has invalid pool_type '{}'",
                row.id, row.pool_type
            ))
        })?;
        let api_family = row.api_type.parse::<ApiFamily>().unwrap_or_else(|e| {
            tracing::warn!(provider_id = row.id, error = %e, "Falling back to openai api family");
            ApiFamily::OpenAi
        });

        Ok(ProviderRecord {
            id: row.id,
            name: row.name,
            base_url: row.base_url,
            credentials: ApiKey::from(row.api_key),
            pool_type,
            api_family,
            models: split_list(&row.models),
            is_primary: row.is_primary,
            priority: row.priority,
            weight: row.weight,
            enabled: row.enabled,
            created_at: row.created_at,
        })
    }
}

/// Input for [`create_provider`].
#[derive(Debug, Clone, Deserialize)]
pub struct NewProvider {
    pub name: String,
    pub base_url: String,
    /// One or more comma-separated keys
    pub api_key: ApiKey,
    pub pool_type: PoolType,
    #[serde(default, alias = "api_type")]
    pub api_family: ApiFamily,
    pub models: Vec<String>,
    #[serde(default)]
    pub is_primary: bool,
    #[serde(default = "default_priority")]
    pub priority: i64,
    #[serde(default = "default_weight")]
    pub weight: i64,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_priority() -> i64 {
    100
}

fn default_weight() -> i64 {
    10
}

fn default_enabled() -> bool {
    true
}

impl From<&ProviderConfig> for NewProvider {
    fn from(seed: &ProviderConfig) -> Self {
        NewProvider {
            name: seed.name.clone(),
            base_url: seed.url.clone(),
            api_key: seed.api_key.clone().unwrap_or_else(|| ApiKey::from("")),
            pool_type: seed.pool,
            api_family: seed.api_family,
            models: seed.models.clone(),
            is_primary: seed.primary,
            priority: seed.priority,
            weight: seed.weight,
            enabled: seed.enabled,
        }
    }
}

/// Partial update; `None` leaves the field unchanged.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProviderUpdate {
    pub name: Option<String>,
    pub base_url: Option<String>,
    pub api_key: Option<ApiKey>,
    pub pool_type: Option<PoolType>,
    #[serde(alias = "api_type")]
    pub api_family: Option<ApiFamily>,
    pub models: Option<Vec<String>>,
    pub is_primary: Option<bool>,
    pub priority: Option<i64>,
    pub weight: Option<i64>,
    pub enabled: Option<bool>,
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

fn join_list(items: &[String]) -> String {
    items
        .iter()
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join(",")
}

fn require_non_empty(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(Error::BadRequest(format!("'{}' must not be empty", field)));
    }
    Ok(())
}

/// Clear `is_primary` on every record of `pool` other than `keep`.
async fn clear_primary(
    tx: &mut Transaction<'_, Sqlite>,
    pool: PoolType,
    keep: Option<i64>,
) -> Result<u64> {
    let result = sqlx::query(
        "UPDATE llm_providers SET is_primary = 0 WHERE pool_type = ? AND is_primary = 1 AND id != ?",
    )
    .bind(pool.as_str())
    .bind(keep.unwrap_or(-1))
    .execute(&mut **tx)
    .await?;
    Ok(result.rows_affected())
}

async fn fetch_in_tx(tx: &mut Transaction<'_, Sqlite>, id: i64) -> Result<ProviderRecord> {
    let sql = format!("{} WHERE id = ?", SELECT_COLUMNS);
    let row = sqlx::query_as::<_, ProviderRow>(&sql)
        .bind(id)
        .fetch_optional(&mut **tx)
        .await?
        .ok_or(Error::ProviderNotFound(id))?;
    row.try_into()
}

/// All records, optionally restricted to one pool, ordered by priority then id.
pub async fn list_providers(db: &SqlitePool, pool: Option<PoolType>) -> Result<Vec<ProviderRecord>> {
    let rows = match pool {
        Some(pool) => {
            let sql = format!("{} WHERE pool_type = ? ORDER BY priority ASC, id ASC", SELECT_COLUMNS);
            sqlx::query_as::<_, ProviderRow>(&sql)
                .bind(pool.as_str())
                .fetch_all(db)
                .await?
        }
        None => {
            let sql = format!("{} ORDER BY pool_type ASC, priority ASC, id ASC", SELECT_COLUMNS);
            sqlx::query_as::<_, ProviderRow>(&sql).fetch_all(db).await?
        }
    };
    rows.into_iter().map(ProviderRecord::try_from).collect()
}

/// Enabled records of one pool, ordered by priority then id.
pub async fn list_enabled(db: &SqlitePool, pool: PoolType) -> Result<Vec<ProviderRecord>> {
    let sql = format!(
        "{} WHERE pool_type = ? AND enabled = 1 ORDER BY priority ASC, id ASC",
        SELECT_COLUMNS
    );
    let rows = sqlx::query_as::<_, ProviderRow>(&sql)
        .bind(pool.as_str())
        .fetch_all(db)
        .await?;
    rows.into_iter().map(ProviderRecord::try_from).collect()
}

pub async fn get_provider(db: &SqlitePool, id: i64) -> Result<ProviderRecord> {
    let sql = format!("{} WHERE id = ?", SELECT_COLUMNS);
    let row = sqlx::query_as::<_, ProviderRow>(&sql)
        .bind(id)
        .fetch_optional(db)
        .await?
        .ok_or(Error::ProviderNotFound(id))?;
    row.try_into()
}

pub async fn count_providers(db: &SqlitePool) -> Result<i64> {
    let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM llm_providers")
        .fetch_one(db)
        .await?;
    Ok(count)
}

pub async fn create_provider(db: &SqlitePool, new: NewProvider) -> Result<ProviderRecord> {
    let mut tx = db.begin().await?;
    let record = insert_in_tx(&mut tx, new).await?;
    tx.commit().await?;

    tracing::info!(
        provider_id = record.id,
        name = %record.name,
        pool = %record.pool_type,
        primary = record.is_primary,
        "Provider created"
    );
    Ok(record)
}

async fn insert_in_tx(tx: &mut Transaction<'_, Sqlite>, new: NewProvider) -> Result<ProviderRecord> {
    require_non_empty("name", &new.name)?;
    require_non_empty("base_url", &new.base_url)?;

    if new.is_primary {
        clear_primary(tx, new.pool_type, None).await?;
    }

    let result = sqlx::query(
        "INSERT INTO llm_providers (
            name, base_url, api_key, pool_type, api_type,
            is_primary, priority, weight, models, enabled, created_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(new.name.trim())
    .bind(new.base_url.trim())
    .bind(new.api_key.expose_secret())
    .bind(new.pool_type.as_str())
    .bind(new.api_family.as_str())
    .bind(new.is_primary)
    .bind(new.priority)
    .bind(new.weight)
    .bind(join_list(&new.models))
    .bind(new.enabled)
    .bind(chrono::Utc::now().to_rfc3339())
    .execute(&mut **tx)
    .await?;

    fetch_in_tx(tx, result.last_insert_rowid()).await
}

pub async fn update_provider(db: &SqlitePool, id: i64, update: ProviderUpdate) -> Result<ProviderRecord> {
    let mut tx = db.begin().await?;
    let mut record = fetch_in_tx(&mut tx, id).await?;

    if let Some(name) = update.name {
        require_non_empty("name", &name)?;
        record.name = name.trim().to_string();
    }
    if let Some(base_url) = update.base_url {
        require_non_empty("base_url", &base_url)?;
        record.base_url = base_url.trim().to_string();
    }
    if let Some(api_key) = update.api_key {
        record.credentials = api_key;
    }
    if let Some(pool_type) = update.pool_type {
        record.pool_type = pool_type;
    }
    if let Some(api_family) = update.api_family {
        record.api_family = api_family;
    }
    if let Some(models) = update.models {
        record.models = models;
    }
    if let Some(is_primary) = update.is_primary {
        record.is_primary = is_primary;
    }
    if let Some(priority) = update.priority {
        record.priority = priority;
    }
    if let Some(weight) = update.weight {
        record.weight = weight;
    }
    if let Some(enabled) = update.enabled {
        record.enabled = enabled;
    }

    // Covers a record moving pools with its flag: the target pool is cleared.
    if record.is_primary {
        clear_primary(&mut tx, record.pool_type, Some(id)).await?;
    }

    sqlx::query(
        "UPDATE llm_providers SET
            name = ?, base_url = ?, api_key = ?, pool_type = ?, api_type = ?,
            is_primary = ?, priority = ?, weight = ?, models = ?, enabled = ?
         WHERE id = ?",
    )
    .bind(&record.name)
    .bind(&record.base_url)
    .bind(record.credentials.expose_secret())
    .bind(record.pool_type.as_str())
    .bind(record.api_family.as_str())
    .bind(record.is_primary)
    .bind(record.priority)
    .bind(record.weight)
    .bind(join_list(&record.models))
    .bind(record.enabled)
    .bind(id)
    .execute(&mut *tx)
    .await?;

    let record = fetch_in_tx(&mut tx, id).await?;
    tx.commit().await?;

    tracing::info!(provider_id = id, pool = %record.pool_type, "Provider updated");
    Ok(record)
}

/// Delete a record, returning it so the caller knows which pool to rebuild.
pub async fn delete_provider(db: &SqlitePool, id: i64) -> Result<ProviderRecord> {
    let mut tx = db.begin().await?;
    let record = fetch_in_tx(&mut tx, id).await?;
    sqlx::query("DELETE FROM llm_providers WHERE id = ?")
        .bind(id)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;

    tracing::info!(provider_id = id, pool = %record.pool_type, "Provider deleted");
    Ok(record)
}

/// Make `id` the only primary of its pool.
pub async fn set_primary(db: &SqlitePool, id: i64) -> Result<ProviderRecord> {
    let mut tx = db.begin().await?;
    let record = fetch_in_tx(&mut tx, id).await?;

    let cleared = clear_primary(&mut tx, record.pool_type, Some(id)).await?;
    sqlx::query("UPDATE llm_providers SET is_primary = 1 WHERE id = ?")
        .bind(id)
        .execute(&mut *tx)
        .await?;

    let record = fetch_in_tx(&mut tx, id).await?;
    tx.commit().await?;

    tracing::info!(
        provider_id = id,
        pool = %record.pool_type,
        cleared,
        "Primary provider set"
    );
    Ok(record)
}

pub async fn toggle_enabled(db: &SqlitePool, id: i64) -> Result<ProviderRecord> {
    let mut tx = db.begin().await?;
    fetch_in_tx(&mut tx, id).await?;
    sqlx::query("UPDATE llm_providers SET enabled = NOT enabled WHERE id = ?")
        .bind(id)
        .execute(&mut *tx)
        .await?;
    let record = fetch_in_tx(&mut tx, id).await?;
    tx.commit().await?;

    tracing::info!(provider_id = id, enabled = record.enabled, "Provider toggled");
    Ok(record)
}

/// Import seed providers when the registry is empty. Returns how many were imported.
pub async fn import_seed(db: &SqlitePool, seeds: &[ProviderConfig]) -> Result<usize> {
    if seeds.is_empty() {
        return Ok(0);
    }
    let existing = count_providers(db).await?;
    if existing > 0 {
        tracing::debug!(existing, "Registry not empty, skipping seed import");
        return Ok(0);
    }

    // Single transaction: a rejected seed leaves the registry empty.
    let mut tx = db.begin().await?;
    for seed in seeds {
        if seed.api_key.is_none() {
            tracing::warn!(provider = %seed.name, "Seed provider has no API key; it will contribute no channels");
        }
        insert_in_tx(&mut tx, NewProvider::from(seed)).await?;
    }
    tx.commit().await?;

    tracing::info!(count = seeds.len(), "Imported seed providers");
    Ok(seeds.len())
}
