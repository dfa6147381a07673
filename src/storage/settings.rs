//! Key/value runtime settings (`system_config`).

use sqlx::SqlitePool;

use crate::error::Result;

pub const MAX_RETRIES_KEY: &str = "max_retries";

pub async fn get_setting(db: &SqlitePool, key: &str) -> Result<Option<String>> {
    let value = sqlx::query_scalar::<_, String>("SELECT value FROM system_config WHERE key = ?")
        .bind(key)
        .fetch_optional(db)
        .await?;
    Ok(value)
}

/// Insert or replace a setting.
pub async fn set_setting(db: &SqlitePool, key: &str, value: &str) -> Result<()> {
    sqlx::query(
        "INSERT INTO system_config (key, value) VALUES (?, ?)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
    )
    .bind(key)
    .bind(value)
    .execute(db)
    .await?;
    Ok(())
}

/// Attempts per channel, read fresh from the store.
///
/// Falls back to `default` when the setting is absent, unreadable, not a
/// number, or zero.
pub async fn max_retries(db: &SqlitePool, default: u32) -> u32 {
    match get_setting(db, MAX_RETRIES_KEY).await {
        Ok(Some(raw)) => match raw.trim().parse::<u32>() {
            Ok(n) if n > 0 => n,
            _ => {
                tracing::warn!(value = %raw, default, "Invalid max_retries setting, using default");
                default
            }
        },
        Ok(None) => default,
        Err(e) => {
            tracing::warn!(error = %e, default, "Failed to read max_retries setting, using default");
            default
        }
    }
}
